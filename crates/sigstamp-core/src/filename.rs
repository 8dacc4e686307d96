//! File naming for uploads, derived files and downloads
//!
//! Stored names double as the only handle a client has on its files, so
//! they carry a random prefix and never contain path components.

use uuid::Uuid;

/// Download name used when the caller leaves the field empty
pub const DEFAULT_DOWNLOAD_NAME: &str = "documento_assinado";

/// Fallback when sanitizing leaves nothing
const EMPTY_UPLOAD_NAME: &str = "upload";

/// Reduce a client supplied file name to a safe ASCII name.
///
/// Path separators and whitespace become `_`, anything outside
/// `[A-Za-z0-9._-]` is dropped and leading or trailing `.`/`_` are trimmed.
pub fn secure_filename(name: &str) -> String {
    let joined = name
        .replace(['/', '\\'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        EMPTY_UPLOAD_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Unique name for an uploaded file: `<uuid>_<sanitized name>`
pub fn stored_name(original: &str) -> String {
    format!("{}_{}", Uuid::new_v4(), secure_filename(original))
}

/// Name of the normalized copy of a stored signature image
pub fn normalized_name(stored: &str) -> String {
    let stem = match stored.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => stored,
    };
    format!("mini_{}.png", stem)
}

/// Unique name for a signed output document
pub fn output_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("final_{}.pdf", &id[..8])
}

/// True when `name` is a single path component naming a file in its
/// directory. Dots inside a name are fine; only `.` and `..` themselves
/// refer elsewhere.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Name offered to the browser for the signed document
pub fn download_name(requested: Option<&str>) -> String {
    let name = requested.map(str::trim).unwrap_or_default();
    let name = if name.is_empty() {
        DEFAULT_DOWNLOAD_NAME
    } else {
        name
    };

    if name.to_lowercase().ends_with(".pdf") {
        name.to_string()
    } else {
        format!("{}.pdf", name)
    }
}

/// `Content-Disposition` value for an attachment, with an ASCII fallback
/// and the exact name in RFC 5987 encoding.
pub fn attachment_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}
