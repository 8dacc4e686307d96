//! Signature image handling
//!
//! Uploaded signatures are normalized once per signing request: converted to
//! RGBA, capped at [`MAX_SIGNATURE_WIDTH`] pixels wide and re-encoded as a
//! compact PNG. The normalized file is then decoded into raw RGB and alpha
//! planes for embedding as an image XObject.

use crate::error::StampError;
use flate2::{write::ZlibEncoder, Compression};
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use lopdf::{dictionary, Object, Stream};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Widest signature kept after normalization, in pixels
pub const MAX_SIGNATURE_WIDTH: u32 = 400;

/// Decode an image, detecting the format from its contents rather than the
/// client supplied extension
fn decode_image(path: &Path) -> Result<DynamicImage, StampError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| StampError::ImageError(format!("{}: {}", path.display(), e)))
}

/// Downscale and re-encode a signature image.
///
/// Images narrower than `max_width` keep their size but are still converted
/// to RGBA PNG.
pub fn normalize_signature(
    original: &Path,
    output: &Path,
    max_width: u32,
) -> Result<(), StampError> {
    let img = DynamicImage::ImageRgba8(decode_image(original)?.to_rgba8());

    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(StampError::ImageError("Signature image is empty".into()));
    }

    let img = if width > max_width {
        let scaled_height = ((height as f64) * (max_width as f64 / width as f64)) as u32;
        img.resize_exact(max_width, scaled_height.max(1), FilterType::Lanczos3)
    } else {
        img
    };

    let file = File::create(output)?;
    let mut writer = BufWriter::new(file);
    let encoder =
        PngEncoder::new_with_quality(&mut writer, CompressionType::Best, PngFilter::Adaptive);
    img.write_with_encoder(encoder)
        .map_err(|e| StampError::ImageError(format!("Failed to encode PNG: {}", e)))?;
    writer.flush()?;

    debug!(
        "Normalized signature {}x{} -> {}x{}",
        width,
        height,
        img.width(),
        img.height()
    );
    Ok(())
}

/// Normalize a signature, falling back to the original file on any failure
pub fn normalize_or_original(original: &Path, output: &Path) -> PathBuf {
    match normalize_signature(original, output, MAX_SIGNATURE_WIDTH) {
        Ok(()) => output.to_path_buf(),
        Err(e) => {
            warn!(
                "Could not normalize signature {}, using original: {}",
                original.display(),
                e
            );
            original.to_path_buf()
        }
    }
}

/// Decoded signature ready to be embedded in a PDF
#[derive(Debug, Clone)]
pub struct SignatureImage {
    pub width: u32,
    pub height: u32,
    rgb: Vec<u8>,
    /// `None` when every pixel is fully opaque
    alpha: Option<Vec<u8>>,
}

impl SignatureImage {
    pub fn open(path: &Path) -> Result<Self, StampError> {
        Ok(Self::from_image(&decode_image(path)?))
    }

    pub fn from_image(img: &DynamicImage) -> Self {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha = Vec::with_capacity((width * height) as usize);
        for pixel in rgba.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }

        let alpha = if alpha.iter().all(|&a| a == 255) {
            None
        } else {
            Some(alpha)
        };

        Self {
            width,
            height,
            rgb,
            alpha,
        }
    }

    /// Height over width, used to derive the placed height from the width
    pub fn aspect_ratio(&self) -> Result<f64, StampError> {
        if self.width == 0 || self.height == 0 {
            return Err(StampError::ImageError(format!(
                "Signature image has zero size ({}x{})",
                self.width, self.height
            )));
        }
        Ok(self.height as f64 / self.width as f64)
    }

    /// Build the image XObject stream and, when the image is translucent,
    /// its soft mask. The caller links the mask via `/SMask`.
    pub fn to_streams(&self) -> Result<(Stream, Option<Stream>), StampError> {
        let image = image_stream(&self.rgb, self.width, self.height, "DeviceRGB")?;
        let mask = match &self.alpha {
            Some(alpha) => Some(image_stream(alpha, self.width, self.height, "DeviceGray")?),
            None => None,
        };
        Ok((image, mask))
    }
}

fn image_stream(
    samples: &[u8],
    width: u32,
    height: u32,
    color_space: &str,
) -> Result<Stream, StampError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(samples)?;
    let compressed = encoder.finish()?;

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => Object::Name(color_space.as_bytes().to_vec()),
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };

    let mut stream = Stream::new(dict, compressed);
    stream.allows_compression = false;
    Ok(stream)
}
