//! Compressed output
//!
//! lopdf re-serializes every object it loaded, so unreachable objects,
//! repeated streams and uncompressed streams from the source file would
//! otherwise be carried into the signed copy.

use crate::error::StampError;
use lopdf::{Document, Object, ObjectId};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Point every reference to a byte-identical stream at its first copy and
/// drop the others. Returns the number of streams removed.
pub fn merge_duplicate_streams(doc: &mut Document) -> usize {
    let mut first_seen: HashMap<(String, &[u8]), ObjectId> = HashMap::new();
    let mut replacements: HashMap<ObjectId, ObjectId> = HashMap::new();

    for (id, object) in &doc.objects {
        if let Object::Stream(stream) = object {
            let key = (format!("{:?}", stream.dict), stream.content.as_slice());
            match first_seen.get(&key) {
                Some(&kept) => {
                    replacements.insert(*id, kept);
                }
                None => {
                    first_seen.insert(key, *id);
                }
            }
        }
    }
    drop(first_seen);

    if replacements.is_empty() {
        return 0;
    }

    for object in doc.objects.values_mut() {
        redirect(object, &replacements);
    }
    for (_, value) in doc.trailer.iter_mut() {
        redirect(value, &replacements);
    }
    for id in replacements.keys() {
        doc.objects.remove(id);
    }
    replacements.len()
}

fn redirect(object: &mut Object, replacements: &HashMap<ObjectId, ObjectId>) {
    match object {
        Object::Reference(id) => {
            if let Some(kept) = replacements.get(id) {
                *id = *kept;
            }
        }
        Object::Array(items) => {
            for item in items.iter_mut() {
                redirect(item, replacements);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                redirect(value, replacements);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                redirect(value, replacements);
            }
        }
        _ => {}
    }
}

/// Merge repeated streams, drop unreachable objects and empty streams,
/// Flate-compress every unfiltered stream and renumber what is left.
pub fn compress_document(doc: &mut Document) {
    let merged = merge_duplicate_streams(doc);
    let pruned = doc.prune_objects();
    let emptied = doc.delete_zero_length_streams();
    doc.compress();
    doc.renumber_objects();

    debug!(
        "Merged {} duplicate streams, pruned {} unreachable objects, removed {} empty streams",
        merged,
        pruned.len(),
        emptied.len()
    );
}

/// Compress and write the document to `path`
pub fn save_compressed(doc: &mut Document, path: &Path) -> Result<(), StampError> {
    compress_document(doc);
    doc.save(path)
        .map_err(|e| StampError::SaveError(format!("{}: {}", path.display(), e)))?;
    Ok(())
}
