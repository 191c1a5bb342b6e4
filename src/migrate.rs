//! One-time import of the legacy flat-file dump.
//!
//! Older releases kept all state in `<dir>/.feed_bloc.json`: one JSON object
//! mapping each storage key to a JSON-encoded string. The import copies every
//! entry that still decodes into the new storage and removes the file.

use std::path::Path;
use tracing::{debug, info, warn};

use crate::normalize::{Json, JsonMap};
use crate::storage::Storage;

/// Name of the legacy dump file inside the storage directory.
pub const LEGACY_FILE_NAME: &str = ".feed_bloc.json";

/// Import the legacy dump in `dir` into `storage`, if there is one.
///
/// Entries whose value is not a string holding valid JSON are skipped. A
/// file that is not a JSON object imports nothing. The file is deleted
/// whenever it existed. Returns the number of imported entries.
pub async fn import_legacy(dir: &Path, storage: &Storage) -> usize {
    let path = dir.join(LEGACY_FILE_NAME);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("Failed to read legacy file {:?}: {}", path, e);
            remove(&path).await;
            return 0;
        }
    };

    info!("Importing legacy state from {:?}", path);
    let mut imported = 0;
    match serde_json::from_str::<JsonMap>(&contents) {
        Ok(entries) => {
            for (key, encoded) in entries {
                let Some(value) = decode_entry(&encoded) else {
                    warn!("Skipping legacy entry {:?}: value is not encoded JSON", key);
                    continue;
                };
                match storage.write(&key, &value).await {
                    Ok(()) => imported += 1,
                    Err(e) => warn!("Skipping legacy entry {:?}: {}", key, e),
                }
            }
        }
        Err(e) => warn!("Ignoring malformed legacy file {:?}: {}", path, e),
    }

    remove(&path).await;
    info!("Imported {} legacy entries", imported);
    imported
}

fn decode_entry(encoded: &Json) -> Option<Json> {
    serde_json::from_str(encoded.as_str()?).ok()
}

async fn remove(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed legacy file {:?}", path),
        Err(e) => warn!("Failed to remove legacy file {:?}: {}", path, e),
    }
}
