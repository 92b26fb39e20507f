//! Small filesystem helpers shared by the file-backed stores.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{BridgeError, Result};

/// Replace `path` with `contents` so readers see either the old or the new
/// file, never a partial one.
///
/// The data is written to a sibling temp file, synced, then renamed over
/// the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| BridgeError::StorageError(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)
        .map_err(|e| BridgeError::StorageError(format!("Failed to create directory: {}", e)))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(BridgeError::StorageError(format!(
            "Failed to write {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}
