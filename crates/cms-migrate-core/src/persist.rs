//! Atomic persistence of run artifacts.
//!
//! Writes go to a temp file next to the destination, are synced to disk and
//! then renamed over the destination, so readers never see a partial file.

use crate::{MigrateError, Result};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use tracing::debug;

fn io_error(message: String, path: &Path, source: std::io::Error) -> MigrateError {
    MigrateError::Io {
        message,
        path: Some(path.to_path_buf()),
        source: Some(source),
    }
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(data).map_err(|e| MigrateError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;
    write_text_atomic(path, &serialized)
}

/// Write `contents` to `path` atomically, creating parent directories.
pub fn write_text_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| io_error(format!("Failed to create directory {}", parent.display()), parent, e))?;
    }

    let temp_path = temp_path_for(path);
    let written = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| io_error(format!("Failed to create temp file {}", temp_path.display()), &temp_path, e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| io_error(format!("Failed to write temp file {}", temp_path.display()), &temp_path, e))?;
        file.flush()
            .map_err(|e| io_error(format!("Failed to flush temp file {}", temp_path.display()), &temp_path, e))?;
        file.sync_all()
            .map_err(|e| io_error(format!("Failed to sync temp file {}", temp_path.display()), &temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| {
            io_error(
                format!("Failed to rename {} to {}", temp_path.display(), path.display()),
                path,
                e,
            )
        })
    })();

    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written?;
    debug!("Atomically wrote {}", path.display());
    Ok(())
}

/// Companion text path for a JSON report (`report.json` -> `report.txt`).
pub fn text_companion(path: &Path) -> PathBuf {
    path.with_extension("txt")
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{}.{}.{}.tmp", name, process::id(), uuid::Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Snapshot {
        migrated: u32,
        label: String,
    }

    #[test]
    fn test_json_write_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let data = Snapshot { migrated: 8, label: "first".into() };

        write_json_atomic(&path, &data).unwrap();

        let stored: Snapshot = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, data);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.txt");

        write_text_atomic(&path, "one").unwrap();
        write_text_atomic(&path, "two").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn test_text_companion() {
        assert_eq!(text_companion(Path::new("out/report.json")), PathBuf::from("out/report.txt"));
    }
}
