//! One JSON file per instance
//!
//! ```text
//! {dir}/
//! ├── {instance_id}.json    # {"data": <envelope>}
//! └── ...
//! ```

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::envelope::{Envelope, FileDocument};
use crate::error::{StoreError, StoreResult};
use crate::record::InstanceRecord;
use crate::store::StateBackend;

const EXTENSION: &str = "json";

/// Directory-backed instance storage
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open or create a store directory
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(?dir, "Opened file backend");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding an instance
    pub fn instance_path(&self, instance_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", instance_id, EXTENSION))
    }
}

impl StateBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn write(&self, record: &InstanceRecord) -> StoreResult<()> {
        let document = FileDocument {
            data: Envelope::from_record(record)?,
        };
        let json = serde_json::to_string(&document).map_err(|source| StoreError::Encode {
            instance_id: record.instance_id.clone(),
            source,
        })?;
        atomic_write(&self.instance_path(&record.instance_id), json.as_bytes())?;
        Ok(())
    }

    fn read(&self, instance_id: &str) -> StoreResult<Option<InstanceRecord>> {
        let path = self.instance_path(instance_id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let document: FileDocument = serde_json::from_str(&text).map_err(|e| StoreError::decode(instance_id, e))?;
        document.data.into_record().map(Some)
    }

    fn read_all(&self) -> StoreResult<Vec<InstanceRecord>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(instance_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read(instance_id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!(?path, "read_all: file vanished"),
                Err(e) if e.is_decode() => warn!(?path, error = %e, "Skipping unreadable instance file"),
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    fn delete(&self, instance_id: &str) -> StoreResult<()> {
        match fs::remove_file(self.instance_path(instance_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(%instance_id, "delete: no file to remove");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Write to a unique temp file in the same directory, fsync, then rename
/// over the target so readers never see a partial document.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("instance"),
        Uuid::now_v7()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExpirySpec;
    use crate::state_map;
    use tempfile::TempDir;

    #[test]
    fn test_file_layout() {
        let temp = TempDir::new().unwrap();
        let backend = FileBackend::open(temp.path()).unwrap();
        let record = InstanceRecord::new("abc", state_map! { "step" => 1 }, 1).with_timeout(ExpirySpec::hours(1));
        backend.write(&record).unwrap();

        let text = fs::read_to_string(temp.path().join("abc.json")).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw["data"]["instance_id"], "abc");
        assert_eq!(raw["data"]["step"], 1);
        assert_eq!(raw["data"]["timeout"]["hours"], 1);
        assert!(raw["data"]["state"].is_string());
        assert!(raw["data"]["time"].is_string());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp = TempDir::new().unwrap();
        let backend = FileBackend::open(temp.path()).unwrap();
        backend.write(&InstanceRecord::new("abc", state_map! {}, 1)).unwrap();
        backend.write(&InstanceRecord::new("abc", state_map! {}, 2)).unwrap();

        let names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["abc.json"]);
    }

    #[test]
    fn test_open_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("instances");
        let backend = FileBackend::open(&dir).unwrap();
        assert!(dir.is_dir());
        assert!(backend.read("missing").unwrap().is_none());
    }

    #[test]
    fn test_read_all_skips_garbage_and_other_files() {
        let temp = TempDir::new().unwrap();
        let backend = FileBackend::open(temp.path()).unwrap();
        backend.write(&InstanceRecord::new("good", state_map! {}, 1)).unwrap();
        fs::write(temp.path().join("broken.json"), "{\"data\": ").unwrap();
        fs::write(temp.path().join("notes.txt"), "hello").unwrap();

        let records = backend.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].instance_id, "good");
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        let backend = FileBackend::open(temp.path()).unwrap();
        assert!(backend.delete("never-saved").is_ok());
    }
}
