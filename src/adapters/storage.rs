use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use crate::ports::storage::{BucketRecord, BucketStore, StorageError, StorageResult};

/// Single-file JSON store for per-client bucket snapshots.
///
/// The document is one top-level object mapping client ID to record, written
/// pretty-printed. Every operation is a read-modify-write of the whole file
/// under an internal lock; the file is small (one record per known client)
/// so this stays cheap.
pub struct FileStore {
    file_path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open or create the state file.
    ///
    /// A missing file is created and seeded with `{}`. A directory path or a
    /// non-empty file that does not parse as JSON fails construction.
    pub fn new(file_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let file_path = file_path.into();

        match fs::metadata(&file_path) {
            Ok(meta) if meta.is_dir() => return Err(StorageError::PathIsDirectory),
            Ok(meta) => {
                if meta.len() > 0 {
                    let data = fs::read(&file_path)?;
                    serde_json::from_slice::<serde_json::Value>(&data)?;
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::write(&file_path, b"{}")?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            file_path,
            lock: Mutex::new(()),
        })
    }

    fn read_map(&self) -> StorageResult<HashMap<String, BucketRecord>> {
        let data = match fs::read(&self.file_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    fn write_map(&self, map: &HashMap<String, BucketRecord>) -> StorageResult<()> {
        let data = serde_json::to_vec_pretty(map)?;
        fs::write(&self.file_path, data)?;
        Ok(())
    }
}

impl BucketStore for FileStore {
    fn save(&self, client_id: &str, record: &BucketRecord) -> StorageResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map()?;
        map.insert(client_id.to_string(), record.clone());
        self.write_map(&map)
    }

    fn load_all(&self) -> StorageResult<HashMap<String, BucketRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_map()
    }

    fn delete(&self, client_id: &str) -> StorageResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map()?;
        map.remove(client_id);
        self.write_map(&map)
    }
}
