//! JSON-file backend for alert records

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{state_key, AlertState, AlertStateStore, StateError};

const EXTENSION: &str = "state.json";

/// One JSON file per alerting check under a state directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open a store, creating the directory if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StateError> {
        fs::create_dir_all(dir.as_ref())?;

        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    /// Open a store only if its directory already exists
    pub fn existing<P: AsRef<Path>>(dir: P) -> Option<Self> {
        let dir = dir.as_ref();
        dir.is_dir().then(|| Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the file path for a check
    fn key_path(&self, check: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", state_key(check), EXTENSION))
    }

    fn read_record(path: &Path) -> Result<AlertState, StateError> {
        let data = fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| StateError::Deserialization(e.to_string()))
    }
}

impl AlertStateStore for FileStateStore {
    fn load(&self, check: &str) -> Result<Option<AlertState>, StateError> {
        let path = self.key_path(check);

        if !path.exists() {
            return Ok(None);
        }

        let state = Self::read_record(&path)?;
        if state.check != check {
            return Err(StateError::Corrupted(format!(
                "{} holds state for '{}', expected '{}'",
                path.display(),
                state.check,
                check
            )));
        }

        Ok(Some(state))
    }

    fn save(&self, state: &AlertState) -> Result<(), StateError> {
        let path = self.key_path(&state.check);
        let tmp_path = path.with_extension("tmp");

        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::Serialization(e.to_string()))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        file.write_all(&data)?;
        file.sync_all()?;

        // Rename is atomic on the same filesystem
        fs::rename(&tmp_path, &path)?;

        Ok(())
    }

    fn clear(&self, check: &str) -> Result<bool, StateError> {
        let path = self.key_path(check);

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<AlertState>, StateError> {
        let mut states = Vec::new();
        let suffix = format!(".{}", EXTENSION);

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();

            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&suffix))
                .unwrap_or(false);

            if is_record {
                states.push(Self::read_record(&path)?);
            }
        }

        states.sort_by(|a, b| a.check.cmp(&b.check));
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_file_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStateStore::new(temp_dir.path()).unwrap();

        let state = AlertState::new("Sandbox Server_10.0.0.27", Utc::now());
        store.save(&state).unwrap();

        let loaded = store.load("Sandbox Server_10.0.0.27").unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(store.load("other").unwrap().is_none());
    }

    #[test]
    fn test_file_creates_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("flags");
        let store = FileStateStore::new(&dir).unwrap();

        store.save(&AlertState::new("web", Utc::now())).unwrap();
        assert!(store.key_path("web").exists());
        assert!(store.key_path("web").starts_with(&dir));
    }

    #[test]
    fn test_file_existing_does_not_create_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("flags");

        assert!(FileStateStore::existing(&dir).is_none());
        assert!(!dir.exists());

        std::fs::create_dir(&dir).unwrap();
        let store = FileStateStore::existing(&dir).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_file_similar_names_keep_separate_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStateStore::new(temp_dir.path()).unwrap();

        let round = AlertState::new("DB (primary)_10.0.0.5", Utc::now());
        let square = AlertState::new("DB [primary]_10.0.0.5", Utc::now());
        store.save(&round).unwrap();
        store.save(&square).unwrap();

        assert_eq!(store.load("DB (primary)_10.0.0.5").unwrap(), Some(round));
        assert_eq!(store.load("DB [primary]_10.0.0.5").unwrap(), Some(square));
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_file_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStateStore::new(temp_dir.path()).unwrap();

        store.save(&AlertState::new("web", Utc::now())).unwrap();
        assert!(store.clear("web").unwrap());
        assert!(!store.clear("web").unwrap());
        assert!(store.load("web").unwrap().is_none());
    }

    #[test]
    fn test_file_list_ignores_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStateStore::new(temp_dir.path()).unwrap();

        store.save(&AlertState::new("a", Utc::now())).unwrap();
        store.save(&AlertState::new("b", Utc::now())).unwrap();
        std::fs::write(temp_dir.path().join("old.flag"), b"").unwrap();

        let states = store.list().unwrap();
        let names: Vec<&str> = states.iter().map(|s| s.check.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_file_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStateStore::new(temp_dir.path()).unwrap();

        std::fs::write(store.key_path("web"), b"not json").unwrap();
        assert!(matches!(
            store.load("web"),
            Err(StateError::Deserialization(_))
        ));
    }
}
