/// Persistence backends for choice-group progress.
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialization error: {0}")]
    RonWrite(#[from] ron::Error),
}

/// Synchronous string key-value surface. Last write wins.
pub trait Store {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Vec<String>;

    /// Remove every key starting with `prefix`; returns how many went.
    fn clear_prefix(&mut self, prefix: &str) -> Result<usize, StoreError> {
        let doomed: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        for key in &doomed {
            self.remove(key)?;
        }
        Ok(doomed.len())
    }
}

/// In-memory store; the default for a stage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: FxHashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Store persisted as a RON map, rewritten on every change.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: &Path) -> Result<FileStore, StoreError> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                ron::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(FileStore {
            path: path.to_path_buf(),
            entries,
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let contents = ron::ser::to_string_pretty(&self.entries, ron::ser::PrettyConfig::default())?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}
