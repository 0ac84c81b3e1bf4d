//! Persistence mechanism for resolved variants.
//!
//! [`Storage`] only supplies the mechanism. When to clear, fill and save is decided by the
//! [`VariantCache`](crate::variant_cache::VariantCache) that owns it.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{Error, Result, Variant};

/// Durable flag key to [`Variant`] mapping.
///
/// `put()` and `clear()` stage changes in memory. A following `save()` must make them durable
/// before it returns, or fail.
pub trait Storage: Send {
    /// Replace staged contents with the persisted ones.
    fn load(&mut self) -> Result<()>;

    /// Persist staged contents.
    fn save(&mut self) -> Result<()>;

    /// Remove all entries.
    fn clear(&mut self);

    /// Get the variant stored for `flag_key`.
    fn get(&self, flag_key: &str) -> Option<Variant>;

    /// Get a copy of all entries.
    fn get_all(&self) -> HashMap<String, Variant>;

    /// Insert or replace the variant for `flag_key`.
    fn put(&mut self, flag_key: String, variant: Variant);
}

/// [`Storage`] that never touches persistent media. `load()` and `save()` are no-ops.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    variants: HashMap<String, Variant>,
}

impl InMemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        InMemoryStorage::default()
    }
}

impl Storage for InMemoryStorage {
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear(&mut self) {
        self.variants.clear();
    }

    fn get(&self, flag_key: &str) -> Option<Variant> {
        self.variants.get(flag_key).cloned()
    }

    fn get_all(&self) -> HashMap<String, Variant> {
        self.variants.clone()
    }

    fn put(&mut self, flag_key: String, variant: Variant) {
        self.variants.insert(flag_key, variant);
    }
}

/// [`Storage`] that keeps variants in a JSON file.
///
/// A missing file loads as an empty set. Saves go through a temporary file that is renamed into
/// place, so the file is never observed half-written.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    variants: HashMap<String, Variant>,
}

impl FileStorage {
    /// Use the file at `path`. Nothing is read until [`Storage::load`] is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStorage {
            path: path.into(),
            variants: HashMap::new(),
        }
    }
}

impl Storage for FileStorage {
    fn load(&mut self) -> Result<()> {
        self.variants = match std::fs::read(&self.path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|err| Error::Storage(Arc::new(err)))?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        let bytes =
            serde_json::to_vec(&self.variants).map_err(|err| Error::Storage(Arc::new(err)))?;
        write_atomically(&self.path, &bytes)
    }

    fn clear(&mut self) {
        self.variants.clear();
    }

    fn get(&self, flag_key: &str) -> Option<Variant> {
        self.variants.get(flag_key).cloned()
    }

    fn get_all(&self) -> HashMap<String, Variant> {
        self.variants.clone()
    }

    fn put(&mut self, flag_key: String, variant: Variant) {
        self.variants.insert(flag_key, variant);
    }
}

/// Write `bytes` to a sibling temporary file and rename it over `path`.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{FileStorage, Storage};
    use crate::{Error, Variant};

    #[test]
    fn file_storage_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.json");

        let mut storage = FileStorage::new(&path);
        storage.put("exp1".to_owned(), Variant::new("treatment"));
        storage.put(
            "exp2".to_owned(),
            Variant::new("on").with_payload(json!({"limit": 3})),
        );
        storage.save().unwrap();

        let mut reloaded = FileStorage::new(&path);
        reloaded.load().unwrap();

        assert_eq!(reloaded.get_all(), storage.get_all());
        assert_eq!(reloaded.get("exp1"), Some(Variant::new("treatment")));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path().join("absent.json"));

        storage.load().unwrap();

        assert!(storage.get_all().is_empty());
    }

    #[test]
    fn corrupt_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = FileStorage::new(&path).load().unwrap_err();

        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn clear_then_save_empties_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.json");

        let mut storage = FileStorage::new(&path);
        storage.put("exp1".to_owned(), Variant::new("treatment"));
        storage.save().unwrap();
        storage.clear();
        storage.save().unwrap();

        let mut reloaded = FileStorage::new(&path);
        reloaded.load().unwrap();
        assert!(reloaded.get_all().is_empty());
    }
}
