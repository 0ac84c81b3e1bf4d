//! A thread-safe cache of resolved variants. [`VariantCache`] provides concurrent access for
//! readers (variant lookups) and writers (fetches replacing the whole set).
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use crate::{storage::Storage, Result, Variant};

/// Snapshot of all resolved variants.
pub type Variants = HashMap<String, Variant>;

/// `VariantCache` owns the flag key to [`Variant`] mapping and decides when it is persisted.
///
/// Readers get an immutable snapshot. A replacement builds the new set off to the side and swaps
/// it in at once, so a reader observes either the old or the new set and never a partially
/// cleared one. Replacements are serialized with each other by the storage lock.
pub struct VariantCache {
    storage: Mutex<Box<dyn Storage>>,
    variants: RwLock<Arc<Variants>>,
}

impl VariantCache {
    /// Create an empty cache on top of `storage`. Call [`VariantCache::load`] to read persisted
    /// variants.
    pub fn new(storage: Box<dyn Storage>) -> Self {
        VariantCache {
            storage: Mutex::new(storage),
            variants: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Read persisted variants and make them current.
    pub fn load(&self) -> Result<()> {
        let mut storage = self
            .storage
            .lock()
            .expect("thread holding storage lock should not panic");

        storage.load()?;
        let loaded = Arc::new(storage.get_all());
        log::debug!(target: "skylab", count = loaded.len(); "loaded variants from storage");

        self.swap(loaded);
        Ok(())
    }

    /// Get the variant for `flag_key`, if one was resolved.
    pub fn get(&self, flag_key: &str) -> Option<Variant> {
        self.snapshot().get(flag_key).cloned()
    }

    /// Get the current set of variants. The snapshot is not affected by later replacements.
    pub fn snapshot(&self) -> Arc<Variants> {
        let variants = self
            .variants
            .read()
            .expect("thread holding variants lock should not panic");

        variants.clone()
    }

    /// Clear the cache and fill it with `variants`, then persist.
    ///
    /// The in-memory set is replaced even if persisting fails. The returned error only reports
    /// that storage may now lag behind memory until the next successful save.
    pub fn replace(&self, variants: Variants) -> Result<()> {
        let mut storage = self
            .storage
            .lock()
            .expect("thread holding storage lock should not panic");

        storage.clear();
        for (flag_key, variant) in &variants {
            storage.put(flag_key.clone(), variant.clone());
        }

        self.swap(Arc::new(variants));

        storage.save().inspect_err(|err| {
            log::warn!(target: "skylab", "failed to persist variants: {:?}", err);
        })
    }

    fn swap(&self, variants: Arc<Variants>) {
        let mut slot = self
            .variants
            .write()
            .expect("thread holding variants lock should not panic");

        *slot = variants;
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::VariantCache;
    use crate::{
        storage::{FileStorage, InMemoryStorage, Storage},
        Error, Result, Variant,
    };

    fn variants(entries: &[(&str, &str)]) -> HashMap<String, Variant> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), Variant::new(*value)))
            .collect()
    }

    #[test]
    fn replace_drops_previous_entries() {
        let cache = VariantCache::new(Box::new(InMemoryStorage::new()));

        cache
            .replace(variants(&[("a", "on"), ("b", "off")]))
            .unwrap();
        cache.replace(variants(&[("c", "treatment")])).unwrap();

        assert_eq!(*cache.snapshot(), variants(&[("c", "treatment")]));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn replace_writes_through_to_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variants.json");
        let cache = VariantCache::new(Box::new(FileStorage::new(&path)));

        cache
            .replace(variants(&[("a", "on"), ("b", "off")]))
            .unwrap();
        cache.replace(variants(&[("c", "treatment")])).unwrap();

        let mut reloaded = FileStorage::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.get_all(), variants(&[("c", "treatment")]));
    }

    #[test]
    fn load_reads_persisted_variants() {
        let mut storage = InMemoryStorage::new();
        storage.put("exp1".to_owned(), Variant::new("treatment"));
        let cache = VariantCache::new(Box::new(storage));

        assert_eq!(cache.get("exp1"), None);
        cache.load().unwrap();
        assert_eq!(cache.get("exp1"), Some(Variant::new("treatment")));
    }

    struct FailingSave(InMemoryStorage);

    impl Storage for FailingSave {
        fn load(&mut self) -> Result<()> {
            Ok(())
        }
        fn save(&mut self) -> Result<()> {
            Err(std::io::Error::other("read-only").into())
        }
        fn clear(&mut self) {
            self.0.clear()
        }
        fn get(&self, flag_key: &str) -> Option<Variant> {
            self.0.get(flag_key)
        }
        fn get_all(&self) -> HashMap<String, Variant> {
            self.0.get_all()
        }
        fn put(&mut self, flag_key: String, variant: Variant) {
            self.0.put(flag_key, variant)
        }
    }

    #[test]
    fn failed_save_keeps_in_memory_state() {
        let cache = VariantCache::new(Box::new(FailingSave(InMemoryStorage::new())));

        let result = cache.replace(variants(&[("a", "on")]));

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(cache.get("a"), Some(Variant::new("on")));
    }

    #[test]
    fn readers_never_observe_torn_state() {
        let cache = Arc::new(VariantCache::new(Box::new(InMemoryStorage::new())));
        let first = variants(&[("a", "1"), ("b", "1"), ("c", "1")]);
        let second = variants(&[("a", "2"), ("b", "2"), ("c", "2")]);
        cache.replace(first.clone()).unwrap();

        let writer = {
            let cache = cache.clone();
            let (first, second) = (first.clone(), second.clone());
            std::thread::spawn(move || {
                for i in 0..500 {
                    let next = if i % 2 == 0 { &second } else { &first };
                    cache.replace(next.clone()).unwrap();
                }
            })
        };

        for _ in 0..5_000 {
            let snapshot = cache.snapshot();
            assert!(*snapshot == first || *snapshot == second);
        }

        writer.join().unwrap();
    }
}
