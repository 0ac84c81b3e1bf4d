//! Anonymous enrollment identity that survives process restarts.
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{storage::write_atomically, Error, Result};

/// Name of the storage slot holding the enrollment id.
pub const ENROLLMENT_ID_KEY: &str = "com.amplitude.flags.enrollmentId";

const ENROLLMENT_ID_LENGTH: usize = 25;
const ENROLLMENT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Client-generated anonymous identity: 25 lowercase alphanumeric characters.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display, derive_more::Into,
)]
#[serde(transparent)]
pub struct EnrollmentId(String);

impl EnrollmentId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EnrollmentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generate a fresh enrollment id, drawing each character uniformly from `[a-z0-9]`.
pub fn generate_enrollment_id(rng: &mut impl Rng) -> EnrollmentId {
    let id = (0..ENROLLMENT_ID_LENGTH)
        .map(|_| ENROLLMENT_ID_ALPHABET[rng.gen_range(0..ENROLLMENT_ID_ALPHABET.len())] as char)
        .collect();
    EnrollmentId(id)
}

/// Process-wide durable string slots. Used to keep the enrollment id across restarts.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Durably store `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }
}

/// A [`KeyValueStore`] that only lives as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        InMemoryKeyValueStore::default()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .expect("thread holding key-value lock should not panic");
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .expect("thread holding key-value lock should not panic");
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// A [`KeyValueStore`] backed by a JSON object file.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    /// Use the file at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileKeyValueStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| Error::Storage(Arc::new(err))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .expect("thread holding key-value lock should not panic");
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .expect("thread holding key-value lock should not panic");
        let mut values = self.read_all()?;
        values.insert(key.to_owned(), value.to_owned());
        let bytes = serde_json::to_vec(&values).map_err(|err| Error::Storage(Arc::new(err)))?;
        write_atomically(&self.path, &bytes)
    }
}

/// Lazily creates and persists the [`EnrollmentId`].
///
/// The id is read from the [`ENROLLMENT_ID_KEY`] slot once and cached. Only an empty slot gets a
/// newly generated id written to it. A failed write does not prevent the id from being used: it
/// stays in memory for the rest of the process and the write is retried on the next call.
///
/// If the slot cannot be read, a session-only id is used and nothing is written. The read is
/// retried on the next call, and a stored id found then replaces the session one.
pub struct IdentityStore {
    storage: Arc<dyn KeyValueStore>,
    state: Mutex<Option<CachedId>>,
}

struct CachedId {
    id: EnrollmentId,
    persistence: Persistence,
}

enum Persistence {
    Stored,
    Unwritten,
    Unread,
}

impl IdentityStore {
    /// Create an identity store on top of `storage`.
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        IdentityStore {
            storage,
            state: Mutex::new(None),
        }
    }

    /// Return the enrollment id, generating and storing one if none exists yet.
    pub fn get_or_create_enrollment_id(&self) -> EnrollmentId {
        let mut state = self
            .state
            .lock()
            .expect("thread holding identity lock should not panic");

        let cached = match state.take() {
            Some(
                cached @ CachedId {
                    persistence: Persistence::Stored,
                    ..
                },
            ) => cached,
            Some(CachedId {
                id,
                persistence: Persistence::Unwritten,
            }) => self.persist(id),
            session => match self.storage.get(ENROLLMENT_ID_KEY) {
                Ok(Some(stored)) => CachedId {
                    id: EnrollmentId(stored),
                    persistence: Persistence::Stored,
                },
                Ok(None) => {
                    let id = session.map_or_else(generate, |cached| cached.id);
                    self.persist(id)
                }
                Err(err) => {
                    log::warn!(target: "skylab", "failed to read enrollment id: {:?}", err);
                    CachedId {
                        id: session.map_or_else(generate, |cached| cached.id),
                        persistence: Persistence::Unread,
                    }
                }
            },
        };

        let id = cached.id.clone();
        *state = Some(cached);
        id
    }

    fn persist(&self, id: EnrollmentId) -> CachedId {
        let persistence = match self.storage.set(ENROLLMENT_ID_KEY, id.as_str()) {
            Ok(()) => Persistence::Stored,
            Err(err) => {
                log::warn!(target: "skylab", "failed to store enrollment id: {:?}", err);
                Persistence::Unwritten
            }
        };
        CachedId { id, persistence }
    }
}

fn generate() -> EnrollmentId {
    let id = generate_enrollment_id(&mut rand::thread_rng());
    log::debug!(target: "skylab", enrollment_id = id.as_str(); "generated enrollment id");
    id
}
