use std::collections::HashMap;

use parking_lot::Mutex;

/// The three durable entries a session persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CredentialKey {
    #[display("access_token")]
    AccessToken,
    #[display("refresh_token")]
    RefreshToken,
    /// Serialized [`UserProfile`](crate::UserProfile) JSON.
    #[display("user")]
    User,
}

/// Durable key/value persistence for session credentials.
///
/// Only the [`Session`](crate::Session) writes to it. Entries are never removed
/// one at a time: [`clear`](CredentialStore::clear) drops all three together.
///
/// # Example
///
/// ```rust,ignore
/// struct KeyringStore { service: String }
///
/// impl CredentialStore for KeyringStore {
///     fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError> { ... }
///     fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError> { ... }
///     fn clear(&self) -> Result<(), StoreError> { ... }
/// }
/// ```
pub trait CredentialStore: Send + Sync + 'static {
    fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError>;

    fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError>;

    /// Remove every entry. Must succeed on an empty store.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Failure reported by a [`CredentialStore`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

/// Process-local store. Survives session handles, not process restarts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<CredentialKey, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(&key).cloned())
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key, value.to_owned());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.entries.lock().clear();
        Ok(())
    }
}

#[cfg(feature = "file-store")]
pub use file::FileStore;

#[cfg(feature = "file-store")]
mod file {
    use std::io::Write;
    use std::path::{Path, PathBuf};

    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};

    use super::{CredentialKey, CredentialStore, StoreError};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Document {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    }

    impl Document {
        fn slot(&mut self, key: CredentialKey) -> &mut Option<String> {
            match key {
                CredentialKey::AccessToken => &mut self.access_token,
                CredentialKey::RefreshToken => &mut self.refresh_token,
                CredentialKey::User => &mut self.user,
            }
        }
    }

    /// Credentials kept in a single JSON file.
    ///
    /// Writes go to a temporary file in the same directory which is then renamed
    /// over the target, so a crash never leaves a half-written document.
    #[derive(Debug)]
    pub struct FileStore {
        path: PathBuf,
        // Serializes read-modify-write cycles within this process.
        lock: Mutex<()>,
    }

    impl FileStore {
        /// Use `path` as the credential file. It is created on first write.
        #[must_use]
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                lock: Mutex::new(()),
            }
        }

        /// The store at the config's credential path, if one is set.
        #[must_use]
        pub fn from_config(config: &crate::ClientConfig) -> Option<Self> {
            config.credentials_path().map(Self::new)
        }

        #[must_use]
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn read(&self) -> Result<Document, StoreError> {
            match std::fs::read(&self.path) {
                Ok(bytes) if bytes.is_empty() => Ok(Document::default()),
                Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::default()),
                Err(e) => Err(e.into()),
            }
        }

        fn write(&self, doc: &Document) -> Result<(), StoreError> {
            let parent = match self.path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(parent)?;
            let mut temp = tempfile::NamedTempFile::new_in(parent)?;
            serde_json::to_writer_pretty(&mut temp, doc)?;
            temp.flush()?;
            temp.persist(&self.path).map_err(|e| StoreError(e.to_string()))?;
            Ok(())
        }
    }

    impl CredentialStore for FileStore {
        fn get(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
            let _guard = self.lock.lock();
            Ok(self.read()?.slot(key).take())
        }

        fn set(&self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
            let _guard = self.lock.lock();
            let mut doc = self.read()?;
            *doc.slot(key) = Some(value.to_owned());
            self.write(&doc)
        }

        fn clear(&self) -> Result<(), StoreError> {
            let _guard = self.lock.lock();
            match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }
}
