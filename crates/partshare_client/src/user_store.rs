//! Local persistence of user records and registration flags.

use crate::error::UserStoreResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Local record kept for each session identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Username the identity authenticated with.
    pub username: String,
    /// Optional email.
    #[serde(default)]
    pub email: Option<String>,
    /// Owner segment of the partition shared with this user.
    #[serde(default)]
    pub shared_partition_path: Option<String>,
}

impl UserRecord {
    /// Creates a record with no shared partition.
    pub fn new(username: impl Into<String>, email: Option<String>) -> Self {
        Self {
            username: username.into(),
            email,
            shared_partition_path: None,
        }
    }
}

/// Persistence for [`UserRecord`]s and the set of registered usernames.
pub trait UserStore: Send + Sync {
    /// Loads the record of an identity.
    fn load(&self, identity: &str) -> UserStoreResult<Option<UserRecord>>;

    /// Stores the record of an identity.
    fn save(&self, identity: &str, record: &UserRecord) -> UserStoreResult<()>;

    /// Returns true if `username` is known to be registered with the store.
    fn registered(&self, username: &str) -> UserStoreResult<bool>;

    /// Remembers that `username` is registered with the store.
    fn mark_registered(&self, username: &str) -> UserStoreResult<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct UserFile {
    #[serde(default)]
    users: BTreeMap<String, UserRecord>,
    #[serde(default)]
    registered: BTreeSet<String>,
}

/// In-memory user store.
#[derive(Default)]
pub struct MemoryUserStore {
    file: Mutex<UserFile>,
}

impl MemoryUserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryUserStore {
    fn load(&self, identity: &str) -> UserStoreResult<Option<UserRecord>> {
        Ok(self.file.lock().users.get(identity).cloned())
    }

    fn save(&self, identity: &str, record: &UserRecord) -> UserStoreResult<()> {
        self.file
            .lock()
            .users
            .insert(identity.to_string(), record.clone());
        Ok(())
    }

    fn registered(&self, username: &str) -> UserStoreResult<bool> {
        Ok(self.file.lock().registered.contains(username))
    }

    fn mark_registered(&self, username: &str) -> UserStoreResult<()> {
        self.file.lock().registered.insert(username.to_string());
        Ok(())
    }
}

/// User store backed by one JSON file.
///
/// Every change rewrites the file through a temporary sibling and a rename,
/// so readers never observe a partial document.
pub struct FileUserStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileUserStore {
    /// File name used inside the state directory.
    pub const FILE_NAME: &'static str = "users.json";

    /// Opens the store in `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> UserStoreResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(Self::FILE_NAME),
            lock: Mutex::new(()),
        })
    }

    /// Returns the path of the JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> UserStoreResult<UserFile> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(UserFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, file: &UserFile) -> UserStoreResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut out, file)?;
            out.write_all(b"\n")?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut UserFile)) -> UserStoreResult<()> {
        let _guard = self.lock.lock();
        let mut file = self.read()?;
        f(&mut file);
        self.write(&file)
    }
}

impl UserStore for FileUserStore {
    fn load(&self, identity: &str) -> UserStoreResult<Option<UserRecord>> {
        let _guard = self.lock.lock();
        Ok(self.read()?.users.get(identity).cloned())
    }

    fn save(&self, identity: &str, record: &UserRecord) -> UserStoreResult<()> {
        self.update(|file| {
            file.users.insert(identity.to_string(), record.clone());
        })
    }

    fn registered(&self, username: &str) -> UserStoreResult<bool> {
        let _guard = self.lock.lock();
        Ok(self.read()?.registered.contains(username))
    }

    fn mark_registered(&self, username: &str) -> UserStoreResult<()> {
        self.update(|file| {
            file.registered.insert(username.to_string());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UserStoreError;
    use tempfile::tempdir;

    fn exercise(store: &dyn UserStore) {
        assert_eq!(store.load("abc").unwrap(), None);

        let mut record = UserRecord::new("user2", Some("user2@123.nl".into()));
        store.save("abc", &record).unwrap();
        assert_eq!(store.load("abc").unwrap(), Some(record.clone()));

        record.shared_partition_path = Some("def".into());
        store.save("abc", &record).unwrap();
        assert_eq!(
            store.load("abc").unwrap().unwrap().shared_partition_path.as_deref(),
            Some("def")
        );

        assert!(!store.registered("user2").unwrap());
        store.mark_registered("user2").unwrap();
        store.mark_registered("user2").unwrap();
        assert!(store.registered("user2").unwrap());
    }

    #[test]
    fn memory_store() {
        exercise(&MemoryUserStore::new());
    }

    #[test]
    fn file_store() {
        let dir = tempdir().unwrap();
        let store = FileUserStore::open(dir.path()).unwrap();
        exercise(&store);
        assert!(!dir.path().join("users.json.tmp").exists());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileUserStore::open(dir.path()).unwrap();
            store
                .save("abc", &UserRecord::new("user1", None))
                .unwrap();
            store.mark_registered("user1").unwrap();
        }

        let store = FileUserStore::open(dir.path()).unwrap();
        assert_eq!(store.load("abc").unwrap().unwrap().username, "user1");
        assert!(store.registered("user1").unwrap());
    }

    #[test]
    fn file_store_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("state").join("partshare");
        let store = FileUserStore::open(&nested).unwrap();
        store.mark_registered("user1").unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let store = FileUserStore::open(dir.path()).unwrap();
        fs::write(store.path(), b"{ not json").unwrap();
        assert!(matches!(store.load("abc"), Err(UserStoreError::Json(_))));
    }
}
