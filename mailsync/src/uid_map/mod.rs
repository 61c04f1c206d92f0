//! Module dedicated to the UID mapping store.
//!
//! The store persists, for every folder of an account, the bijection
//! between local message identities and remote UIDs, together with
//! the UID validity it was built for. Each folder lives in its own
//! SQLite database, and saves happen in a single transaction so that
//! a crash never leaves a half-written mapping behind.
//!
//! A folder mapping can only be opened once at a time: this is what
//! prevents two passes over the same folder from running
//! concurrently.

mod map;

use std::{
    collections::HashMap,
    fs, io, mem,
    path::{Path, PathBuf},
    result,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};

use crate::{flag::Flags, ErrorKind};

#[doc(inline)]
pub use self::map::{UidMap, UidMapEntry};

const INIT_QUERY: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS uid_map (
        local_id TEXT NOT NULL UNIQUE,
        remote_id TEXT NOT NULL UNIQUE,
        uid_validity INTEGER NOT NULL,
        flags TEXT NOT NULL DEFAULT ''
    );
";

const UID_VALIDITY_KEY: &str = "uid_validity";

/// Errors related to the UID mapping store.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot create uid map directory at {1}")]
    CreateDirError(#[source] io::Error, PathBuf),
    #[error("cannot open uid map database at {1}")]
    OpenDbError(#[source] rusqlite::Error, PathBuf),
    #[error("cannot remove corrupted uid map database at {1}")]
    RemoveDbError(#[source] io::Error, PathBuf),
    #[error("cannot read uid map of folder {1}")]
    ReadError(#[source] rusqlite::Error, String),
    #[error("cannot save uid map of folder {1}")]
    SaveError(#[source] rusqlite::Error, String),
    #[error("cannot invalidate uid map of folder {1}")]
    InvalidateError(#[source] rusqlite::Error, String),
    #[error("uid map of folder {0} is already in use")]
    FolderBusyError(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OpenDbError(..) | Self::ReadError(..) => ErrorKind::CorruptState,
            Self::CreateDirError(err, _) | Self::RemoveDbError(err, _)
                if err.kind() == io::ErrorKind::PermissionDenied =>
            {
                ErrorKind::Permission
            }
            _ => ErrorKind::Other,
        }
    }
}

/// The `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The UID mapping store of one account.
#[derive(Debug)]
pub struct UidMapStore {
    dir: PathBuf,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UidMapStore {
    /// Creates a store persisting its databases in the given
    /// directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| Error::CreateDirError(err, dir.clone()))?;
        debug!("using uid map directory {dir:?}");

        Ok(Self {
            dir,
            locks: Default::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the database of the given folder.
    pub fn db_path(&self, folder: &str) -> PathBuf {
        self.dir.join(format!("{:x}.sqlite", md5::compute(folder)))
    }

    /// Opens the mapping of the given folder. Fails if the mapping is
    /// already opened by another pass.
    pub fn try_open(&self, folder: &str) -> Result<FolderUidMap> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(folder.to_owned())
            .or_default()
            .clone();

        let guard = lock
            .try_lock_owned()
            .map_err(|_| Error::FolderBusyError(folder.to_owned()))?;

        FolderUidMap::open(folder, self.db_path(folder), guard)
    }
}

/// The outcome of loading a folder mapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadStatus {
    /// The stored mapping matches the UID validity and can be
    /// trusted.
    Trusted,

    /// Nothing was stored yet.
    Fresh,

    /// The stored mapping was built for another UID validity and has
    /// been discarded.
    UidValidityChanged { previous: u32 },

    /// The database was unreadable and has been recreated.
    Recovered,
}

/// The result of [`FolderUidMap::load`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadedUidMap {
    pub map: UidMap,
    pub status: LoadStatus,
}

impl LoadedUidMap {
    /// Returns `true` when no stored correlation could be trusted, in
    /// which case messages need to be re-matched by content identity.
    pub fn needs_rematch(&self) -> bool {
        self.status != LoadStatus::Trusted
    }
}

/// The read/write handle on the mapping of one folder.
///
/// Holding the handle prevents any other pass from opening the same
/// folder mapping.
pub struct FolderUidMap {
    folder: String,
    path: PathBuf,
    conn: Connection,
    recovered: bool,
    _guard: OwnedMutexGuard<()>,
}

impl FolderUidMap {
    fn open(folder: &str, path: PathBuf, guard: OwnedMutexGuard<()>) -> Result<Self> {
        let (conn, recovered) = match open_db(&path) {
            Ok(conn) => (conn, false),
            Err(err) => {
                warn!("uid map of folder {folder} is unreadable, recreating it: {err}");
                trace!("{err:?}");
                remove_db(&path)?;
                (open_db(&path)?, true)
            }
        };

        Ok(Self {
            folder: folder.to_owned(),
            path,
            conn,
            recovered,
            _guard: guard,
        })
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Loads the mapping for the given UID validity.
    ///
    /// A mapping stored for another UID validity is discarded, and an
    /// unreadable database is recreated: in both cases an empty
    /// mapping is returned, and [`LoadedUidMap::needs_rematch`]
    /// tells the caller to re-match messages by content identity.
    pub fn load(&mut self, uid_validity: u32) -> Result<LoadedUidMap> {
        if mem::take(&mut self.recovered) {
            return Ok(LoadedUidMap {
                map: UidMap::new(),
                status: LoadStatus::Recovered,
            });
        }

        match self.read(uid_validity) {
            Ok(loaded) => Ok(loaded),
            Err(err) => {
                warn!(
                    "cannot read uid map of folder {}, recreating it: {err}",
                    self.folder
                );
                trace!("{err:?}");
                self.recreate()?;
                Ok(LoadedUidMap {
                    map: UidMap::new(),
                    status: LoadStatus::Recovered,
                })
            }
        }
    }

    fn read(&self, uid_validity: u32) -> Result<LoadedUidMap> {
        let stored: Option<u32> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?",
                [UID_VALIDITY_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| Error::ReadError(err, self.folder.clone()))?;

        let status = match stored {
            None => LoadStatus::Fresh,
            Some(stored) if stored != uid_validity => {
                debug!(
                    "uid validity of folder {} changed from {stored} to {uid_validity}",
                    self.folder
                );
                LoadStatus::UidValidityChanged { previous: stored }
            }
            Some(_) => LoadStatus::Trusted,
        };

        if status != LoadStatus::Trusted {
            return Ok(LoadedUidMap {
                map: UidMap::new(),
                status,
            });
        }

        let mut stmt = self
            .conn
            .prepare("SELECT local_id, remote_id, flags FROM uid_map WHERE uid_validity = ?")
            .map_err(|err| Error::ReadError(err, self.folder.clone()))?;

        let entries: Vec<UidMapEntry> = stmt
            .query_map([uid_validity], |row| {
                let flags: String = row.get(2)?;
                Ok(UidMapEntry {
                    local_id: row.get(0)?,
                    remote_id: row.get(1)?,
                    flags: Flags::from_persisted_str(&flags),
                })
            })
            .map_err(|err| Error::ReadError(err, self.folder.clone()))?
            .collect::<rusqlite::Result<_>>()
            .map_err(|err| Error::ReadError(err, self.folder.clone()))?;

        debug!(
            "loaded {} uid mappings for folder {}",
            entries.len(),
            self.folder
        );

        Ok(LoadedUidMap {
            map: UidMap::from_iter(entries),
            status,
        })
    }

    /// Replaces the stored mapping and UID validity, atomically.
    pub fn save(&mut self, map: &UidMap, uid_validity: u32) -> Result<()> {
        let folder = self.folder.clone();
        let save_err = |err| Error::SaveError(err, folder.clone());

        let tx = self.conn.transaction().map_err(save_err)?;

        tx.execute("DELETE FROM uid_map", []).map_err(save_err)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO uid_map (local_id, remote_id, uid_validity, flags)
                     VALUES (?, ?, ?, ?)",
                )
                .map_err(save_err)?;

            for entry in map.iter() {
                stmt.execute(params![
                    entry.local_id,
                    entry.remote_id,
                    uid_validity,
                    entry.flags.to_persisted_string(),
                ])
                .map_err(save_err)?;
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
            params![UID_VALIDITY_KEY, uid_validity],
        )
        .map_err(save_err)?;

        tx.commit().map_err(save_err)?;

        debug!(
            "saved {} uid mappings for folder {} (uid validity {uid_validity})",
            map.len(),
            self.folder
        );

        Ok(())
    }

    /// Drops the stored mapping and UID validity.
    pub fn invalidate(&mut self) -> Result<()> {
        let folder = self.folder.clone();
        let invalidate_err = |err| Error::InvalidateError(err, folder.clone());

        let tx = self.conn.transaction().map_err(invalidate_err)?;
        tx.execute("DELETE FROM uid_map", [])
            .map_err(invalidate_err)?;
        tx.execute("DELETE FROM meta", []).map_err(invalidate_err)?;
        tx.commit().map_err(invalidate_err)?;

        debug!("invalidated uid map of folder {}", self.folder);
        Ok(())
    }

    fn recreate(&mut self) -> Result<()> {
        let placeholder =
            Connection::open_in_memory().map_err(|err| Error::OpenDbError(err, self.path.clone()))?;
        drop(mem::replace(&mut self.conn, placeholder));
        remove_db(&self.path)?;
        self.conn = open_db(&self.path)?;
        Ok(())
    }
}

fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|err| Error::OpenDbError(err, path.to_owned()))?;
    conn.execute_batch(INIT_QUERY)
        .map_err(|err| Error::OpenDbError(err, path.to_owned()))?;
    Ok(conn)
}

fn remove_db(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::RemoveDbError(err, path.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use crate::flag::{Flag, Flags};

    use super::{LoadStatus, UidMap, UidMapStore};

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let store = UidMapStore::new(dir.path()).unwrap();

        let mut map = UidMap::new();
        map.insert("L1", "42", Flags::from_iter([Flag::Seen]));
        map.insert("L2", "43", Flags::default());
        map.insert("L3", "44", Flags::from_iter([Flag::custom("Seen")]));

        {
            let mut folder = store.try_open("INBOX").unwrap();
            assert_eq!(folder.load(7).unwrap().status, LoadStatus::Fresh);
            folder.save(&map, 7).unwrap();
        }

        let mut folder = store.try_open("INBOX").unwrap();
        let loaded = folder.load(7).unwrap();

        assert_eq!(loaded.status, LoadStatus::Trusted);
        assert!(!loaded.needs_rematch());
        assert_eq!(loaded.map, map);
    }

    #[test]
    fn load_with_another_uid_validity() {
        let dir = tempdir().unwrap();
        let store = UidMapStore::new(dir.path()).unwrap();

        let mut map = UidMap::new();
        map.insert("L1", "42", Flags::default());

        let mut folder = store.try_open("INBOX").unwrap();
        folder.save(&map, 7).unwrap();

        let loaded = folder.load(9).unwrap();
        assert_eq!(loaded.status, LoadStatus::UidValidityChanged { previous: 7 });
        assert!(loaded.map.is_empty());
        assert!(loaded.needs_rematch());
    }

    #[test]
    fn invalidate() {
        let dir = tempdir().unwrap();
        let store = UidMapStore::new(dir.path()).unwrap();

        let mut map = UidMap::new();
        map.insert("L1", "42", Flags::default());

        let mut folder = store.try_open("INBOX").unwrap();
        folder.save(&map, 7).unwrap();
        folder.invalidate().unwrap();

        assert_eq!(folder.load(7).unwrap().status, LoadStatus::Fresh);
    }

    #[test]
    fn recover_corrupted_database() {
        let dir = tempdir().unwrap();
        let store = UidMapStore::new(dir.path()).unwrap();
        fs::write(store.db_path("INBOX"), b"definitely not a sqlite database").unwrap();

        let mut folder = store.try_open("INBOX").unwrap();
        let loaded = folder.load(7).unwrap();

        assert_eq!(loaded.status, LoadStatus::Recovered);
        assert!(loaded.map.is_empty());

        let mut map = UidMap::new();
        map.insert("L1", "42", Flags::default());
        folder.save(&map, 7).unwrap();
        assert_eq!(folder.load(7).unwrap().map, map);
    }

    #[test]
    fn same_folder_cannot_be_opened_twice() {
        let dir = tempdir().unwrap();
        let store = UidMapStore::new(dir.path()).unwrap();

        let inbox = store.try_open("INBOX").unwrap();
        assert!(store.try_open("INBOX").is_err());
        assert!(store.try_open("Sent").is_ok());

        drop(inbox);
        assert!(store.try_open("INBOX").is_ok());
    }
}
