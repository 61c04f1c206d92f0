//! Module dedicated to the Maildir entry index.
//!
//! Locating a message by id in a Maildir means scanning `new` and
//! `cur`. The index remembers where each message was last seen, so
//! that per-message operations following a listing do not rescan the
//! whole folder.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use maildirpp::MailEntry;
use tokio::sync::Mutex;
use tracing::trace;

use crate::envelope::Id;

#[cfg(unix)]
const INFORMATIONAL_SUFFIX_SEPARATOR: &str = ":";
#[cfg(windows)]
const INFORMATIONAL_SUFFIX_SEPARATOR: &str = ";";

/// The last known location of a message file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Located {
    pub path: PathBuf,
    pub info: String,
    pub is_new: bool,
}

impl Located {
    pub fn from_entry(entry: &MailEntry) -> Self {
        let is_new = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .map(|dir| dir == "new")
            .unwrap_or_default();

        Self {
            path: entry.path().clone(),
            info: entry.flags().to_owned(),
            is_new,
        }
    }

    /// Locates a message stored in `cur` with the given info.
    pub fn cur(maildir: &Path, id: &str, info: &str) -> Self {
        Self {
            path: cur_path(maildir, id, info),
            info: info.to_owned(),
            is_new: false,
        }
    }
}

/// Builds the path of a message in `cur` with the given info.
pub fn cur_path(maildir: &Path, id: &str, info: &str) -> PathBuf {
    maildir
        .join("cur")
        .join(format!("{id}{INFORMATIONAL_SUFFIX_SEPARATOR}2,{info}"))
}

/// Message locations, per Maildir directory.
#[derive(Debug, Default)]
pub struct EntryIndex {
    folders: Mutex<HashMap<PathBuf, HashMap<Id, Located>>>,
}

impl EntryIndex {
    /// Replaces the locations of the given Maildir.
    pub async fn reset(&self, maildir: &Path, entries: HashMap<Id, Located>) {
        trace!("indexing {} maildir entries of {maildir:?}", entries.len());
        self.folders
            .lock()
            .await
            .insert(maildir.to_owned(), entries);
    }

    /// Returns the last known location of the message, if the file
    /// is still there.
    pub async fn get(&self, maildir: &Path, id: &str) -> Option<Located> {
        let mut folders = self.folders.lock().await;
        let entries = folders.get_mut(maildir)?;
        let located = entries.get(id)?;

        if located.path.is_file() {
            return Some(located.clone());
        }

        trace!("maildir entry {id} moved since indexed");
        entries.remove(id);
        None
    }

    pub async fn insert(&self, maildir: &Path, id: impl ToString, located: Located) {
        self.folders
            .lock()
            .await
            .entry(maildir.to_owned())
            .or_default()
            .insert(id.to_string(), located);
    }

    pub async fn remove(&self, maildir: &Path, id: &str) {
        if let Some(entries) = self.folders.lock().await.get_mut(maildir) {
            entries.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, fs};

    use tempfile::tempdir;

    use super::{cur_path, EntryIndex, Located};

    #[tokio::test]
    async fn forgets_moved_entries() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("cur")).unwrap();

        let a = Located::cur(tmp.path(), "a", "S");
        let b = Located::cur(tmp.path(), "b", "");
        fs::write(&a.path, "a").unwrap();

        let index = EntryIndex::default();
        index
            .reset(
                tmp.path(),
                HashMap::from_iter([("a".into(), a.clone()), ("b".into(), b)]),
            )
            .await;

        assert_eq!(index.get(tmp.path(), "a").await, Some(a));
        assert_eq!(index.get(tmp.path(), "b").await, None);
        assert_eq!(index.get(tmp.path(), "c").await, None);

        let moved = Located::cur(tmp.path(), "a", "FS");
        fs::rename(cur_path(tmp.path(), "a", "S"), &moved.path).unwrap();
        assert_eq!(index.get(tmp.path(), "a").await, None);

        index.insert(tmp.path(), "a", moved.clone()).await;
        assert_eq!(index.get(tmp.path(), "a").await, Some(moved));

        index.remove(tmp.path(), "a").await;
        assert_eq!(index.get(tmp.path(), "a").await, None);
    }
}
