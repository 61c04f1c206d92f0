//! # Email sync report
//!
//! Module dedicated to email synchronization reporting. The main
//! structure of this module is [`EmailSyncReport`].

use crate::{uid_map::LoadStatus, Error};

use super::hunk::EmailSyncHunk;

/// The email synchronization report of one folder.
#[derive(Debug)]
pub struct EmailSyncReport {
    /// How the UID mapping was loaded.
    pub uid_map: LoadStatus,

    /// The list of processed hunks associated with an optional
    /// error. Only benign errors (message vanished in between) are
    /// recorded here: other errors abort the folder pass.
    pub patch: Vec<(EmailSyncHunk, Option<Error>)>,

    /// `true` if the patch was computed but not applied.
    pub dry_run: bool,

    /// `true` if the pass was cancelled before the end of the patch.
    pub cancelled: bool,
}

impl Default for EmailSyncReport {
    fn default() -> Self {
        Self {
            uid_map: LoadStatus::Fresh,
            patch: Vec::new(),
            dry_run: false,
            cancelled: false,
        }
    }
}

impl EmailSyncReport {
    fn count(&self, f: impl Fn(&EmailSyncHunk) -> bool) -> usize {
        self.patch
            .iter()
            .filter(|(hunk, err)| err.is_none() && f(hunk))
            .count()
    }

    /// Counts the messages copied in either direction.
    pub fn copied(&self) -> usize {
        self.count(|hunk| matches!(hunk, EmailSyncHunk::Copy(..)))
    }

    /// Counts the messages deleted on either side.
    pub fn deleted(&self) -> usize {
        self.count(|hunk| matches!(hunk, EmailSyncHunk::Delete(..)))
    }

    /// Counts the flags updates applied on either side.
    pub fn flags_updated(&self) -> usize {
        self.count(|hunk| matches!(hunk, EmailSyncHunk::UpdateFlags(..)))
    }

    /// Counts the hunks skipped because of a benign error.
    pub fn skipped(&self) -> usize {
        self.patch.iter().filter(|(_, err)| err.is_some()).count()
    }

    /// Counts the hunks mutating one of the repositories.
    pub fn mutations(&self) -> usize {
        self.count(EmailSyncHunk::is_mutation)
    }
}
