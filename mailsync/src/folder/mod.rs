//! Module dedicated to folders.
//!
//! This module contains the folder filtering and naming rules of an
//! account, and the resolution of the folders to synchronize out of
//! both repositories listings.

pub mod config;
pub mod sync;

use std::{collections::BTreeSet, result};

use regex::Regex;
use thiserror::Error;

use self::config::FolderSyncStrategy;

/// The name of the inbox folder.
pub const INBOX: &str = "INBOX";

/// Errors related to folders.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse folder filter pattern {1}")]
    ParsePatternError(#[source] regex::Error, String),
}

/// The `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// Returns `true` if the given folder name designates the inbox.
pub fn is_inbox(folder: &str) -> bool {
    folder.eq_ignore_ascii_case(INBOX)
}

/// Normalizes the inbox name, leaves other names untouched.
pub fn normalize(folder: &str) -> String {
    if is_inbox(folder) {
        INBOX.to_owned()
    } else {
        folder.to_owned()
    }
}

/// The compiled form of a [`FolderSyncStrategy`].
#[derive(Clone, Debug, Default)]
pub enum FolderFilter {
    #[default]
    All,
    Include(BTreeSet<String>),
    Exclude(BTreeSet<String>),
    Matching(Regex),
    NotMatching(Regex),
}

impl FolderFilter {
    /// Returns `true` if the given remote folder name should be
    /// synchronized.
    pub fn matches(&self, folder: &str) -> bool {
        let folder = normalize(folder);

        match self {
            Self::All => true,
            Self::Include(folders) => folders.contains(&folder),
            Self::Exclude(folders) => !folders.contains(&folder),
            Self::Matching(re) => re.is_match(&folder),
            Self::NotMatching(re) => !re.is_match(&folder),
        }
    }
}

impl TryFrom<&FolderSyncStrategy> for FolderFilter {
    type Error = Error;

    fn try_from(strategy: &FolderSyncStrategy) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| Error::ParsePatternError(err, pattern.to_owned()))
        };

        Ok(match strategy {
            FolderSyncStrategy::All => Self::All,
            FolderSyncStrategy::Include(folders) => {
                Self::Include(folders.iter().map(|f| normalize(f)).collect())
            }
            FolderSyncStrategy::Exclude(folders) => {
                Self::Exclude(folders.iter().map(|f| normalize(f)).collect())
            }
            FolderSyncStrategy::Matching(pattern) => Self::Matching(compile(pattern)?),
            FolderSyncStrategy::NotMatching(pattern) => Self::NotMatching(compile(pattern)?),
        })
    }
}
