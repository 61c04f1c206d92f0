//! # Folder synchronization
//!
//! Module dedicated to the resolution of the folders to synchronize.
//! Both listings are brought to the same naming (the remote one),
//! filtered, then merged into folder pairs. A folder existing on one
//! side only produces a creation hunk for the other side, or is
//! skipped, depending on the folder permissions.

use std::{collections::BTreeMap, fmt};

use tracing::debug;

use crate::account::sync::Target;

use super::{config::FolderSyncConfig, normalize, FolderFilter};

/// Alias for a folder name.
pub type FolderName = String;

/// A folder and its name on both sides.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FolderPair {
    pub local: FolderName,
    pub remote: FolderName,
}

impl FolderPair {
    pub fn new(local: impl ToString, remote: impl ToString) -> Self {
        Self {
            local: local.to_string(),
            remote: remote.to_string(),
        }
    }
}

impl fmt::Display for FolderPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local == self.remote {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{} ↔ {}", self.local, self.remote)
        }
    }
}

/// The folder synchronization hunk.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum FolderSyncHunk {
    /// The given folder needs to be created on the given target.
    Create(FolderName, Target),
}

impl fmt::Display for FolderSyncHunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(folder, target) => write!(f, "Creating {target} folder {folder}"),
        }
    }
}

/// The folder synchronization patch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FolderSyncPatch {
    /// The folders to synchronize, sorted by remote name.
    pub pairs: Vec<FolderPair>,

    /// The folders that need to be created before being synchronized.
    pub hunks: Vec<(FolderSyncHunk, FolderPair)>,

    /// The folders existing on one side only that cannot be created
    /// on the other side.
    pub skipped: Vec<FolderName>,
}

/// Builds the folder synchronization patch out of both listings.
pub fn build_patch(
    config: &FolderSyncConfig,
    filter: &FolderFilter,
    local: impl IntoIterator<Item = FolderName>,
    local_delim: char,
    remote: impl IntoIterator<Item = FolderName>,
    remote_delim: char,
) -> FolderSyncPatch {
    let translation = &config.translation;
    let mut folders: BTreeMap<String, (Option<FolderName>, Option<FolderName>)> = BTreeMap::new();

    for folder in remote {
        let name = normalize(&folder);
        folders.entry(name).or_default().1 = Some(folder);
    }

    for folder in local {
        let remote = normalize(&translation.to_remote(&folder, local_delim, remote_delim));
        folders.entry(remote).or_default().0 = Some(folder);
    }

    let mut patch = FolderSyncPatch::default();

    for (name, (local, remote)) in folders {
        if !filter.matches(&name) {
            debug!("folder {name} filtered out");
            continue;
        }

        let (pair, hunk) = match (local, remote) {
            (None, None) => continue,
            (Some(local), Some(remote)) => (FolderPair::new(local, remote), None),
            (None, Some(remote)) => {
                let local = translation.to_local(&remote, remote_delim, local_delim);
                let hunk = FolderSyncHunk::Create(local.clone(), Target::Local);
                (FolderPair::new(local, remote), Some(hunk))
            }
            (Some(local), None) => {
                let hunk = FolderSyncHunk::Create(name.clone(), Target::Remote);
                (FolderPair::new(local, name.clone()), Some(hunk))
            }
        };

        match hunk {
            Some(_) if !config.permissions.create => {
                debug!("folder {name} exists on one side only, skipping it");
                patch.skipped.push(name);
            }
            Some(hunk) => {
                patch.hunks.push((hunk, pair.clone()));
                patch.pairs.push(pair);
            }
            None => patch.pairs.push(pair),
        }
    }

    patch
}

#[cfg(test)]
mod tests {
    use crate::{
        account::sync::Target,
        folder::{
            config::{FolderSyncConfig, FolderSyncStrategy},
            FolderFilter,
        },
    };

    use super::{FolderPair, FolderSyncHunk};

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn build_patch_pairs_both_sides() {
        let config = FolderSyncConfig::default();
        let filter = FolderFilter::default();

        let patch = super::build_patch(
            &config,
            &filter,
            names(&["INBOX", "Archive.2023"]),
            '.',
            names(&["Inbox", "Archive/2023"]),
            '/',
        );

        assert_eq!(
            patch.pairs,
            vec![
                FolderPair::new("Archive.2023", "Archive/2023"),
                FolderPair::new("INBOX", "Inbox"),
            ]
        );
        assert!(patch.hunks.is_empty());
        assert!(patch.skipped.is_empty());
    }

    #[test]
    fn build_patch_creates_missing_folders() {
        let config = FolderSyncConfig::default();
        let filter = FolderFilter::default();

        let patch = super::build_patch(
            &config,
            &filter,
            names(&["INBOX", "Drafts"]),
            '.',
            names(&["INBOX", "Lists/Rust"]),
            '/',
        );

        assert_eq!(
            patch.hunks,
            vec![
                (
                    FolderSyncHunk::Create("Drafts".into(), Target::Remote),
                    FolderPair::new("Drafts", "Drafts"),
                ),
                (
                    FolderSyncHunk::Create("Lists.Rust".into(), Target::Local),
                    FolderPair::new("Lists.Rust", "Lists/Rust"),
                ),
            ]
        );
        assert_eq!(patch.pairs.len(), 3);
    }

    #[test]
    fn build_patch_skips_missing_folders_without_permission() {
        let mut config = FolderSyncConfig::default();
        config.permissions.create = false;
        let filter = FolderFilter::default();

        let patch = super::build_patch(
            &config,
            &filter,
            names(&["INBOX", "Drafts"]),
            '.',
            names(&["INBOX"]),
            '/',
        );

        assert_eq!(patch.pairs, vec![FolderPair::new("INBOX", "INBOX")]);
        assert_eq!(patch.skipped, vec![String::from("Drafts")]);
    }

    #[test]
    fn build_patch_applies_filter() {
        let config = FolderSyncConfig::default();
        let filter =
            FolderFilter::try_from(&FolderSyncStrategy::from_iter(["INBOX"])).unwrap();

        let patch = super::build_patch(
            &config,
            &filter,
            names(&["INBOX", "Drafts"]),
            '.',
            names(&["INBOX", "Trash"]),
            '/',
        );

        assert_eq!(patch.pairs, vec![FolderPair::new("INBOX", "INBOX")]);
        assert!(patch.hunks.is_empty());
    }
}
