//! # Folder sync config

use std::collections::{BTreeMap, BTreeSet};

/// The folder synchronization configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct FolderSyncConfig {
    pub filter: FolderSyncStrategy,
    pub permissions: FolderSyncPermissions,
    pub translation: FolderNameTranslation,
}

/// The folder synchronization strategy.
///
/// Folders are matched by their remote name. The inbox always
/// matches as `INBOX`, whatever its case.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum FolderSyncStrategy {
    /// Synchronizes all folders.
    #[default]
    All,

    /// Synchronizes only folders matching the given names.
    Include(BTreeSet<String>),

    /// Synchronizes all folders except the ones matching the given
    /// names.
    Exclude(BTreeSet<String>),

    /// Synchronizes only folders matching the given regular
    /// expression.
    Matching(String),

    /// Synchronizes all folders except the ones matching the given
    /// regular expression.
    NotMatching(String),
}

impl<T: ToString> FromIterator<T> for FolderSyncStrategy {
    /// Builds an include strategy out of folder names.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::Include(iter.into_iter().map(|f| f.to_string()).collect())
    }
}

/// The folder synchronization permissions.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct FolderSyncPermissions {
    /// Creates a folder existing on one side only on the missing
    /// side. When disabled, such folders are skipped.
    pub create: bool,
}

impl Default for FolderSyncPermissions {
    fn default() -> Self {
        Self { create: true }
    }
}

/// The translation of folder names between both sides.
///
/// By default a remote name is translated into a local one by
/// replacing the remote hierarchy delimiter with the local one, and
/// the other way around. Aliases take precedence over this rule.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct FolderNameTranslation {
    /// Explicit translations, from remote name to local name.
    pub aliases: BTreeMap<String, String>,
}

impl FolderNameTranslation {
    pub fn with_alias(mut self, remote: impl ToString, local: impl ToString) -> Self {
        self.aliases.insert(remote.to_string(), local.to_string());
        self
    }

    /// Translates a remote folder name into a local one.
    pub fn to_local(&self, remote: &str, remote_delim: char, local_delim: char) -> String {
        match self.aliases.get(remote) {
            Some(local) => local.clone(),
            None => replace_delimiter(remote, remote_delim, local_delim),
        }
    }

    /// Translates a local folder name into a remote one.
    pub fn to_remote(&self, local: &str, local_delim: char, remote_delim: char) -> String {
        let alias = self
            .aliases
            .iter()
            .find_map(|(remote, alias)| (alias == local).then(|| remote.clone()));

        match alias {
            Some(remote) => remote,
            None => replace_delimiter(local, local_delim, remote_delim),
        }
    }
}

fn replace_delimiter(name: &str, from: char, to: char) -> String {
    if from == to {
        name.to_owned()
    } else {
        name.replace(from, &to.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::FolderNameTranslation;

    #[test]
    fn translate_delimiters() {
        let translation = FolderNameTranslation::default();

        assert_eq!(translation.to_local("Archive/2023", '/', '.'), "Archive.2023");
        assert_eq!(translation.to_remote("Archive.2023", '.', '/'), "Archive/2023");
        assert_eq!(translation.to_local("INBOX", '/', '.'), "INBOX");
    }

    #[test]
    fn translate_aliases() {
        let translation = FolderNameTranslation::default().with_alias("[Gmail]/Sent Mail", "Sent");

        assert_eq!(translation.to_local("[Gmail]/Sent Mail", '/', '.'), "Sent");
        assert_eq!(translation.to_remote("Sent", '.', '/'), "[Gmail]/Sent Mail");
        assert_eq!(translation.to_remote("Drafts", '.', '/'), "Drafts");
    }
}
