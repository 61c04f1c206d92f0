//! Module dedicated to the Maildir repository configuration.

use std::path::PathBuf;

/// The Maildir repository configuration.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct MaildirConfig {
    /// The Maildir root directory.
    ///
    /// The path should point to the root level of the Maildir
    /// directory (the one containing the `cur`, `new` and `tmp`
    /// folders), which holds the inbox. Other folders live in
    /// Maildir++ subdirectories (`.Folder`). Path is shell-expanded,
    /// which means environment variables and tilde `~` are replaced
    /// by their values.
    pub root_dir: PathBuf,
}

impl MaildirConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }
}
