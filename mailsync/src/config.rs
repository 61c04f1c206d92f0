//! Module dedicated to the synchronization configuration.
//!
//! This module only contains configuration types: loading and
//! validating configuration files is left to the caller.

use std::path::PathBuf;

use shellexpand_utils::shellexpand_path;

use crate::account::config::AccountConfig;

/// The synchronization configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct SyncConfig {
    /// The accounts to synchronize.
    pub accounts: Vec<AccountConfig>,

    /// The maximum number of accounts synchronized at the same time.
    pub max_accounts: usize,

    /// When set, a new pass starts every given number of seconds,
    /// counted from the start of the previous pass.
    pub interval_secs: Option<u64>,

    /// The directory persisting the UID mappings. Path is
    /// shell-expanded. Defaults to `$XDG_DATA_HOME/mailsync`.
    pub state_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            max_accounts: 1,
            interval_secs: None,
            state_dir: None,
        }
    }
}

impl SyncConfig {
    pub fn find_default_state_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("mailsync"))
    }

    /// Returns the configured state directory, or the default one.
    pub fn find_state_dir(&self) -> Option<PathBuf> {
        match &self.state_dir {
            Some(dir) => Some(shellexpand_path(dir)),
            None => Self::find_default_state_dir(),
        }
    }
}
