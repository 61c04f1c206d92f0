//! Module dedicated to account configuration.

use crate::{
    folder::config::FolderSyncConfig, imap::config::ImapConfig, maildir::config::MaildirConfig,
};

/// The account configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub struct AccountConfig {
    /// The name of the account. Scopes the persisted UID mappings,
    /// and therefore needs to be unique.
    pub name: String,

    /// The local Maildir repository configuration.
    pub local: MaildirConfig,

    /// The remote IMAP repository configuration.
    #[cfg_attr(feature = "derive", serde(default))]
    pub remote: ImapConfig,

    /// The folders filtering, creation and naming rules.
    #[cfg_attr(feature = "derive", serde(default))]
    pub folder: FolderSyncConfig,

    /// The side, if any, whose messages are never deleted because of
    /// a deletion made on the other side.
    #[cfg_attr(feature = "derive", serde(default))]
    pub hold: HoldPolicy,

    /// The maximum number of folders synchronized at the same time.
    #[cfg_attr(feature = "derive", serde(default = "AccountConfig::default_max_folders"))]
    pub max_folders: usize,

    /// Messages bigger than this size, in bytes, are not copied.
    #[cfg_attr(feature = "derive", serde(default))]
    pub max_size: Option<u64>,

    /// Messages older than this number of days, according to their
    /// `Date` header, are left untouched on both sides.
    #[cfg_attr(feature = "derive", serde(default))]
    pub max_age: Option<u32>,

    /// Computes and reports changes without applying them.
    #[cfg_attr(feature = "derive", serde(default))]
    pub dry_run: bool,
}

impl AccountConfig {
    pub fn new(name: impl ToString, local: MaildirConfig) -> Self {
        Self {
            name: name.to_string(),
            local,
            remote: Default::default(),
            folder: Default::default(),
            hold: Default::default(),
            max_folders: Self::default_max_folders(),
            max_size: None,
            max_age: None,
            dry_run: false,
        }
    }

    fn default_max_folders() -> usize {
        2
    }
}

/// The one-way hold policy.
///
/// By default a message deleted on one side is deleted on the other
/// side. When a side holds, its messages deleted on the other side
/// are copied back instead.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum HoldPolicy {
    /// Deletions propagate both ways.
    #[default]
    None,

    /// Local messages are authoritative.
    Local,

    /// Remote messages are authoritative.
    Remote,
}
