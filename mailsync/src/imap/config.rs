//! Module dedicated to the IMAP repository configuration.

use crate::retry::RetryConfig;

/// The IMAP repository configuration.
///
/// Connection parameters and credentials are not part of it: they
/// belong to the session factory given to the repository.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct ImapConfig {
    /// The maximum number of simultaneous sessions opened to the
    /// server.
    pub max_sessions: usize,

    /// The retry strategy applied to transient failures.
    pub retry: RetryConfig,

    /// Only synchronize subscribed mailboxes.
    pub subscribed_only: bool,

    /// Expunge messages right after flagging them as deleted.
    pub expunge: bool,

    /// The mailbox hierarchy delimiter. When unset, the delimiter
    /// reported by the server is used.
    pub delimiter: Option<char>,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            max_sessions: 2,
            retry: RetryConfig::default(),
            subscribed_only: false,
            expunge: true,
            delimiter: None,
        }
    }
}
