//! Module dedicated to IMAP sessions.
//!
//! The wire protocol is out of the scope of this library. A session
//! is an already authenticated and secured IMAP connection exposing
//! the handful of commands the synchronization needs, provided by a
//! [`SessionFactory`] the caller builds on top of its IMAP client of
//! choice.

use std::{io, result, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::ErrorKind;

/// Errors raised by IMAP sessions.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IMAP connection lost: {0}")]
    ConnectionLostError(String),
    #[error("IMAP connection failed")]
    IoError(#[from] io::Error),
    #[error("cannot authenticate to IMAP server: {0}")]
    AuthenticationError(String),
    #[error("IMAP server denied command: {0}")]
    NoError(String),
    #[error("IMAP server rejected command: {0}")]
    BadError(String),
    #[error("cannot find IMAP mailbox {0}")]
    MailboxNotFoundError(String),
    #[error("no IMAP mailbox selected")]
    NoMailboxSelectedError,
    #[error("IMAP command timed out after {0:?}")]
    TimeoutError(Duration),
    #[error("UID validity of IMAP mailbox {0} changed from {1} to {2}")]
    UidValidityChangedError(String, u32, u32),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionLostError(_) | Self::IoError(_) | Self::TimeoutError(_) => {
                ErrorKind::Connectivity
            }
            Self::AuthenticationError(_) | Self::NoError(_) => ErrorKind::Permission,
            Self::MailboxNotFoundError(_) => ErrorKind::NotFound,
            Self::UidValidityChangedError(..) => ErrorKind::UidValidityChanged,
            Self::BadError(_) | Self::NoMailboxSelectedError => ErrorKind::Other,
        }
    }

    /// Returns `true` if the session that raised the error cannot be
    /// used anymore.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }
}

/// The `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// A mailbox, as returned by the `LIST` command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MailboxInfo {
    pub name: String,
    pub delimiter: Option<char>,
    pub attributes: Vec<String>,
}

impl MailboxInfo {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            delimiter: Some('/'),
            attributes: Vec::new(),
        }
    }

    /// Returns `false` for mailboxes flagged `\Noselect` or
    /// `\NonExistent`, which only exist as hierarchy nodes.
    pub fn is_selectable(&self) -> bool {
        !self.attributes.iter().any(|attr| {
            attr.eq_ignore_ascii_case("\\Noselect") || attr.eq_ignore_ascii_case("\\NonExistent")
        })
    }
}

/// The state of a mailbox, as returned by the `SELECT` command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SelectedMailbox {
    pub uid_validity: u32,
    pub exists: u32,
}

/// The metadata of a message, as returned by
/// `UID FETCH 1:* (UID FLAGS RFC822.SIZE BODY.PEEK[HEADER])`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FetchedMeta {
    pub uid: u32,
    pub flags: Vec<String>,
    pub size: u64,
    pub headers: Vec<u8>,
}

/// An authenticated IMAP session.
///
/// Message commands apply to the currently selected mailbox.
#[async_trait]
pub trait ImapSession: Send {
    /// Lists mailboxes (`LIST "" *`, or `LSUB "" *` when
    /// `subscribed_only` is set).
    async fn list(&mut self, subscribed_only: bool) -> Result<Vec<MailboxInfo>>;

    /// Creates a mailbox (`CREATE`).
    async fn create(&mut self, mailbox: &str) -> Result<()>;

    /// Selects a mailbox (`SELECT`).
    async fn select(&mut self, mailbox: &str) -> Result<SelectedMailbox>;

    /// Fetches the metadata of every message of the selected mailbox.
    async fn fetch_meta(&mut self) -> Result<Vec<FetchedMeta>>;

    /// Fetches the full content of a message of the selected mailbox
    /// (`UID FETCH <uid> BODY.PEEK[]`). Returns `None` if no message
    /// matches the UID.
    async fn fetch_body(&mut self, uid: u32) -> Result<Option<Vec<u8>>>;

    /// Appends a message to the given mailbox (`APPEND`). Returns the
    /// assigned UID when the server supports `UIDPLUS`.
    async fn append(&mut self, mailbox: &str, raw: &[u8], flags: &[String])
        -> Result<Option<u32>>;

    /// Replaces the flags of a message of the selected mailbox
    /// (`UID STORE <uid> FLAGS.SILENT`).
    async fn store_flags(&mut self, uid: u32, flags: &[String]) -> Result<()>;

    /// Adds flags to a message of the selected mailbox
    /// (`UID STORE <uid> +FLAGS.SILENT`).
    async fn add_flags(&mut self, uid: u32, flags: &[String]) -> Result<()>;

    /// Permanently removes a message of the selected mailbox flagged
    /// as deleted (`UID EXPUNGE <uid>`).
    async fn expunge_uid(&mut self, uid: u32) -> Result<()>;

    /// Checks the session is still alive (`NOOP`).
    async fn noop(&mut self) -> Result<()>;

    /// Closes the session (`LOGOUT`).
    async fn logout(&mut self) -> Result<()>;
}

/// Builds new authenticated IMAP sessions.
///
/// Credentials and TLS are handled by the factory, never by this
/// library.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ImapSession>>;
}
