use std::{fmt, result};

use thiserror::Error;

use crate::{account, email, folder, imap, maildir, sync, uid_map};

/// The global `Result` alias of the library.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the library.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    ImapError(#[from] imap::Error),
    #[error(transparent)]
    MaildirError(#[from] maildir::Error),
    #[error(transparent)]
    UidMapError(#[from] uid_map::Error),
    #[error(transparent)]
    FolderError(#[from] folder::Error),
    #[error(transparent)]
    EmailSyncError(#[from] email::sync::Error),
    #[error(transparent)]
    AccountSyncError(#[from] account::sync::Error),
    #[error(transparent)]
    SyncError(#[from] sync::Error),
}

impl Error {
    /// Classifies the error, so that callers can decide between
    /// retrying, skipping or aborting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ImapError(err) => err.kind(),
            Self::MaildirError(err) => err.kind(),
            Self::UidMapError(err) => err.kind(),
            Self::EmailSyncError(err) => err.kind(),
            Self::AccountSyncError(err) => err.kind(),
            Self::FolderError(_) | Self::SyncError(_) => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// The error taxonomy shared by every layer of the synchronization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The remote side is unreachable or the session dropped. Retried
    /// with backoff by the session pool.
    Connectivity,
    /// The operation was denied. Fatal for the affected folder or
    /// account, never retried.
    Permission,
    /// The target vanished. Treated as success-of-intent.
    NotFound,
    /// The remote folder changed its UID validity.
    UidValidityChanged,
    /// The persisted UID mapping cannot be read.
    CorruptState,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connectivity => write!(f, "connectivity"),
            Self::Permission => write!(f, "permission"),
            Self::NotFound => write!(f, "not found"),
            Self::UidValidityChanged => write!(f, "uid validity changed"),
            Self::CorruptState => write!(f, "corrupt state"),
            Self::Other => write!(f, "other"),
        }
    }
}
