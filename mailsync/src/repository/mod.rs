//! Module dedicated to repositories.
//!
//! A repository is one side of the synchronization: the remote IMAP
//! store or the local Maildir store. Both implement the
//! [`Repository`] capabilities, and the synchronizer only talks to
//! them through the [`Backend`] enum, which dispatches to the right
//! variant by explicit tag.

use std::fmt;

use async_trait::async_trait;

use crate::{
    envelope::{Id, Snapshot},
    flag::Flags,
    imap::ImapRepository,
    maildir::MaildirRepository,
    Result,
};

/// The handle of an opened folder.
///
/// The UID validity is captured at opening time, so that operations
/// made against the handle can detect a folder recreated in between.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct FolderHandle {
    pub name: String,
    pub uid_validity: Option<u32>,
}

impl FolderHandle {
    pub fn new(name: impl ToString, uid_validity: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            uid_validity,
        }
    }
}

/// The capabilities every repository must provide.
///
/// Mutations are idempotent: setting flags to the flags a message
/// already has, or deleting a message that is already gone, must
/// succeed.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Lists the names of the selectable folders.
    async fn list_folders(&self) -> Result<Vec<String>>;

    /// Creates the given folder.
    async fn create_folder(&self, folder: &str) -> Result<()>;

    /// Opens the given folder. Fails with a not found error if the
    /// folder does not exist.
    async fn open_folder(&self, folder: &str) -> Result<FolderHandle>;

    /// Takes a snapshot of the folder messages.
    async fn list_messages(&self, folder: &FolderHandle) -> Result<Snapshot>;

    /// Fetches the raw content of the given message. Fails with a
    /// not found error if the message vanished since the listing.
    async fn fetch_message(&self, folder: &FolderHandle, id: &str) -> Result<Vec<u8>>;

    /// Stores the given raw message with the given flags. Returns the
    /// identity of the stored message, when known.
    async fn store_message(
        &self,
        folder: &FolderHandle,
        raw: &[u8],
        flags: &Flags,
    ) -> Result<Option<Id>>;

    /// Replaces the flags of the given message.
    async fn set_flags(&self, folder: &FolderHandle, id: &str, flags: &Flags) -> Result<()>;

    /// Deletes the given message.
    async fn delete_message(&self, folder: &FolderHandle, id: &str) -> Result<()>;

    /// Returns the character separating folder hierarchy levels in
    /// folder names.
    fn delimiter(&self) -> char;

    /// Returns `true` if the repository can hold custom flags
    /// (keywords).
    fn supports_custom_flags(&self) -> bool;

    /// Releases the resources held by the repository.
    async fn close(&self) {}
}

/// The kind of repository.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RepositoryKind {
    Imap,
    Maildir,
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap => write!(f, "IMAP"),
            Self::Maildir => write!(f, "Maildir"),
        }
    }
}

/// The backend, which wraps one of the supported repositories.
pub enum Backend {
    Imap(ImapRepository),
    Maildir(MaildirRepository),
}

impl Backend {
    pub fn kind(&self) -> RepositoryKind {
        match self {
            Self::Imap(_) => RepositoryKind::Imap,
            Self::Maildir(_) => RepositoryKind::Maildir,
        }
    }
}

impl From<ImapRepository> for Backend {
    fn from(repository: ImapRepository) -> Self {
        Self::Imap(repository)
    }
}

impl From<MaildirRepository> for Backend {
    fn from(repository: MaildirRepository) -> Self {
        Self::Maildir(repository)
    }
}

#[async_trait]
impl Repository for Backend {
    async fn list_folders(&self) -> Result<Vec<String>> {
        match self {
            Self::Imap(imap) => imap.list_folders().await,
            Self::Maildir(maildir) => maildir.list_folders().await,
        }
    }

    async fn create_folder(&self, folder: &str) -> Result<()> {
        match self {
            Self::Imap(imap) => imap.create_folder(folder).await,
            Self::Maildir(maildir) => maildir.create_folder(folder).await,
        }
    }

    async fn open_folder(&self, folder: &str) -> Result<FolderHandle> {
        match self {
            Self::Imap(imap) => imap.open_folder(folder).await,
            Self::Maildir(maildir) => maildir.open_folder(folder).await,
        }
    }

    async fn list_messages(&self, folder: &FolderHandle) -> Result<Snapshot> {
        match self {
            Self::Imap(imap) => imap.list_messages(folder).await,
            Self::Maildir(maildir) => maildir.list_messages(folder).await,
        }
    }

    async fn fetch_message(&self, folder: &FolderHandle, id: &str) -> Result<Vec<u8>> {
        match self {
            Self::Imap(imap) => imap.fetch_message(folder, id).await,
            Self::Maildir(maildir) => maildir.fetch_message(folder, id).await,
        }
    }

    async fn store_message(
        &self,
        folder: &FolderHandle,
        raw: &[u8],
        flags: &Flags,
    ) -> Result<Option<Id>> {
        match self {
            Self::Imap(imap) => imap.store_message(folder, raw, flags).await,
            Self::Maildir(maildir) => maildir.store_message(folder, raw, flags).await,
        }
    }

    async fn set_flags(&self, folder: &FolderHandle, id: &str, flags: &Flags) -> Result<()> {
        match self {
            Self::Imap(imap) => imap.set_flags(folder, id, flags).await,
            Self::Maildir(maildir) => maildir.set_flags(folder, id, flags).await,
        }
    }

    async fn delete_message(&self, folder: &FolderHandle, id: &str) -> Result<()> {
        match self {
            Self::Imap(imap) => imap.delete_message(folder, id).await,
            Self::Maildir(maildir) => maildir.delete_message(folder, id).await,
        }
    }

    fn delimiter(&self) -> char {
        match self {
            Self::Imap(imap) => imap.delimiter(),
            Self::Maildir(maildir) => maildir.delimiter(),
        }
    }

    fn supports_custom_flags(&self) -> bool {
        match self {
            Self::Imap(imap) => imap.supports_custom_flags(),
            Self::Maildir(maildir) => maildir.supports_custom_flags(),
        }
    }

    async fn close(&self) {
        match self {
            Self::Imap(imap) => imap.close().await,
            Self::Maildir(maildir) => maildir.close().await,
        }
    }
}
