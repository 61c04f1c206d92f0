//! Module dedicated to the Maildir repository.
//!
//! The local side of the synchronization. The inbox lives at the root
//! of the Maildir, other folders live in Maildir++ subdirectories
//! named after the URL-encoded folder name prefixed with a period.
//! Hierarchy levels are separated by periods.

pub mod config;
mod index;

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    result,
    sync::Arc,
};

use async_trait::async_trait;
use maildirpp::Maildir;
use shellexpand_utils::shellexpand_path;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::{
    envelope::{Envelope, Id, Snapshot},
    flag::{Flag, Flags},
    repository::{FolderHandle, Repository},
    ErrorKind,
};

use self::{
    config::MaildirConfig,
    index::{EntryIndex, Located},
};

/// The name of the folder living at the root of the Maildir.
pub const INBOX: &str = "INBOX";

/// The hierarchy delimiter of Maildir++ folder names.
pub const DELIMITER: char = '.';

/// Errors related to the Maildir repository.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot create maildir directories at {1}")]
    CreateDirsError(#[source] maildirpp::Error, PathBuf),
    #[error("cannot list maildir folders at {1}")]
    ListFoldersError(#[source] maildirpp::Error, PathBuf),
    #[error("cannot list maildir messages at {1}")]
    ListMessagesError(#[source] maildirpp::Error, PathBuf),
    #[error("cannot find maildir folder {0} at {1}")]
    FolderNotFoundError(String, PathBuf),
    #[error("cannot find maildir message {0} in folder {1}")]
    MessageNotFoundError(String, String),
    #[error("cannot read maildir message at {1}")]
    ReadMessageError(#[source] io::Error, PathBuf),
    #[error("cannot store maildir message in folder {1}")]
    StoreMessageError(#[source] maildirpp::Error, String),
    #[error("cannot move maildir message {1} from new to cur")]
    MoveMessageError(#[source] maildirpp::Error, String),
    #[error("cannot rename maildir message {1} to {2}")]
    RenameMessageError(#[source] io::Error, PathBuf, PathBuf),
    #[error("cannot delete maildir message at {1}")]
    DeleteMessageError(#[source] io::Error, PathBuf),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FolderNotFoundError(..) | Self::MessageNotFoundError(..) => ErrorKind::NotFound,
            Self::CreateDirsError(err, _)
            | Self::ListFoldersError(err, _)
            | Self::ListMessagesError(err, _)
            | Self::StoreMessageError(err, _)
            | Self::MoveMessageError(err, _) => match err {
                maildirpp::Error::FindEmailError(_) => ErrorKind::NotFound,
                maildirpp::Error::IoError(err) => io_error_kind(err),
                _ => ErrorKind::Other,
            },
            Self::ReadMessageError(err, _)
            | Self::RenameMessageError(err, _, _)
            | Self::DeleteMessageError(err, _) => io_error_kind(err),
        }
    }
}

fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Other,
    }
}

/// The `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The Maildir repository.
pub struct MaildirRepository {
    config: Arc<MaildirConfig>,
    root: Maildir,
    index: EntryIndex,
}

impl MaildirRepository {
    /// Creates a new Maildir repository, creating the root Maildir
    /// directories if needed.
    pub fn new(config: Arc<MaildirConfig>) -> Result<Self> {
        let root = Maildir::from(shellexpand_path(&config.root_dir));
        root.create_dirs()
            .map_err(|err| Error::CreateDirsError(err, root.path().to_owned()))?;
        debug!("opened maildir repository at {:?}", root.path());

        Ok(Self {
            config,
            root,
            index: EntryIndex::default(),
        })
    }

    pub fn config(&self) -> &MaildirConfig {
        &self.config
    }

    fn maildir(&self, folder: &str) -> Maildir {
        if folder.eq_ignore_ascii_case(INBOX) {
            return Maildir::from(self.root.path().to_owned());
        }

        let folder = encode_folder(folder);
        Maildir::from(self.root.path().join(format!(".{folder}")))
    }

    fn open(&self, folder: &FolderHandle) -> Result<Maildir> {
        let maildir = self.maildir(&folder.name);

        if is_maildir(maildir.path()) {
            Ok(maildir)
        } else {
            Err(Error::FolderNotFoundError(
                folder.name.clone(),
                maildir.path().to_owned(),
            ))
        }
    }

    /// Locates the message file, from the index first, then by
    /// scanning the Maildir.
    async fn locate(&self, maildir: &Maildir, id: &str) -> Option<Located> {
        if let Some(located) = self.index.get(maildir.path(), id).await {
            return Some(located);
        }

        debug!("maildir message {id} not indexed, scanning {:?}", maildir.path());
        let located = Located::from_entry(&maildir.find(id)?);
        self.index
            .insert(maildir.path(), id, located.clone())
            .await;
        Some(located)
    }
}

#[async_trait]
impl Repository for MaildirRepository {
    async fn list_folders(&self) -> crate::Result<Vec<String>> {
        let mut folders = Vec::new();

        if is_maildir(self.root.path()) {
            folders.push(INBOX.to_owned());
        }

        for maildir in self.root.list_subdirs() {
            let maildir = maildir
                .map_err(|err| Error::ListFoldersError(err, self.root.path().to_owned()))?;

            if !is_maildir(maildir.path()) {
                debug!("{:?} is not a maildir, skipping it", maildir.path());
                continue;
            }

            let name = maildir
                .path()
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();

            if let Some(name) = name.strip_prefix('.') {
                folders.push(decode_folder(name));
            }
        }

        Ok(folders)
    }

    async fn create_folder(&self, folder: &str) -> crate::Result<()> {
        debug!("creating maildir folder {folder}");
        let maildir = self.maildir(folder);
        maildir
            .create_dirs()
            .map_err(|err| Error::CreateDirsError(err, maildir.path().to_owned()))?;
        Ok(())
    }

    async fn open_folder(&self, folder: &str) -> crate::Result<FolderHandle> {
        let handle = FolderHandle::new(folder, None);
        self.open(&handle)?;
        Ok(handle)
    }

    #[instrument(skip_all, fields(folder = %folder.name))]
    async fn list_messages(&self, folder: &FolderHandle) -> crate::Result<Snapshot> {
        let maildir = self.open(folder)?;
        let mut envelopes = Vec::new();
        let mut located = HashMap::new();

        for entry in maildir.list_new().chain(maildir.list_cur()) {
            let entry = match entry {
                Ok(entry) => entry,
                // the message has been moved or deleted since the
                // directory listing
                Err(maildirpp::Error::IoError(err)) if err.kind() == io::ErrorKind::NotFound => {
                    debug!("maildir message vanished, skipping it");
                    continue;
                }
                Err(maildirpp::Error::GetSubfolderNameError) => {
                    warn!("maildir message without info in cur, skipping it");
                    continue;
                }
                Err(err) => {
                    let path = maildir.path().to_owned();
                    return Err(Error::ListMessagesError(err, path).into());
                }
            };

            let flags = Flags::from_maildir_str(entry.flags());
            let size = fs::metadata(entry.path())
                .map(|meta| meta.len())
                .unwrap_or_default();

            envelopes.push(Envelope::from_headers(
                entry.id(),
                flags,
                size,
                entry.headers(),
            ));
            located.insert(entry.id().to_owned(), Located::from_entry(&entry));
        }

        self.index.reset(maildir.path(), located).await;

        debug!("listed {} maildir envelopes", envelopes.len());
        Ok(Snapshot::new(None, envelopes))
    }

    async fn fetch_message(&self, folder: &FolderHandle, id: &str) -> crate::Result<Vec<u8>> {
        let maildir = self.open(folder)?;
        let located = self
            .locate(&maildir, id)
            .await
            .ok_or_else(|| Error::MessageNotFoundError(id.to_owned(), folder.name.clone()))?;

        let raw =
            fs::read(&located.path).map_err(|err| Error::ReadMessageError(err, located.path))?;

        Ok(raw)
    }

    async fn store_message(
        &self,
        folder: &FolderHandle,
        raw: &[u8],
        flags: &Flags,
    ) -> crate::Result<Option<Id>> {
        let maildir = self.open(folder)?;
        let info = flags.to_maildir_string();

        let id = maildir
            .store_cur_with_flags(raw, &info)
            .map_err(|err| Error::StoreMessageError(err, folder.name.clone()))?;
        debug!("stored maildir message {id} in {}", folder.name);

        let located = Located::cur(maildir.path(), &id, &info);
        self.index.insert(maildir.path(), &id, located).await;

        Ok(Some(id))
    }

    async fn set_flags(&self, folder: &FolderHandle, id: &str, flags: &Flags) -> crate::Result<()> {
        let maildir = self.open(folder)?;
        let located = self
            .locate(&maildir, id)
            .await
            .ok_or_else(|| Error::MessageNotFoundError(id.to_owned(), folder.name.clone()))?;

        let info = merge_info(&located.info, flags);

        if located.is_new {
            maildir
                .move_new_to_cur_with_flags(id, &info)
                .map_err(|err| Error::MoveMessageError(err, id.to_owned()))?;
        } else if located.info != info {
            let dst = index::cur_path(maildir.path(), id, &info);
            fs::rename(&located.path, &dst)
                .map_err(|err| Error::RenameMessageError(err, located.path.clone(), dst))?;
        }

        let located = Located::cur(maildir.path(), id, &info);
        self.index.insert(maildir.path(), id, located).await;

        Ok(())
    }

    async fn delete_message(&self, folder: &FolderHandle, id: &str) -> crate::Result<()> {
        let maildir = self.open(folder)?;

        let Some(located) = self.locate(&maildir, id).await else {
            debug!("maildir message {id} already deleted from {}", folder.name);
            return Ok(());
        };

        match fs::remove_file(&located.path) {
            Ok(()) => debug!("deleted maildir message {id} from {}", folder.name),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("maildir message {id} already deleted from {}", folder.name);
            }
            Err(err) => return Err(Error::DeleteMessageError(err, located.path).into()),
        }

        self.index.remove(maildir.path(), id).await;
        Ok(())
    }

    fn delimiter(&self) -> char {
        DELIMITER
    }

    fn supports_custom_flags(&self) -> bool {
        false
    }
}

/// Returns `true` if the directory has the `cur`, `new` and `tmp`
/// subdirectories.
fn is_maildir(path: &Path) -> bool {
    ["cur", "new", "tmp"]
        .iter()
        .all(|dir| path.join(dir).is_dir())
}

/// Replaces the flag characters of the given info, keeping the
/// characters this library does not know about.
fn merge_info(info: &str, flags: &Flags) -> String {
    let mut chars: Vec<char> = info
        .chars()
        .filter(|c| Flag::from_maildir_char(*c).is_none())
        .chain(flags.to_maildir_string().chars())
        .collect();
    chars.sort();
    chars.dedup();
    String::from_iter(chars)
}

/// URL-encode the given folder.
pub fn encode_folder(folder: impl AsRef<str>) -> String {
    urlencoding::encode(folder.as_ref()).to_string()
}

/// URL-decode the given folder.
pub fn decode_folder(folder: impl AsRef<str> + ToString) -> String {
    urlencoding::decode(folder.as_ref())
        .map(|folder| folder.to_string())
        .unwrap_or_else(|_| folder.to_string())
}
