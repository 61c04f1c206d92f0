//! Module dedicated to the IMAP repository.
//!
//! The remote side of the synchronization. Every action goes through
//! the [`SessionPool`], and every message action first selects the
//! mailbox and checks its UID validity against the one captured when
//! the folder was opened, so that UIDs are never used across epochs.

pub mod config;
pub mod pool;
pub mod session;

use std::{num::ParseIntError, result, sync::Arc};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    envelope::{Envelope, Id, Snapshot},
    flag::Flags,
    repository::{FolderHandle, Repository},
    ErrorKind,
};

use self::{
    config::ImapConfig,
    pool::{Session, SessionPool},
    session::{SelectedMailbox, SessionFactory},
};

/// The default mailbox hierarchy delimiter.
pub const DEFAULT_DELIMITER: char = '/';

/// Errors related to the IMAP repository.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    SessionError(#[from] session::Error),
    #[error("cannot execute IMAP action after {0} retries")]
    RetriesExhaustedError(u8, #[source] session::Error),
    #[error("cannot execute IMAP action: session pool closed")]
    PoolClosedError,
    #[error("cannot parse IMAP UID {1}")]
    ParseUidError(#[source] ParseIntError, String),
    #[error("cannot find IMAP message {0} in mailbox {1}")]
    MessageNotFoundError(u32, String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionError(err) => err.kind(),
            Self::RetriesExhaustedError(..) => ErrorKind::Connectivity,
            Self::MessageNotFoundError(..) => ErrorKind::NotFound,
            Self::PoolClosedError | Self::ParseUidError(..) => ErrorKind::Other,
        }
    }
}

/// The `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The IMAP repository.
pub struct ImapRepository {
    config: Arc<ImapConfig>,
    pool: SessionPool,
    delimiter: OnceCell<char>,
}

impl ImapRepository {
    pub fn new(config: Arc<ImapConfig>, factory: Arc<dyn SessionFactory>) -> Self {
        let pool = SessionPool::new(factory, config.max_sessions, config.retry.clone());

        Self {
            config,
            pool,
            delimiter: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ImapConfig {
        &self.config
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }
}

/// Selects the given mailbox and makes sure its UID validity did not
/// change since it was opened.
async fn select_checked(
    session: &mut Session,
    mailbox: &str,
    expected: Option<u32>,
) -> session::Result<SelectedMailbox> {
    let selected = session.select(mailbox).await?;

    match expected {
        Some(expected) if expected != selected.uid_validity => Err(
            session::Error::UidValidityChangedError(
                mailbox.to_owned(),
                expected,
                selected.uid_validity,
            ),
        ),
        _ => Ok(selected),
    }
}

fn parse_uid(id: &str) -> Result<u32> {
    id.parse()
        .map_err(|err| Error::ParseUidError(err, id.to_owned()))
}

#[async_trait]
impl Repository for ImapRepository {
    async fn list_folders(&self) -> crate::Result<Vec<String>> {
        let subscribed_only = self.config.subscribed_only;

        let mailboxes = self
            .pool
            .exec(move |session| {
                Box::pin(async move { session.list(subscribed_only).await })
            })
            .await?;

        if let Some(delimiter) = mailboxes.iter().find_map(|mailbox| mailbox.delimiter) {
            let _ = self.delimiter.set(delimiter);
        }

        let folders = mailboxes
            .into_iter()
            .filter(|mailbox| {
                let selectable = mailbox.is_selectable();
                if !selectable {
                    debug!("skipping non-selectable IMAP mailbox {}", mailbox.name);
                }
                selectable
            })
            .map(|mailbox| mailbox.name)
            .collect();

        Ok(folders)
    }

    async fn create_folder(&self, folder: &str) -> crate::Result<()> {
        debug!("creating IMAP mailbox {folder}");
        let mailbox = folder.to_owned();

        self.pool
            .exec(move |session| {
                let mailbox = mailbox.clone();
                Box::pin(async move { session.create(&mailbox).await })
            })
            .await?;

        Ok(())
    }

    async fn open_folder(&self, folder: &str) -> crate::Result<FolderHandle> {
        let mailbox = folder.to_owned();

        let selected = self
            .pool
            .exec(move |session| {
                let mailbox = mailbox.clone();
                Box::pin(async move { session.select(&mailbox).await })
            })
            .await?;

        Ok(FolderHandle::new(folder, Some(selected.uid_validity)))
    }

    #[instrument(skip_all, fields(folder = %folder.name))]
    async fn list_messages(&self, folder: &FolderHandle) -> crate::Result<Snapshot> {
        let mailbox = folder.name.clone();
        let expected = folder.uid_validity;

        let (selected, metas) = self
            .pool
            .exec(move |session| {
                let mailbox = mailbox.clone();
                Box::pin(async move {
                    let selected = select_checked(session, &mailbox, expected).await?;
                    let metas = session.fetch_meta().await?;
                    Ok::<_, session::Error>((selected, metas))
                })
            })
            .await?;

        let envelopes = metas.into_iter().map(|meta| {
            let flags = Flags::from_imap_flags(&meta.flags);
            Envelope::from_headers(meta.uid, flags, meta.size, &meta.headers)
        });

        let snapshot = Snapshot::new(Some(selected.uid_validity), envelopes);
        debug!("listed {} IMAP envelopes", snapshot.len());
        Ok(snapshot)
    }

    async fn fetch_message(&self, folder: &FolderHandle, id: &str) -> crate::Result<Vec<u8>> {
        let uid = parse_uid(id)?;
        let mailbox = folder.name.clone();
        let expected = folder.uid_validity;

        let raw = self
            .pool
            .exec(move |session| {
                let mailbox = mailbox.clone();
                Box::pin(async move {
                    select_checked(session, &mailbox, expected).await?;
                    session.fetch_body(uid).await
                })
            })
            .await?;

        Ok(raw.ok_or_else(|| Error::MessageNotFoundError(uid, folder.name.clone()))?)
    }

    async fn store_message(
        &self,
        folder: &FolderHandle,
        raw: &[u8],
        flags: &Flags,
    ) -> crate::Result<Option<Id>> {
        let mailbox = folder.name.clone();
        let expected = folder.uid_validity;
        let raw: Arc<[u8]> = Arc::from(raw);
        let flags = Arc::new(flags.to_imap_flags());

        let uid = self
            .pool
            .exec(move |session| {
                let mailbox = mailbox.clone();
                let raw = raw.clone();
                let flags = flags.clone();
                Box::pin(async move {
                    select_checked(session, &mailbox, expected).await?;
                    session.append(&mailbox, &raw, &flags).await
                })
            })
            .await?;

        match uid {
            Some(uid) => debug!("appended IMAP message {uid} to {}", folder.name),
            None => debug!("appended IMAP message to {}, UID unknown", folder.name),
        }

        Ok(uid.map(|uid| uid.to_string()))
    }

    async fn set_flags(&self, folder: &FolderHandle, id: &str, flags: &Flags) -> crate::Result<()> {
        let uid = parse_uid(id)?;
        let mailbox = folder.name.clone();
        let expected = folder.uid_validity;
        let flags = Arc::new(flags.to_imap_flags());

        self.pool
            .exec(move |session| {
                let mailbox = mailbox.clone();
                let flags = flags.clone();
                Box::pin(async move {
                    select_checked(session, &mailbox, expected).await?;
                    session.store_flags(uid, &flags).await
                })
            })
            .await?;

        Ok(())
    }

    async fn delete_message(&self, folder: &FolderHandle, id: &str) -> crate::Result<()> {
        let uid = parse_uid(id)?;
        let mailbox = folder.name.clone();
        let expected = folder.uid_validity;
        let expunge = self.config.expunge;

        self.pool
            .exec(move |session| {
                let mailbox = mailbox.clone();
                Box::pin(async move {
                    select_checked(session, &mailbox, expected).await?;
                    session.add_flags(uid, &[String::from("\\Deleted")]).await?;
                    if expunge {
                        session.expunge_uid(uid).await?;
                    }
                    Ok::<_, session::Error>(())
                })
            })
            .await?;

        Ok(())
    }

    fn delimiter(&self) -> char {
        self.config
            .delimiter
            .or_else(|| self.delimiter.get().copied())
            .unwrap_or(DEFAULT_DELIMITER)
    }

    fn supports_custom_flags(&self) -> bool {
        true
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
