//! Module dedicated to account synchronization.
//!
//! The core concept of this module is the [`AccountSync`], which
//! resolves the folders of an account out of both repositories, then
//! synchronizes them using a pool of folder workers.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{Duration, Utc};
use futures::{lock::Mutex, stream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    email::sync::{EmailSyncPatchOptions, EmailSyncReport, FolderSync},
    folder::{
        self,
        sync::{FolderName, FolderPair, FolderSyncHunk},
        FolderFilter,
    },
    imap::{session::SessionFactory, ImapRepository},
    maildir::MaildirRepository,
    repository::{Backend, Repository},
    sync::{CancelSignal, SyncEvent, SyncEventHandler},
    uid_map::{self, UidMapStore},
    ErrorKind, Result,
};

use super::config::AccountConfig;

/// Errors related to account synchronization.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot list local folders of account {1}")]
    ListLocalFoldersError(#[source] Box<crate::Error>, String),
    #[error("cannot list remote folders of account {1}")]
    ListRemoteFoldersError(#[source] Box<crate::Error>, String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ListLocalFoldersError(err, _) | Self::ListRemoteFoldersError(err, _) => {
                err.kind()
            }
        }
    }
}

/// The synchronization destination.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Destination {
    /// An item needs to be synchronized to the local Maildir.
    Local,

    /// An item needs to be synchronized remotely.
    Remote,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Alias for the source destination.
pub type Source = Destination;

/// Alias for the target destination.
pub type Target = Destination;

/// The outcome of the synchronization of one folder.
#[derive(Debug)]
pub enum FolderSyncOutcome {
    /// The folder pass completed.
    Synced(EmailSyncReport),

    /// The folder was already being synchronized by another pass.
    Skipped,

    /// The folder pass aborted. Nothing was persisted for it.
    Failed(crate::Error),

    /// The synchronization was cancelled before the folder pass
    /// started.
    Cancelled,
}

/// The account synchronization report.
#[derive(Debug, Default)]
pub struct AccountSyncReport {
    /// The name of the account.
    pub account: String,

    /// The error preventing the account from being synchronized at
    /// all, if any.
    pub unreachable: Option<crate::Error>,

    /// The list of processed folder hunks associated with an
    /// optional error.
    pub folder_patch: Vec<(FolderSyncHunk, Option<crate::Error>)>,

    /// The folders existing on one side only and not allowed to be
    /// created on the other side.
    pub skipped_folders: Vec<FolderName>,

    /// The outcome of each synchronized folder.
    pub folders: Vec<(FolderPair, FolderSyncOutcome)>,

    /// `true` if the synchronization was cancelled before the account
    /// pass started.
    pub cancelled: bool,
}

impl AccountSyncReport {
    pub fn new(account: impl ToString) -> Self {
        Self {
            account: account.to_string(),
            ..Default::default()
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.unreachable.is_some()
    }

    /// Returns `true` if the account, or one of its folders, was not
    /// fully synchronized because of a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
            || self.folders.iter().any(|(_, outcome)| match outcome {
                FolderSyncOutcome::Cancelled => true,
                FolderSyncOutcome::Synced(report) => report.cancelled,
                _ => false,
            })
    }

    fn synced(&self) -> impl Iterator<Item = &EmailSyncReport> {
        self.folders.iter().filter_map(|(_, outcome)| match outcome {
            FolderSyncOutcome::Synced(report) => Some(report),
            _ => None,
        })
    }

    /// Counts the folders that could not be synchronized, including
    /// the ones that could not be created.
    pub fn errors(&self) -> usize {
        let failed_folders = self
            .folders
            .iter()
            .filter(|(_, outcome)| matches!(outcome, FolderSyncOutcome::Failed(_)))
            .count();

        let failed_hunks = self
            .folder_patch
            .iter()
            .filter(|(_, err)| err.is_some())
            .count();

        failed_folders + failed_hunks
    }

    pub fn copied(&self) -> usize {
        self.synced().map(EmailSyncReport::copied).sum()
    }

    pub fn deleted(&self) -> usize {
        self.synced().map(EmailSyncReport::deleted).sum()
    }

    pub fn flags_updated(&self) -> usize {
        self.synced().map(EmailSyncReport::flags_updated).sum()
    }
}

/// Returns the directory holding the UID mappings of the given
/// account.
pub fn uid_maps_dir(state_dir: impl AsRef<Path>, account: &str) -> PathBuf {
    state_dir
        .as_ref()
        .join(urlencoding::encode(account).as_ref())
}

/// The account synchronizer.
///
/// Cloning is cheap: repositories and the UID mapping store are
/// shared between clones, which is how folder workers access them.
#[derive(Clone)]
pub struct AccountSync {
    config: Arc<AccountConfig>,
    filter: Arc<FolderFilter>,
    local: Arc<Backend>,
    remote: Arc<Backend>,
    uid_maps: Arc<UidMapStore>,
    handler: Option<Arc<SyncEventHandler>>,
    cancel: CancelSignal,
}

impl AccountSync {
    pub fn new(
        config: AccountConfig,
        local: impl Into<Backend>,
        remote: impl Into<Backend>,
        uid_maps: UidMapStore,
    ) -> Result<Self> {
        let filter = FolderFilter::try_from(&config.folder.filter)?;

        Ok(Self {
            config: Arc::new(config),
            filter: Arc::new(filter),
            local: Arc::new(local.into()),
            remote: Arc::new(remote.into()),
            uid_maps: Arc::new(uid_maps),
            handler: None,
            cancel: CancelSignal::default(),
        })
    }

    /// Builds the synchronizer of an account out of its
    /// configuration. IMAP sessions are opened with the given
    /// factory, UID mappings are persisted under the given state
    /// directory.
    pub fn from_config(
        config: AccountConfig,
        factory: Arc<dyn SessionFactory>,
        state_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let local = MaildirRepository::new(Arc::new(config.local.clone()))?;
        let remote = ImapRepository::new(Arc::new(config.remote.clone()), factory);
        let uid_maps = UidMapStore::new(uid_maps_dir(state_dir, &config.name))?;
        Self::new(config, local, remote, uid_maps)
    }

    pub fn set_some_event_handler(&mut self, handler: Option<Arc<SyncEventHandler>>) {
        self.handler = handler;
    }

    pub fn with_some_event_handler(mut self, handler: Option<Arc<SyncEventHandler>>) -> Self {
        self.set_some_event_handler(handler);
        self
    }

    pub fn set_cancel_signal(&mut self, cancel: CancelSignal) {
        self.cancel = cancel;
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.set_cancel_signal(cancel);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn local(&self) -> &Backend {
        &self.local
    }

    pub fn remote(&self) -> &Backend {
        &self.remote
    }

    fn patch_options(&self) -> EmailSyncPatchOptions {
        EmailSyncPatchOptions {
            hold: self.config.hold,
            custom_flags: self.local.supports_custom_flags()
                && self.remote.supports_custom_flags(),
            max_size: self.config.max_size,
            not_before: self
                .config
                .max_age
                .map(|days| (Utc::now() - Duration::days(days.into())).into()),
        }
    }

    /// Runs one synchronization pass over the account.
    ///
    /// Never fails: an unreachable account and failing folders are
    /// recorded in the report.
    #[instrument(skip_all, fields(account = %self.config.name))]
    pub async fn sync(&self) -> AccountSyncReport {
        let account = &self.config.name;
        let mut report = AccountSyncReport::new(account);

        if self.cancel.is_cancelled() {
            debug!("synchronization cancelled, skipping account {account}");
            report.cancelled = true;
            return report;
        }

        info!("synchronizing account {account}");

        let (local_folders, remote_folders) =
            tokio::join!(self.local.list_folders(), self.remote.list_folders());

        let folders = match (local_folders, remote_folders) {
            (Ok(local), Ok(remote)) => Ok((local, remote)),
            (Err(err), _) => Err(Error::ListLocalFoldersError(Box::new(err), account.clone())),
            (_, Err(err)) => Err(Error::ListRemoteFoldersError(Box::new(err), account.clone())),
        };

        let (local_folders, remote_folders) = match folders {
            Ok(folders) => folders,
            Err(err) => {
                warn!("{err}, skipping account");
                trace!("{err:?}");
                report.unreachable = Some(err.into());
                SyncEvent::FinishedAccount(account.clone())
                    .emit(&self.handler)
                    .await;
                return report;
            }
        };

        SyncEvent::ListedFolders(account.clone(), local_folders.len(), remote_folders.len())
            .emit(&self.handler)
            .await;

        let patch = folder::sync::build_patch(
            &self.config.folder,
            &self.filter,
            local_folders,
            self.local.delimiter(),
            remote_folders,
            self.remote.delimiter(),
        );

        for folder in &patch.skipped {
            SyncEvent::SkippedFolder(account.clone(), folder.clone())
                .emit(&self.handler)
                .await;
        }
        report.skipped_folders = patch.skipped;

        let mut pairs = patch.pairs;

        for (hunk, pair) in patch.hunks {
            debug!("processing {hunk}");

            let res = if self.config.dry_run {
                // a folder that does not exist cannot be listed
                pairs.retain(|p| p != &pair);
                Ok(())
            } else {
                match &hunk {
                    FolderSyncHunk::Create(folder, Destination::Local) => {
                        self.local.create_folder(folder).await
                    }
                    FolderSyncHunk::Create(folder, Destination::Remote) => {
                        self.remote.create_folder(folder).await
                    }
                }
            };

            SyncEvent::ProcessedFolderHunk(account.clone(), hunk.clone())
                .emit(&self.handler)
                .await;

            match res {
                Ok(()) => report.folder_patch.push((hunk, None)),
                Err(err) => {
                    warn!("cannot process folder hunk {hunk}: {err}");
                    trace!("{err:?}");
                    pairs.retain(|p| p != &pair);
                    report.folder_patch.push((hunk, Some(err)));
                }
            }
        }

        report.folders = self.process_folders(pairs).await;

        SyncEvent::FinishedAccount(account.clone())
            .emit(&self.handler)
            .await;

        report
    }

    /// Synchronizes the given folders using a pool of workers.
    async fn process_folders(
        &self,
        mut pairs: Vec<FolderPair>,
    ) -> Vec<(FolderPair, FolderSyncOutcome)> {
        let pool_size = self.config.max_folders.max(1);

        // workers pop folders from the end
        pairs.reverse();
        let pairs = Arc::new(Mutex::new(pairs));

        let mut outcomes = stream::iter(0..pool_size)
            .map(|id| {
                let worker = self.clone();
                let pairs = pairs.clone();
                tokio::spawn(async move { worker.process_pairs(id, pairs).await })
            })
            .buffer_unordered(pool_size)
            .filter_map(|outcomes| async {
                match outcomes {
                    Ok(outcomes) => Some(outcomes),
                    Err(err) => {
                        debug!("cannot join folder sync worker: {err}");
                        trace!("{err:?}");
                        None
                    }
                }
            })
            .fold(Vec::new(), |mut all, outcomes| async {
                all.extend(outcomes);
                all
            })
            .await;

        // folders left by the workers after a cancellation
        let left: Vec<_> = pairs.lock().await.drain(..).collect();
        if !left.is_empty() {
            debug!("{} folders left unsynchronized", left.len());
        }
        outcomes.extend(
            left.into_iter()
                .map(|pair| (pair, FolderSyncOutcome::Cancelled)),
        );

        outcomes.sort_by(|(a, _), (b, _)| a.remote.cmp(&b.remote));
        outcomes
    }

    /// Takes a folder from the given list and synchronizes it, then
    /// loops until there is no more folder in the list or the
    /// synchronization is cancelled.
    async fn process_pairs(
        self,
        id: usize,
        pairs: Arc<Mutex<Vec<FolderPair>>>,
    ) -> Vec<(FolderPair, FolderSyncOutcome)> {
        let mut outcomes = Vec::new();

        loop {
            if self.cancel.is_cancelled() {
                debug!("folder sync worker {id} cancelled");
                break;
            }

            // wrap in a block to free the lock as quickly as possible
            let pair = {
                let mut lock = pairs.lock().await;
                lock.pop()
            };

            match pair {
                None => {
                    debug!("folder sync worker {id} stopping work");
                    break;
                }
                Some(pair) => {
                    debug!("folder sync worker {id} processing folder {pair}");
                    let outcome = self.sync_folder(&pair).await;
                    outcomes.push((pair, outcome));
                }
            }
        }

        outcomes
    }

    async fn sync_folder(&self, pair: &FolderPair) -> FolderSyncOutcome {
        let account = &self.config.name;

        SyncEvent::StartedFolder(account.clone(), pair.clone())
            .emit(&self.handler)
            .await;

        let mut rerun = false;

        let outcome = loop {
            let folder_sync = FolderSync::new(
                account,
                pair.clone(),
                self.local.clone(),
                self.remote.clone(),
                self.uid_maps.clone(),
            )
            .with_options(self.patch_options())
            .with_dry_run(self.config.dry_run)
            .with_some_event_handler(self.handler.clone())
            .with_cancel_signal(self.cancel.clone());

            match folder_sync.sync().await {
                Ok(report) => break FolderSyncOutcome::Synced(report),
                Err(crate::Error::UidMapError(uid_map::Error::FolderBusyError(_))) => {
                    debug!("folder {pair} is already being synchronized, skipping it");
                    break FolderSyncOutcome::Skipped;
                }
                Err(err) if err.kind() == ErrorKind::UidValidityChanged && !rerun => {
                    warn!("UID validity of folder {pair} changed during the pass, running it again");
                    trace!("{err:?}");
                    rerun = true;
                }
                Err(err) => {
                    warn!("cannot synchronize folder {pair}: {err}");
                    trace!("{err:?}");
                    break FolderSyncOutcome::Failed(err);
                }
            }
        };

        let event = match &outcome {
            FolderSyncOutcome::Synced(_) => {
                SyncEvent::FinishedFolder(account.clone(), pair.clone())
            }
            FolderSyncOutcome::Skipped | FolderSyncOutcome::Cancelled => {
                SyncEvent::SkippedFolder(account.clone(), pair.remote.clone())
            }
            FolderSyncOutcome::Failed(err) => {
                SyncEvent::FailedFolder(account.clone(), pair.clone(), err.to_string())
            }
        };
        event.emit(&self.handler).await;

        outcome
    }

    /// Releases the resources held by both repositories.
    pub async fn close(&self) {
        tokio::join!(self.local.close(), self.remote.close());
    }
}
