//! # Synchronization
//!
//! Module dedicated to the scheduling of synchronization passes. The
//! main structure of this module is [`SyncBuilder`], which builds a
//! [`Sync`] scheduler out of account synchronizers.

pub mod report;

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{stream, StreamExt};
use thiserror::Error;
use tokio::{
    sync::Notify,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, trace};

use crate::{
    account::{config::AccountConfig, sync::AccountSync},
    config::SyncConfig,
    email::sync::EmailSyncHunk,
    folder::sync::{FolderName, FolderPair, FolderSyncHunk},
    imap::session::SessionFactory,
    Result,
};

#[doc(inline)]
pub use self::report::{SyncReport, SyncStatus};

/// Errors related to synchronization.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find default state directory")]
    GetStateDirError,
    #[error("cannot add account {0}: another account has the same name")]
    DuplicateAccountError(String),
}

/// The synchronization async event handler.
pub type SyncEventHandler =
    dyn Fn(SyncEvent) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + std::marker::Sync;

/// The synchronization event.
///
/// Represents all the events that can be triggered during the
/// synchronization process. Events are scoped by account name.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum SyncEvent {
    ListedFolders(String, usize, usize),
    ProcessedFolderHunk(String, FolderSyncHunk),
    SkippedFolder(String, FolderName),
    StartedFolder(String, FolderPair),
    ListedEnvelopes(String, FolderPair, usize, usize),
    UidValidityChanged(String, FolderPair, u32, u32),
    GeneratedEmailPatch(String, FolderPair, usize),
    ProcessedEmailHunk(String, EmailSyncHunk),
    FinishedFolder(String, FolderPair),
    FailedFolder(String, FolderPair, String),
    FinishedAccount(String),
    FinishedPass(SyncStatus),
}

impl SyncEvent {
    pub async fn emit(&self, handler: &Option<Arc<SyncEventHandler>>) {
        if let Some(handler) = handler.as_ref() {
            if let Err(err) = handler(self.clone()).await {
                debug!("error while emitting sync event: {err}");
                trace!("{err:?}");
            } else {
                trace!("emitted sync event {self:?}");
            }
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::ListedFolders(account, local, remote) => {
                write!(
                    f,
                    "Listed {local} local and {remote} remote folders ({account})"
                )
            }
            SyncEvent::ProcessedFolderHunk(_, hunk) => {
                write!(f, "{hunk}")
            }
            SyncEvent::SkippedFolder(account, folder) => {
                write!(f, "Skipped folder {folder} ({account})")
            }
            SyncEvent::StartedFolder(account, folder) => {
                write!(f, "Synchronizing folder {folder} ({account})")
            }
            SyncEvent::ListedEnvelopes(account, folder, local, remote) => {
                write!(
                    f,
                    "Listed {local} local and {remote} remote envelopes from {folder} ({account})"
                )
            }
            SyncEvent::UidValidityChanged(account, folder, previous, next) => {
                write!(
                    f,
                    "UID validity of {folder} changed from {previous} to {next} ({account})"
                )
            }
            SyncEvent::GeneratedEmailPatch(account, folder, n) => {
                write!(f, "Generated {n} email hunks for {folder} ({account})")
            }
            SyncEvent::ProcessedEmailHunk(_, hunk) => {
                write!(f, "{hunk}")
            }
            SyncEvent::FinishedFolder(account, folder) => {
                write!(f, "Synchronized folder {folder} ({account})")
            }
            SyncEvent::FailedFolder(account, folder, err) => {
                write!(f, "Cannot synchronize folder {folder} ({account}): {err}")
            }
            SyncEvent::FinishedAccount(account) => {
                write!(f, "Synchronized account {account}")
            }
            SyncEvent::FinishedPass(status) => {
                write!(f, "Finished synchronization pass: {status}")
            }
        }
    }
}

/// The cooperative cancellation signal.
///
/// Once cancelled, running folder passes finish the message
/// operation they are processing, then stop. No new folder, account
/// or pass starts.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        debug!("cancelling synchronization");
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        // stores a permit for a waiter not registered yet
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until the signal is cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}

/// The synchronization builder.
#[derive(Clone, Default)]
pub struct SyncBuilder {
    accounts: Vec<AccountSync>,
    max_accounts: Option<usize>,
    interval: Option<Duration>,
    handler: Option<Arc<SyncEventHandler>>,
    cancel: CancelSignal,
}

impl SyncBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder out of the given configuration. The given
    /// function provides the IMAP session factory of each account.
    pub fn from_config(
        config: SyncConfig,
        factory: impl Fn(&AccountConfig) -> Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        let state_dir = config.find_state_dir().ok_or(Error::GetStateDirError)?;
        debug!("using state directory {state_dir:?}");

        let mut builder = Self::new()
            .with_max_accounts(config.max_accounts)
            .with_some_interval(config.interval_secs.map(Duration::from_secs));

        for account in config.accounts {
            let factory = factory(&account);
            builder.add_account(AccountSync::from_config(account, factory, &state_dir)?)?;
        }

        Ok(builder)
    }

    /// Adds an account synchronizer. Account names need to be
    /// unique, since they scope the persisted UID mappings.
    pub fn add_account(&mut self, account: AccountSync) -> Result<()> {
        if self.accounts.iter().any(|a| a.name() == account.name()) {
            return Err(Error::DuplicateAccountError(account.name().to_owned()).into());
        }

        self.accounts.push(account);
        Ok(())
    }

    pub fn with_account(mut self, account: AccountSync) -> Result<Self> {
        self.add_account(account)?;
        Ok(self)
    }

    pub fn set_some_max_accounts(&mut self, max: Option<usize>) {
        self.max_accounts = max;
    }

    pub fn set_max_accounts(&mut self, max: usize) {
        self.set_some_max_accounts(Some(max));
    }

    pub fn with_some_max_accounts(mut self, max: Option<usize>) -> Self {
        self.set_some_max_accounts(max);
        self
    }

    pub fn with_max_accounts(mut self, max: usize) -> Self {
        self.set_max_accounts(max);
        self
    }

    pub fn get_max_accounts(&self) -> usize {
        self.max_accounts.unwrap_or(1).max(1)
    }

    pub fn set_some_interval(&mut self, interval: Option<Duration>) {
        self.interval = interval;
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.set_some_interval(Some(interval));
    }

    pub fn with_some_interval(mut self, interval: Option<Duration>) -> Self {
        self.set_some_interval(interval);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.set_interval(interval);
        self
    }

    pub fn set_some_handler<F: Future<Output = Result<()>> + Send + 'static>(
        &mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + std::marker::Sync + 'static>,
    ) {
        self.handler = match handler {
            Some(handler) => Some(Arc::new(move |evt| Box::pin(handler(evt)))),
            None => None,
        };
    }

    pub fn set_handler<F: Future<Output = Result<()>> + Send + 'static>(
        &mut self,
        handler: impl Fn(SyncEvent) -> F + Send + std::marker::Sync + 'static,
    ) {
        self.set_some_handler(Some(handler));
    }

    pub fn with_some_handler<F: Future<Output = Result<()>> + Send + 'static>(
        mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + std::marker::Sync + 'static>,
    ) -> Self {
        self.set_some_handler(handler);
        self
    }

    pub fn with_handler<F: Future<Output = Result<()>> + Send + 'static>(
        mut self,
        handler: impl Fn(SyncEvent) -> F + Send + std::marker::Sync + 'static,
    ) -> Self {
        self.set_handler(handler);
        self
    }

    /// Returns the signal cancelling the scheduler built by this
    /// builder.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn build(self) -> Sync {
        let max_accounts = self.get_max_accounts();
        let handler = self.handler;
        let cancel = self.cancel;

        let accounts = self
            .accounts
            .into_iter()
            .map(|account| {
                account
                    .with_some_event_handler(handler.clone())
                    .with_cancel_signal(cancel.clone())
            })
            .collect();

        Sync {
            accounts,
            max_accounts,
            interval: self.interval,
            handler,
            cancel,
        }
    }

    /// Builds the scheduler, then runs it until the end.
    pub async fn sync(self) -> SyncReport {
        self.build().run().await
    }
}

/// The synchronization scheduler.
pub struct Sync {
    accounts: Vec<AccountSync>,
    max_accounts: usize,
    interval: Option<Duration>,
    handler: Option<Arc<SyncEventHandler>>,
    cancel: CancelSignal,
}

impl Sync {
    pub fn accounts(&self) -> &[AccountSync] {
        &self.accounts
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Runs one synchronization pass over all accounts.
    pub async fn sync(&self) -> SyncReport {
        // accounts reached after a cancellation report it without syncing
        let mut accounts: Vec<_> = stream::iter(self.accounts.iter().enumerate())
            .map(|(i, account)| async move { (i, account.sync().await) })
            .buffer_unordered(self.max_accounts)
            .collect()
            .await;

        accounts.sort_by_key(|(i, _)| *i);

        let report = SyncReport {
            accounts: accounts.into_iter().map(|(_, report)| report).collect(),
        };

        info!(
            "synchronization pass finished: {} ({} copied, {} deleted, {} flags updated, {} errors)",
            report.status(),
            report.copied(),
            report.deleted(),
            report.flags_updated(),
            report.errors(),
        );

        SyncEvent::FinishedPass(report.status())
            .emit(&self.handler)
            .await;

        report
    }

    /// Runs synchronization passes, then closes the repositories.
    ///
    /// Without interval a single pass runs. With an interval, passes
    /// repeat until cancellation: a pass starts one interval after
    /// the start of the previous one, or right after the end of the
    /// previous one when it took longer than the interval. Returns
    /// the report of the last pass.
    pub async fn run(&self) -> SyncReport {
        let report = loop {
            let start = Instant::now();
            let report = self.sync().await;

            let interval = match self.interval {
                Some(interval) if !self.cancel.is_cancelled() => interval,
                _ => break report,
            };

            let next = start + interval;

            if Instant::now() >= next {
                debug!("pass took longer than {interval:?}, starting next one");
                continue;
            }

            tokio::select! {
                _ = sleep_until(next) => (),
                _ = self.cancel.cancelled() => break report,
            }
        };

        self.close().await;
        report
    }

    /// Releases the resources held by all accounts.
    pub async fn close(&self) {
        debug!("closing {} accounts", self.accounts.len());

        stream::iter(&self.accounts)
            .for_each_concurrent(None, |account| account.close())
            .await;
    }
}
