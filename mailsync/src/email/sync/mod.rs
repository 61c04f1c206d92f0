//! # Email synchronization
//!
//! Module dedicated to the synchronization of the emails of one
//! folder. The main structure of this module is [`FolderSync`].

pub mod hunk;
pub mod patch;
pub mod report;

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    account::sync::Destination,
    envelope::{Envelope, Id},
    flag::Flags,
    folder::sync::FolderPair,
    repository::{Backend, FolderHandle, Repository},
    sync::{CancelSignal, SyncEvent, SyncEventHandler},
    uid_map::{LoadStatus, UidMap, UidMapStore},
    ErrorKind, Result,
};

#[doc(inline)]
pub use self::{
    hunk::EmailSyncHunk,
    patch::{build_patch, EmailSyncPatch, EmailSyncPatchOptions},
    report::EmailSyncReport,
};

/// Errors related to email synchronization.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot synchronize folder {0}: remote side has no UID validity")]
    MissingUidValidityError(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingUidValidityError(_) => ErrorKind::Other,
        }
    }
}

/// A message copied to the remote side whose UID is not known yet.
struct UnresolvedCopy {
    local_id: Id,
    content_id: String,
    flags: Flags,
}

/// The folder synchronizer.
///
/// Makes one folder converge between the local and the remote
/// repositories. A pass opens the UID mapping of the folder, takes a
/// snapshot of both sides, builds the patch, applies it hunk by hunk,
/// then saves the new mapping. The mapping is saved only if the whole
/// patch was applied: an aborted or cancelled pass persists nothing,
/// and the next pass re-binds already copied messages by content.
pub struct FolderSync {
    account: String,
    pair: FolderPair,
    local: Arc<Backend>,
    remote: Arc<Backend>,
    uid_maps: Arc<UidMapStore>,
    options: EmailSyncPatchOptions,
    dry_run: bool,
    handler: Option<Arc<SyncEventHandler>>,
    cancel: CancelSignal,
}

impl FolderSync {
    pub fn new(
        account: impl ToString,
        pair: FolderPair,
        local: Arc<Backend>,
        remote: Arc<Backend>,
        uid_maps: Arc<UidMapStore>,
    ) -> Self {
        let options = EmailSyncPatchOptions {
            custom_flags: local.supports_custom_flags() && remote.supports_custom_flags(),
            ..Default::default()
        };

        Self {
            account: account.to_string(),
            pair,
            local,
            remote,
            uid_maps,
            options,
            dry_run: false,
            handler: None,
            cancel: CancelSignal::default(),
        }
    }

    pub fn with_options(mut self, options: EmailSyncPatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_some_event_handler(mut self, handler: Option<Arc<SyncEventHandler>>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn pair(&self) -> &FolderPair {
        &self.pair
    }

    /// Runs one synchronization pass over the folder.
    #[instrument(skip_all, fields(account = %self.account, folder = %self.pair))]
    pub async fn sync(&self) -> Result<EmailSyncReport> {
        let mut uid_map = self.uid_maps.try_open(&self.pair.remote)?;

        let (local_folder, remote_folder) = tokio::try_join!(
            self.local.open_folder(&self.pair.local),
            self.remote.open_folder(&self.pair.remote),
        )?;

        let (local, remote) = tokio::try_join!(
            self.local.list_messages(&local_folder),
            self.remote.list_messages(&remote_folder),
        )?;

        SyncEvent::ListedEnvelopes(
            self.account.clone(),
            self.pair.clone(),
            local.len(),
            remote.len(),
        )
        .emit(&self.handler)
        .await;

        let uid_validity = remote
            .uid_validity
            .or(remote_folder.uid_validity)
            .ok_or_else(|| Error::MissingUidValidityError(self.pair.remote.clone()))?;

        let loaded = uid_map.load(uid_validity)?;

        match loaded.status {
            LoadStatus::UidValidityChanged { previous } => {
                info!("UID validity changed from {previous} to {uid_validity}, re-matching emails");
                SyncEvent::UidValidityChanged(
                    self.account.clone(),
                    self.pair.clone(),
                    previous,
                    uid_validity,
                )
                .emit(&self.handler)
                .await;

                // mappings of the previous epoch must never be used again
                if !self.dry_run {
                    uid_map.invalidate()?;
                }
            }
            LoadStatus::Recovered => {
                warn!("UID mapping recreated, re-matching emails");
            }
            LoadStatus::Fresh | LoadStatus::Trusted => (),
        }

        let mut report = EmailSyncReport {
            uid_map: loaded.status,
            ..Default::default()
        };

        let mut map = loaded.map;
        let patch = build_patch(&self.pair.remote, &local, &remote, &map, &self.options);

        SyncEvent::GeneratedEmailPatch(self.account.clone(), self.pair.clone(), patch.len())
            .emit(&self.handler)
            .await;

        if self.dry_run {
            debug!("dry run enabled, skipping {} hunks", patch.len());
            report.dry_run = true;
            report.patch = patch.into_iter().map(|hunk| (hunk, None)).collect();
            return Ok(report);
        }

        let mut unresolved = Vec::new();
        let mut hunks = patch.into_iter();

        while let Some(hunk) = hunks.next() {
            if self.cancel.is_cancelled() {
                debug!("cancelled with {} hunks left", hunks.len() + 1);
                report.cancelled = true;
                break;
            }

            debug!("processing {hunk}");

            let res = self
                .apply_hunk(&hunk, &local_folder, &remote_folder, &mut map, &mut unresolved)
                .await;

            SyncEvent::ProcessedEmailHunk(self.account.clone(), hunk.clone())
                .emit(&self.handler)
                .await;

            match res {
                Ok(()) => report.patch.push((hunk, None)),
                Err(err) if err.is_not_found() => {
                    debug!("skipping hunk {hunk}: {err}");
                    trace!("{err:?}");
                    report.patch.push((hunk, Some(err)));
                }
                Err(err) => return Err(err),
            }
        }

        if report.cancelled {
            debug!("UID mapping left untouched");
            return Ok(report);
        }

        if !unresolved.is_empty() {
            self.resolve_copies(&remote_folder, &mut map, unresolved)
                .await?;
        }

        uid_map.save(&map, uid_validity)?;

        Ok(report)
    }

    fn side<'a>(
        &'a self,
        dest: &Destination,
        local_folder: &'a FolderHandle,
        remote_folder: &'a FolderHandle,
    ) -> (&'a Backend, &'a FolderHandle) {
        match dest {
            Destination::Local => (self.local.as_ref(), local_folder),
            Destination::Remote => (self.remote.as_ref(), remote_folder),
        }
    }

    async fn apply_hunk(
        &self,
        hunk: &EmailSyncHunk,
        local_folder: &FolderHandle,
        remote_folder: &FolderHandle,
        map: &mut UidMap,
        unresolved: &mut Vec<UnresolvedCopy>,
    ) -> Result<()> {
        match hunk {
            EmailSyncHunk::Bind(_, local_id, remote_id, flags) => {
                map.insert(local_id.clone(), remote_id.clone(), flags.clone());
            }
            EmailSyncHunk::Copy(_, envelope, source, target) => {
                let (src, src_folder) = self.side(source, local_folder, remote_folder);
                let (dst, dst_folder) = self.side(target, local_folder, remote_folder);

                let raw = src.fetch_message(src_folder, &envelope.id).await?;
                let id = dst.store_message(dst_folder, &raw, &envelope.flags).await?;
                let flags = self.options.syncable(&envelope.flags);

                match (source, id) {
                    (Destination::Local, Some(remote_id)) => {
                        map.insert(envelope.id.clone(), remote_id, flags);
                    }
                    (Destination::Remote, Some(local_id)) => {
                        map.insert(local_id, envelope.id.clone(), flags);
                    }
                    (Destination::Local, None) => unresolved.push(UnresolvedCopy {
                        local_id: envelope.id.clone(),
                        content_id: envelope.content_id.clone(),
                        flags,
                    }),
                    (Destination::Remote, None) => {
                        debug!("local id of email {} unknown, binding it later", envelope.id);
                    }
                }
            }
            EmailSyncHunk::Delete(_, id, target) => {
                let (repo, folder) = self.side(target, local_folder, remote_folder);
                repo.delete_message(folder, id).await?;
            }
            EmailSyncHunk::Unmap(_, local_id) => {
                map.remove_by_local_id(local_id);
            }
            EmailSyncHunk::UpdateFlags(_, id, flags, target) => {
                let (repo, folder) = self.side(target, local_folder, remote_folder);
                repo.set_flags(folder, id, flags).await?;
            }
            EmailSyncHunk::Remember(_, local_id, flags) => {
                map.set_flags(local_id, flags.clone());
            }
        }

        Ok(())
    }

    /// Discovers the UIDs of messages appended to a server that did
    /// not return them, by listing the folder again and matching
    /// unmapped messages by content. Copies that cannot be resolved
    /// stay unmapped: the next pass binds them.
    async fn resolve_copies(
        &self,
        remote_folder: &FolderHandle,
        map: &mut UidMap,
        unresolved: Vec<UnresolvedCopy>,
    ) -> Result<()> {
        debug!("discovering UIDs of {} copied emails", unresolved.len());

        let remote = self.remote.list_messages(remote_folder).await?;

        let mut candidates: Vec<&Envelope> = remote
            .envelopes
            .values()
            .filter(|envelope| !map.contains_remote_id(&envelope.id))
            .collect();
        candidates.sort_by_key(|envelope| envelope.id.parse::<u64>().unwrap_or_default());

        let mut by_content_id: HashMap<&str, VecDeque<&Envelope>> = HashMap::new();
        for envelope in candidates {
            by_content_id
                .entry(envelope.content_id.as_str())
                .or_default()
                .push_back(envelope);
        }

        for copy in unresolved {
            // most recent first, appended messages get the highest UIDs
            let remote = by_content_id
                .get_mut(copy.content_id.as_str())
                .and_then(VecDeque::pop_back);

            match remote {
                Some(remote) => {
                    debug!("discovered UID {} of local email {}", remote.id, copy.local_id);
                    map.insert(copy.local_id, remote.id.clone(), copy.flags);
                }
                None => {
                    debug!("cannot discover UID of local email {}, binding it later", copy.local_id);
                }
            }
        }

        Ok(())
    }
}
