//! Module dedicated to email synchronization patch.
//!
//! The core function of the module is [`build_patch`], which compares
//! both snapshots of a folder against the UID mapping and returns the
//! list of changes (hunks) that make the folder converge. Building a
//! patch has no side effect: applying it is the job of the
//! [`FolderSync`](super::FolderSync).

use std::{
    cmp::Ordering,
    collections::{HashMap, VecDeque},
};

use chrono::{DateTime, FixedOffset};
use tracing::{debug, trace};

use crate::{
    account::{config::HoldPolicy, sync::Destination},
    envelope::{Envelope, Snapshot},
    flag::{self, Flag, Flags},
    uid_map::UidMap,
};

use super::hunk::EmailSyncHunk;

/// An email synchronization patch is just a list of email
/// synchronization hunks (changes), in the order they need to be
/// applied.
pub type EmailSyncPatch = Vec<EmailSyncHunk>;

/// The options driving the patch generation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EmailSyncPatchOptions {
    /// The one-way hold policy of the account.
    pub hold: HoldPolicy,

    /// Whether custom flags can be synchronized, which requires both
    /// sides to support them.
    pub custom_flags: bool,

    /// Messages bigger than this size are not copied.
    pub max_size: Option<u64>,

    /// Messages dated before this date are left untouched on both
    /// sides: they are neither copied, deleted nor updated.
    pub not_before: Option<DateTime<FixedOffset>>,
}

impl EmailSyncPatchOptions {
    fn is_syncable(&self, flag: &Flag) -> bool {
        self.custom_flags || !matches!(flag, Flag::Custom(_))
    }

    /// Keeps only the flags both sides can hold.
    pub fn syncable(&self, flags: &Flags) -> Flags {
        flags
            .iter()
            .filter(|flag| self.is_syncable(flag))
            .cloned()
            .collect()
    }

    /// Adds the flags of one side that cannot be synchronized to the
    /// given synced flags, so that they are never cleared.
    fn with_unsyncable(&self, synced: &Flags, flags: &Flags) -> Flags {
        synced
            .iter()
            .chain(flags.iter().filter(|flag| !self.is_syncable(flag)))
            .cloned()
            .collect()
    }

    fn is_too_big(&self, envelope: &Envelope) -> bool {
        matches!(self.max_size, Some(max) if envelope.size > max)
    }

    fn is_too_old(&self, envelope: &Envelope) -> bool {
        matches!(&self.not_before, Some(date) if envelope.is_older_than(date))
    }
}

/// Builds the email synchronization patch of one folder.
///
/// Hunks are ordered as follows: unmappings and deletions first, then
/// bindings, copies to the remote side, copies to the local side,
/// flags updates and finally synced flags updates.
pub fn build_patch(
    folder: &str,
    local: &Snapshot,
    remote: &Snapshot,
    map: &UidMap,
    opts: &EmailSyncPatchOptions,
) -> EmailSyncPatch {
    let folder = folder.to_owned();

    let mut removals = EmailSyncPatch::new();
    let mut bindings = EmailSyncPatch::new();
    let mut copies_to_remote = EmailSyncPatch::new();
    let mut copies_to_local = EmailSyncPatch::new();
    let mut updates = EmailSyncPatch::new();
    let mut remembers = EmailSyncPatch::new();

    // mapped messages

    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| cmp_ids(&a.local_id, &b.local_id));

    for entry in entries {
        let local_id = &entry.local_id;
        let local = local.envelopes.get(local_id);
        let remote = remote.envelopes.get(&entry.remote_id);

        if local.into_iter().chain(remote).any(|e| opts.is_too_old(e)) {
            trace!("skipping email {local_id} of folder {folder}: out of the age window");
            continue;
        }

        match (local, remote) {
            // The message exists on both sides: only flags can
            // differ.
            (Some(local), Some(remote)) => {
                let flags = reconcile(&folder, local, remote, Some(&entry.flags), opts, &mut updates);
                if flags != entry.flags {
                    remembers.push(EmailSyncHunk::Remember(folder.clone(), local_id.clone(), flags));
                }
            }

            // The message has been deleted remotely, but the local
            // side holds: the message is copied back.
            (Some(local), None) if opts.hold == HoldPolicy::Local => {
                removals.push(EmailSyncHunk::Unmap(folder.clone(), local_id.clone()));
                push_copy(&mut copies_to_remote, &folder, local, Destination::Local, opts);
            }

            // The message has been deleted remotely.
            (Some(_), None) => {
                removals.push(EmailSyncHunk::Delete(
                    folder.clone(),
                    local_id.clone(),
                    Destination::Local,
                ));
                removals.push(EmailSyncHunk::Unmap(folder.clone(), local_id.clone()));
            }

            // The message has been deleted locally, but the remote
            // side holds: the message is copied back.
            (None, Some(remote)) if opts.hold == HoldPolicy::Remote => {
                removals.push(EmailSyncHunk::Unmap(folder.clone(), local_id.clone()));
                push_copy(&mut copies_to_local, &folder, remote, Destination::Remote, opts);
            }

            // The message has been deleted locally.
            (None, Some(remote)) => {
                removals.push(EmailSyncHunk::Delete(
                    folder.clone(),
                    remote.id.clone(),
                    Destination::Remote,
                ));
                removals.push(EmailSyncHunk::Unmap(folder.clone(), local_id.clone()));
            }

            // The message has been deleted on both sides.
            (None, None) => {
                removals.push(EmailSyncHunk::Unmap(folder.clone(), local_id.clone()));
            }
        }
    }

    // unmapped messages

    let mut unmapped_remote: Vec<&Envelope> = remote
        .envelopes
        .values()
        .filter(|envelope| !map.contains_remote_id(&envelope.id))
        .filter(|envelope| !opts.is_too_old(envelope))
        .collect();
    unmapped_remote.sort_by(|a, b| cmp_ids(&a.id, &b.id));

    let mut remote_by_content_id: HashMap<&str, VecDeque<&Envelope>> = HashMap::new();
    for envelope in unmapped_remote {
        remote_by_content_id
            .entry(envelope.content_id.as_str())
            .or_default()
            .push_back(envelope);
    }

    let mut unmapped_local: Vec<&Envelope> = local
        .envelopes
        .values()
        .filter(|envelope| !map.contains_local_id(&envelope.id))
        .filter(|envelope| !opts.is_too_old(envelope))
        .collect();
    unmapped_local.sort_by(|a, b| cmp_ids(&a.id, &b.id));

    for local in unmapped_local {
        let remote = remote_by_content_id
            .get_mut(local.content_id.as_str())
            .and_then(VecDeque::pop_front);

        match remote {
            // The same message exists on both sides but is not
            // mapped yet, which happens after a UID validity change
            // or an interrupted pass: the messages are bound
            // together instead of being copied again.
            Some(remote) => {
                let flags = reconcile(&folder, local, remote, None, opts, &mut updates);
                bindings.push(EmailSyncHunk::Bind(
                    folder.clone(),
                    local.id.clone(),
                    remote.id.clone(),
                    flags,
                ));
            }

            // The message has been added locally.
            None => push_copy(&mut copies_to_remote, &folder, local, Destination::Local, opts),
        }
    }

    // The remaining messages have been added remotely.
    let mut added_remote: Vec<&Envelope> = remote_by_content_id.into_values().flatten().collect();
    added_remote.sort_by(|a, b| cmp_ids(&a.id, &b.id));

    for remote in added_remote {
        push_copy(&mut copies_to_local, &folder, remote, Destination::Remote, opts);
    }

    let patch: EmailSyncPatch = removals
        .into_iter()
        .chain(bindings)
        .chain(copies_to_remote)
        .chain(copies_to_local)
        .chain(updates)
        .chain(remembers)
        .collect();

    debug!("built email patch of {} hunks for folder {folder}", patch.len());
    patch
}

/// Reconciles the flags of two messages known to be the same, pushes
/// the flags updates needed on both sides and returns the new synced
/// flags.
fn reconcile(
    folder: &str,
    local: &Envelope,
    remote: &Envelope,
    synced: Option<&Flags>,
    opts: &EmailSyncPatchOptions,
    updates: &mut EmailSyncPatch,
) -> Flags {
    let flags = flag::sync(
        synced,
        &opts.syncable(&local.flags),
        &opts.syncable(&remote.flags),
    );

    let local_flags = opts.with_unsyncable(&flags, &local.flags);
    if local_flags != local.flags {
        updates.push(EmailSyncHunk::UpdateFlags(
            folder.to_owned(),
            local.id.clone(),
            local_flags,
            Destination::Local,
        ));
    }

    let remote_flags = opts.with_unsyncable(&flags, &remote.flags);
    if remote_flags != remote.flags {
        updates.push(EmailSyncHunk::UpdateFlags(
            folder.to_owned(),
            remote.id.clone(),
            remote_flags,
            Destination::Remote,
        ));
    }

    flags
}

fn push_copy(
    copies: &mut EmailSyncPatch,
    folder: &str,
    envelope: &Envelope,
    source: Destination,
    opts: &EmailSyncPatchOptions,
) {
    if opts.is_too_big(envelope) {
        debug!(
            "skipping {source} email {} of folder {folder}: {} bytes is above the size limit",
            envelope.id, envelope.size
        );
        return;
    }

    let target = match source {
        Destination::Local => Destination::Remote,
        Destination::Remote => Destination::Local,
    };

    copies.push(EmailSyncHunk::Copy(
        folder.to_owned(),
        envelope.clone(),
        source,
        target,
    ));
}

/// Compares identities numerically when both are numbers (IMAP
/// UIDs), lexicographically otherwise.
fn cmp_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        account::{config::HoldPolicy, sync::Destination},
        envelope::{Envelope, Snapshot},
        flag::Flags,
        uid_map::UidMap,
    };

    use super::{EmailSyncHunk, EmailSyncPatch, EmailSyncPatchOptions};

    fn envelope(id: &str, content_id: &str, flags: &str) -> Envelope {
        Envelope {
            id: id.into(),
            content_id: content_id.into(),
            flags: flags.into(),
            ..Default::default()
        }
    }

    fn local(envelopes: impl IntoIterator<Item = Envelope>) -> Snapshot {
        Snapshot::new(None, envelopes)
    }

    fn remote(envelopes: impl IntoIterator<Item = Envelope>) -> Snapshot {
        Snapshot::new(Some(7), envelopes)
    }

    #[test]
    fn build_patch_empty() {
        let patch = super::build_patch(
            "INBOX",
            &local([]),
            &remote([]),
            &UidMap::new(),
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(patch, EmailSyncPatch::default());
    }

    #[test]
    fn build_patch_added_remotely() {
        let patch = super::build_patch(
            "INBOX",
            &local([]),
            &remote([envelope("42", "<a@localhost>", "seen")]),
            &UidMap::new(),
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(
            patch,
            vec![EmailSyncHunk::Copy(
                "INBOX".into(),
                envelope("42", "<a@localhost>", "seen"),
                Destination::Remote,
                Destination::Local,
            )]
        );
    }

    #[test]
    fn build_patch_added_on_both_sides() {
        let patch = super::build_patch(
            "INBOX",
            &local([envelope("L1", "<a@localhost>", "")]),
            &remote([envelope("42", "<b@localhost>", "")]),
            &UidMap::new(),
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(
            patch,
            vec![
                EmailSyncHunk::Copy(
                    "INBOX".into(),
                    envelope("L1", "<a@localhost>", ""),
                    Destination::Local,
                    Destination::Remote,
                ),
                EmailSyncHunk::Copy(
                    "INBOX".into(),
                    envelope("42", "<b@localhost>", ""),
                    Destination::Remote,
                    Destination::Local,
                ),
            ]
        );
    }

    #[test]
    fn build_patch_binds_same_content() {
        let patch = super::build_patch(
            "INBOX",
            &local([envelope("L1", "abc", "")]),
            &remote([envelope("42", "abc", "seen")]),
            &UidMap::new(),
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(
            patch,
            vec![
                EmailSyncHunk::Bind("INBOX".into(), "L1".into(), "42".into(), "seen".into()),
                EmailSyncHunk::UpdateFlags(
                    "INBOX".into(),
                    "L1".into(),
                    "seen".into(),
                    Destination::Local,
                ),
            ]
        );
    }

    #[test]
    fn build_patch_binds_duplicates_once() {
        let patch = super::build_patch(
            "INBOX",
            &local([envelope("L1", "abc", ""), envelope("L2", "abc", "")]),
            &remote([envelope("42", "abc", "")]),
            &UidMap::new(),
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(
            patch,
            vec![
                EmailSyncHunk::Bind("INBOX".into(), "L1".into(), "42".into(), Flags::default()),
                EmailSyncHunk::Copy(
                    "INBOX".into(),
                    envelope("L2", "abc", ""),
                    Destination::Local,
                    Destination::Remote,
                ),
            ]
        );
    }

    #[test]
    fn build_patch_deleted_remotely() {
        let mut map = UidMap::new();
        map.insert("L1", "42", Flags::default());

        let patch = super::build_patch(
            "INBOX",
            &local([envelope("L1", "abc", "")]),
            &remote([]),
            &map,
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(
            patch,
            vec![
                EmailSyncHunk::Delete("INBOX".into(), "L1".into(), Destination::Local),
                EmailSyncHunk::Unmap("INBOX".into(), "L1".into()),
            ]
        );
    }

    #[test]
    fn build_patch_deleted_locally() {
        let mut map = UidMap::new();
        map.insert("L1", "42", Flags::default());

        let patch = super::build_patch(
            "INBOX",
            &local([]),
            &remote([envelope("42", "abc", "")]),
            &map,
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(
            patch,
            vec![
                EmailSyncHunk::Delete("INBOX".into(), "42".into(), Destination::Remote),
                EmailSyncHunk::Unmap("INBOX".into(), "L1".into()),
            ]
        );
    }

    #[test]
    fn build_patch_deleted_remotely_with_local_hold() {
        let mut map = UidMap::new();
        map.insert("L1", "42", Flags::default());

        let opts = EmailSyncPatchOptions {
            hold: HoldPolicy::Local,
            ..Default::default()
        };

        let patch = super::build_patch(
            "INBOX",
            &local([envelope("L1", "abc", "")]),
            &remote([]),
            &map,
            &opts,
        );

        assert_eq!(
            patch,
            vec![
                EmailSyncHunk::Unmap("INBOX".into(), "L1".into()),
                EmailSyncHunk::Copy(
                    "INBOX".into(),
                    envelope("L1", "abc", ""),
                    Destination::Local,
                    Destination::Remote,
                ),
            ]
        );
    }

    #[test]
    fn build_patch_deleted_on_both_sides() {
        let mut map = UidMap::new();
        map.insert("L1", "42", Flags::default());

        let patch = super::build_patch(
            "INBOX",
            &local([]),
            &remote([]),
            &map,
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(patch, vec![EmailSyncHunk::Unmap("INBOX".into(), "L1".into())]);
    }

    #[test]
    fn build_patch_reconciles_flags() {
        let mut map = UidMap::new();
        map.insert("L1", "42", "seen".into());

        let patch = super::build_patch(
            "INBOX",
            &local([envelope("L1", "abc", "seen flagged")]),
            &remote([envelope("42", "abc", "")]),
            &map,
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(
            patch,
            vec![
                EmailSyncHunk::UpdateFlags(
                    "INBOX".into(),
                    "L1".into(),
                    "flagged".into(),
                    Destination::Local,
                ),
                EmailSyncHunk::UpdateFlags(
                    "INBOX".into(),
                    "42".into(),
                    "flagged".into(),
                    Destination::Remote,
                ),
                EmailSyncHunk::Remember("INBOX".into(), "L1".into(), "flagged".into()),
            ]
        );
    }

    #[test]
    fn build_patch_keeps_unsyncable_flags() {
        let mut map = UidMap::new();
        map.insert("L1", "42", "seen".into());

        let patch = super::build_patch(
            "INBOX",
            &local([envelope("L1", "abc", "seen")]),
            &remote([envelope("42", "abc", "seen $Work")]),
            &map,
            &EmailSyncPatchOptions::default(),
        );

        assert_eq!(patch, EmailSyncPatch::default());
    }

    #[test]
    fn build_patch_skips_big_messages() {
        let opts = EmailSyncPatchOptions {
            max_size: Some(1024),
            ..Default::default()
        };

        let big = Envelope {
            size: 4096,
            ..envelope("42", "abc", "")
        };

        let patch = super::build_patch("INBOX", &local([]), &remote([big]), &UidMap::new(), &opts);

        assert_eq!(patch, EmailSyncPatch::default());
    }

    #[test]
    fn build_patch_skips_old_messages() {
        let date = |rfc3339| chrono::DateTime::parse_from_rfc3339(rfc3339).unwrap();

        let opts = EmailSyncPatchOptions {
            not_before: Some(date("2024-01-01T00:00:00+00:00")),
            ..Default::default()
        };

        let old = |id, content_id| Envelope {
            date: Some(date("2023-06-01T12:00:00+00:00")),
            ..envelope(id, content_id, "")
        };
        let recent = |id, content_id| Envelope {
            date: Some(date("2024-06-01T12:00:00+00:00")),
            ..envelope(id, content_id, "")
        };

        let mut map = UidMap::new();
        map.insert("L1", "41", Flags::default());

        let patch = super::build_patch(
            "INBOX",
            &local([old("L1", "<a@localhost>"), old("L2", "<b@localhost>")]),
            &remote([
                old("43", "<c@localhost>"),
                recent("44", "<d@localhost>"),
                envelope("45", "<e@localhost>", ""),
            ]),
            &map,
            &opts,
        );

        // the old mapped message deleted remotely is kept locally,
        // undated messages are synchronized
        assert_eq!(
            patch,
            vec![
                EmailSyncHunk::Copy(
                    "INBOX".into(),
                    recent("44", "<d@localhost>"),
                    Destination::Remote,
                    Destination::Local,
                ),
                EmailSyncHunk::Copy(
                    "INBOX".into(),
                    envelope("45", "<e@localhost>", ""),
                    Destination::Remote,
                    Destination::Local,
                ),
            ]
        );
    }
}
