//! Module dedicated to flags synchronization.
//!
//! This module contains a single function [sync] that reconciles the
//! flags of a message present on both sides.

use super::Flags;

/// The flags synchronizer.
///
/// Folds the local flags, the remote flags and the flags both sides
/// agreed on at the end of the last pass into the flags both sides
/// should hold.
///
/// A flag present on both sides is kept, a flag present on neither
/// side is dropped. A flag present on one side only was either added
/// there (not in the last synced flags) and is kept, or removed from
/// the other side (in the last synced flags) and is dropped. Without
/// last synced flags the union wins, so that no change is lost.
pub fn sync(synced: Option<&Flags>, local: &Flags, remote: &Flags) -> Flags {
    let mut flags = Flags::default();

    for flag in local.iter().chain(remote.iter()) {
        if flags.contains(flag) {
            continue;
        }

        let keep = match (
            synced.map(|synced| synced.contains(flag)),
            local.contains(flag),
            remote.contains(flag),
        ) {
            // Present on both sides.
            (_, true, true) => true,

            // No previous state to compare with.
            (None, _, _) => true,

            // Added on one side since the last pass.
            (Some(false), _, _) => true,

            // Removed from one side since the last pass.
            (Some(true), _, _) => false,
        };

        if keep {
            flags.insert(flag.clone());
        }
    }

    flags
}

#[cfg(test)]
mod tests {
    use crate::flag::{Flag, Flags};

    #[test]
    fn sync_unchanged() {
        let flags = Flags::from_iter([Flag::Seen]);
        assert_eq!(super::sync(Some(&flags), &flags, &flags), flags);
    }

    #[test]
    fn sync_added_locally() {
        let synced = Flags::default();
        let local = Flags::from_iter([Flag::Flagged]);
        let remote = Flags::default();

        assert_eq!(
            super::sync(Some(&synced), &local, &remote),
            Flags::from_iter([Flag::Flagged]),
        );
    }

    #[test]
    fn sync_removed_remotely() {
        let synced = Flags::from_iter([Flag::Seen, Flag::Flagged]);
        let local = Flags::from_iter([Flag::Seen, Flag::Flagged]);
        let remote = Flags::from_iter([Flag::Seen]);

        assert_eq!(
            super::sync(Some(&synced), &local, &remote),
            Flags::from_iter([Flag::Seen]),
        );
    }

    #[test]
    fn sync_changes_on_both_sides() {
        let synced = Flags::from_iter([Flag::Seen]);
        let local = Flags::from_iter([Flag::Answered]);
        let remote = Flags::from_iter([Flag::Seen, Flag::Flagged]);

        assert_eq!(
            super::sync(Some(&synced), &local, &remote),
            Flags::from_iter([Flag::Answered, Flag::Flagged]),
        );
    }

    #[test]
    fn sync_without_previous_state_takes_union() {
        let local = Flags::from_iter([Flag::Draft]);
        let remote = Flags::from_iter([Flag::Seen]);

        assert_eq!(
            super::sync(None, &local, &remote),
            Flags::from_iter([Flag::Seen, Flag::Draft]),
        );
    }
}
