//! Module dedicated to the in-memory UID mapping.

use std::collections::HashMap;

use tracing::debug;

use crate::{envelope::Id, flag::Flags};

/// One correlation between a local and a remote message.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct UidMapEntry {
    pub local_id: Id,
    pub remote_id: Id,

    /// The flags both sides held at the end of the last pass.
    pub flags: Flags,
}

/// The bijection between local identities and remote UIDs of one
/// folder, for one UID validity.
///
/// Inserting an entry evicts any entry sharing its local or its
/// remote identity, so that no identity is ever mapped twice.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UidMap {
    by_local_id: HashMap<Id, UidMapEntry>,
    by_remote_id: HashMap<Id, Id>,
}

impl UidMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_local_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local_id.is_empty()
    }

    /// Maps the given local identity to the given remote identity.
    /// Returns the evicted entries.
    pub fn insert(
        &mut self,
        local_id: impl Into<Id>,
        remote_id: impl Into<Id>,
        flags: Flags,
    ) -> Vec<UidMapEntry> {
        let local_id = local_id.into();
        let remote_id = remote_id.into();

        let mut evicted = Vec::new();
        evicted.extend(self.remove_by_local_id(&local_id));
        evicted.extend(self.remove_by_remote_id(&remote_id));

        for entry in &evicted {
            debug!(
                "evicting uid mapping {} ↔ {}",
                entry.local_id, entry.remote_id
            );
        }

        self.by_remote_id.insert(remote_id.clone(), local_id.clone());
        self.by_local_id.insert(
            local_id.clone(),
            UidMapEntry {
                local_id,
                remote_id,
                flags,
            },
        );

        evicted
    }

    pub fn get_by_local_id(&self, local_id: &str) -> Option<&UidMapEntry> {
        self.by_local_id.get(local_id)
    }

    pub fn get_by_remote_id(&self, remote_id: &str) -> Option<&UidMapEntry> {
        self.by_remote_id
            .get(remote_id)
            .and_then(|local_id| self.by_local_id.get(local_id))
    }

    pub fn contains_local_id(&self, local_id: &str) -> bool {
        self.by_local_id.contains_key(local_id)
    }

    pub fn contains_remote_id(&self, remote_id: &str) -> bool {
        self.by_remote_id.contains_key(remote_id)
    }

    pub fn remove_by_local_id(&mut self, local_id: &str) -> Option<UidMapEntry> {
        let entry = self.by_local_id.remove(local_id)?;
        self.by_remote_id.remove(&entry.remote_id);
        Some(entry)
    }

    pub fn remove_by_remote_id(&mut self, remote_id: &str) -> Option<UidMapEntry> {
        let local_id = self.by_remote_id.remove(remote_id)?;
        self.by_local_id.remove(&local_id)
    }

    /// Updates the synced flags of the entry matching the given local
    /// identity. Returns `false` if no entry matches.
    pub fn set_flags(&mut self, local_id: &str, flags: Flags) -> bool {
        match self.by_local_id.get_mut(local_id) {
            Some(entry) => {
                entry.flags = flags;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &UidMapEntry> {
        self.by_local_id.values()
    }
}

impl FromIterator<UidMapEntry> for UidMap {
    fn from_iter<T: IntoIterator<Item = UidMapEntry>>(iter: T) -> Self {
        let mut map = UidMap::new();
        for entry in iter {
            map.insert(entry.local_id, entry.remote_id, entry.flags);
        }
        map
    }
}
