//! Module dedicated to emails synchronization hunk.
//!
//! The core structure of the module is the [`EmailSyncHunk`], which
//! represents a change in a patch.

use std::fmt;

use crate::{
    account::sync::{Source, Target},
    envelope::{Envelope, Id},
    flag::Flags,
    folder::sync::FolderName,
};

/// The email synchronization hunk.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum EmailSyncHunk {
    /// The local message matching the first identifier and the
    /// remote message matching the second identifier share the same
    /// content and need to be mapped together with the given synced
    /// flags.
    Bind(FolderName, Id, Id, Flags),

    /// The message matching the given envelope needs to be copied
    /// from the given source to the given target, then mapped.
    Copy(FolderName, Envelope, Source, Target),

    /// The message matching the given identifier needs to be deleted
    /// from the given target.
    Delete(FolderName, Id, Target),

    /// The mapping of the local message matching the given identifier
    /// needs to be dropped.
    Unmap(FolderName, Id),

    /// The message matching the given identifier needs its flags to
    /// be replaced on the given target.
    UpdateFlags(FolderName, Id, Flags, Target),

    /// The mapping of the local message matching the given identifier
    /// needs to remember the given synced flags.
    Remember(FolderName, Id, Flags),
}

impl fmt::Display for EmailSyncHunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(folder, local_id, remote_id, _) => {
                write!(
                    f,
                    "Binding local email {local_id} to remote email {remote_id} ({folder})"
                )
            }
            Self::Copy(folder, envelope, source, target) => {
                let id = &envelope.id;
                write!(f, "Copying {source} email {id} to {target} folder {folder}")
            }
            Self::Delete(folder, id, target) => {
                write!(f, "Deleting {target} email {id} ({folder})")
            }
            Self::Unmap(folder, id) => {
                write!(f, "Unmapping local email {id} ({folder})")
            }
            Self::UpdateFlags(folder, id, flags, target) => {
                write!(f, "Setting flags {flags} of {target} email {id} ({folder})")
            }
            Self::Remember(folder, id, flags) => {
                write!(f, "Remembering flags {flags} of local email {id} ({folder})")
            }
        }
    }
}

impl EmailSyncHunk {
    pub fn folder(&self) -> &str {
        match self {
            Self::Bind(folder, ..) => folder.as_str(),
            Self::Copy(folder, ..) => folder.as_str(),
            Self::Delete(folder, ..) => folder.as_str(),
            Self::Unmap(folder, ..) => folder.as_str(),
            Self::UpdateFlags(folder, ..) => folder.as_str(),
            Self::Remember(folder, ..) => folder.as_str(),
        }
    }

    /// Returns `true` if the hunk mutates one of the repositories.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Copy(..) | Self::Delete(..) | Self::UpdateFlags(..)
        )
    }
}
