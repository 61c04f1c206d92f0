//! Module dedicated to IMAP flags.
//!
//! Sessions exchange flags as raw IMAP atoms (`\Seen`, `$Forwarded`,
//! …). This module maps them from and to [`Flag`].

use tracing::trace;

use super::{Flag, Flags};

impl Flag {
    /// Parses an IMAP flag atom. Returns `None` for flags that
    /// cannot be set by a client, like `\Recent` or `\*`.
    pub fn from_imap_str(flag: &str) -> Option<Self> {
        match flag.trim() {
            seen if seen.eq_ignore_ascii_case("\\Seen") => Some(Flag::Seen),
            answered if answered.eq_ignore_ascii_case("\\Answered") => Some(Flag::Answered),
            flagged if flagged.eq_ignore_ascii_case("\\Flagged") => Some(Flag::Flagged),
            deleted if deleted.eq_ignore_ascii_case("\\Deleted") => Some(Flag::Deleted),
            draft if draft.eq_ignore_ascii_case("\\Draft") => Some(Flag::Draft),
            system if system.starts_with('\\') => {
                trace!("skipping IMAP system flag {system}");
                None
            }
            "" => None,
            keyword => Some(Flag::Custom(keyword.to_owned())),
        }
    }

    pub fn to_imap_string(&self) -> String {
        match self {
            Flag::Seen => String::from("\\Seen"),
            Flag::Answered => String::from("\\Answered"),
            Flag::Flagged => String::from("\\Flagged"),
            Flag::Deleted => String::from("\\Deleted"),
            Flag::Draft => String::from("\\Draft"),
            Flag::Custom(flag) => flag.clone(),
        }
    }
}

impl Flags {
    pub fn from_imap_flags<'a>(flags: impl IntoIterator<Item = &'a String>) -> Self {
        flags
            .into_iter()
            .filter_map(|flag| Flag::from_imap_str(flag))
            .collect()
    }

    pub fn to_imap_flags(&self) -> Vec<String> {
        self.iter().map(Flag::to_imap_string).collect()
    }
}
