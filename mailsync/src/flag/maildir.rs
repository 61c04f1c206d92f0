//! Module dedicated to Maildir flags.
//!
//! Maildir encodes flags as single characters in the info suffix of
//! the file name (`<id>:2,<chars>`). Only standard flags have a
//! character; custom flags cannot be represented.

use super::{Flag, Flags};

impl Flag {
    pub fn from_maildir_char(c: char) -> Option<Self> {
        match c {
            'r' | 'R' => Some(Flag::Answered),
            's' | 'S' => Some(Flag::Seen),
            't' | 'T' => Some(Flag::Deleted),
            'd' | 'D' => Some(Flag::Draft),
            'f' | 'F' => Some(Flag::Flagged),
            _ => None,
        }
    }

    pub fn to_maildir_char(&self) -> Option<char> {
        match self {
            Flag::Answered => Some('R'),
            Flag::Seen => Some('S'),
            Flag::Deleted => Some('T'),
            Flag::Draft => Some('D'),
            Flag::Flagged => Some('F'),
            Flag::Custom(_) => None,
        }
    }
}

impl Flags {
    /// Parses the characters of a Maildir info suffix. Unknown
    /// characters (like `P` passed, or Dovecot keyword letters) are
    /// ignored.
    pub fn from_maildir_str(info: &str) -> Self {
        info.chars().filter_map(Flag::from_maildir_char).collect()
    }

    /// Builds the Maildir info characters, sorted in ASCII order as
    /// the Maildir format requires.
    pub fn to_maildir_string(&self) -> String {
        let mut chars: Vec<char> = self.iter().filter_map(Flag::to_maildir_char).collect();
        chars.sort();
        chars.dedup();
        chars.into_iter().collect()
    }
}
