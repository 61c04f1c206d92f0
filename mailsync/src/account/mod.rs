//! Module dedicated to accounts.
//!
//! An account groups one remote IMAP repository and one local
//! Maildir repository, together with the rules deciding which
//! folders are synchronized and how.

pub mod config;
pub mod sync;

#[doc(inline)]
pub use self::config::{AccountConfig, HoldPolicy};
