//! Rust library to synchronize IMAP mailboxes with local Maildirs.
//!
//! The main purpose of this library is to keep two replicas of an
//! account in sync: a remote IMAP store and a local Maildir store. It
//! correlates both identity spaces through a persistent UID mapping,
//! reconciles messages and flags folder by folder, and drives many
//! such folder synchronizations concurrently.
//!
//! The entry point is the [`SyncBuilder`](crate::sync::SyncBuilder),
//! which builds a [`Sync`](crate::sync::Sync) scheduler out of
//! account synchronizers.
//!
//! ## Building blocks
//!
//! - [`Repository`](crate::repository::Repository): the capabilities
//!   both backends implement (folder listing, message enumeration,
//!   fetch, store, flag update, delete).
//! - [`UidMapStore`](crate::uid_map::UidMapStore): the persistent
//!   local identity ↔ remote UID bijection, scoped per folder and per
//!   UID validity.
//! - [`FolderSync`](crate::email::sync::FolderSync): builds and
//!   applies the patch that makes one folder converge.
//! - [`AccountSync`](crate::account::sync::AccountSync): resolves the
//!   folders of an account and runs one folder sync per folder.
//! - [`SessionPool`](crate::imap::pool::SessionPool): pooled,
//!   reconnectable IMAP sessions with bounded retries.
//!
//! The IMAP wire protocol is not implemented here: the library
//! consumes an already authenticated
//! [`SessionFactory`](crate::imap::session::SessionFactory).

pub mod account;
pub mod config;
pub mod email;
pub mod envelope;
mod error;
pub mod flag;
pub mod folder;
pub mod imap;
pub mod maildir;
pub mod repository;
pub mod retry;
pub mod sync;
pub mod uid_map;

#[doc(inline)]
pub use self::error::{Error, ErrorKind, Result};
