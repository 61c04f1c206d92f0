//! Module dedicated to emails.
//!
//! Emails are synchronized folder by folder, see
//! [`FolderSync`](self::sync::FolderSync).

pub mod sync;
