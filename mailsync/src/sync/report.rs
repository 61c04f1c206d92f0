//! # Sync report
//!
//! Module dedicated to the synchronization report.

use std::fmt;

use crate::account::sync::AccountSyncReport;

/// The final status of a synchronization pass.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SyncStatus {
    /// Every account and every folder has been synchronized.
    Success,

    /// Some accounts could not be reached, or some folders could not
    /// be synchronized.
    PartialFailure,

    /// No account could be reached.
    TotalFailure,

    /// The pass was cancelled before every account and folder could
    /// be synchronized.
    Cancelled,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial failure"),
            Self::TotalFailure => write!(f, "total failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The synchronization report.
///
/// A report is just a struct containing reports from the accounts,
/// in the order they were added to the scheduler.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub accounts: Vec<AccountSyncReport>,
}

impl SyncReport {
    pub fn status(&self) -> SyncStatus {
        let unreachable = self
            .accounts
            .iter()
            .filter(|account| account.is_unreachable())
            .count();

        if !self.accounts.is_empty() && unreachable == self.accounts.len() {
            return SyncStatus::TotalFailure;
        }

        if self.accounts.iter().any(AccountSyncReport::is_cancelled) {
            return SyncStatus::Cancelled;
        }

        let errors: usize = self.accounts.iter().map(AccountSyncReport::errors).sum();

        if unreachable > 0 || errors > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Success
        }
    }

    pub fn copied(&self) -> usize {
        self.accounts.iter().map(AccountSyncReport::copied).sum()
    }

    pub fn deleted(&self) -> usize {
        self.accounts.iter().map(AccountSyncReport::deleted).sum()
    }

    pub fn flags_updated(&self) -> usize {
        self.accounts
            .iter()
            .map(AccountSyncReport::flags_updated)
            .sum()
    }

    pub fn errors(&self) -> usize {
        self.accounts.iter().map(AccountSyncReport::errors).sum()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        account::sync::{AccountSyncReport, FolderSyncOutcome},
        folder::sync::FolderPair,
        imap::{self, session},
    };

    use super::{SyncReport, SyncStatus};

    fn unreachable(account: &str) -> AccountSyncReport {
        let err = imap::Error::PoolClosedError;
        AccountSyncReport {
            unreachable: Some(err.into()),
            ..AccountSyncReport::new(account)
        }
    }

    #[test]
    fn empty_report_is_a_success() {
        assert_eq!(SyncReport::default().status(), SyncStatus::Success);
    }

    #[test]
    fn unreachable_accounts() {
        let report = SyncReport {
            accounts: vec![unreachable("a"), AccountSyncReport::new("b")],
        };
        assert_eq!(report.status(), SyncStatus::PartialFailure);

        let report = SyncReport {
            accounts: vec![unreachable("a"), unreachable("b")],
        };
        assert_eq!(report.status(), SyncStatus::TotalFailure);
    }

    #[test]
    fn failed_folder() {
        let err = imap::Error::SessionError(session::Error::NoError("denied".into()));
        let mut account = AccountSyncReport::new("a");
        account.folders.push((
            FolderPair::new("INBOX", "INBOX"),
            FolderSyncOutcome::Failed(err.into()),
        ));

        let report = SyncReport {
            accounts: vec![account],
        };

        assert_eq!(report.errors(), 1);
        assert_eq!(report.status(), SyncStatus::PartialFailure);
    }

    #[test]
    fn cancelled_pass() {
        let mut account = AccountSyncReport::new("a");
        account
            .folders
            .push((FolderPair::new("INBOX", "INBOX"), FolderSyncOutcome::Cancelled));

        let report = SyncReport {
            accounts: vec![account, AccountSyncReport::new("b")],
        };
        assert_eq!(report.status(), SyncStatus::Cancelled);

        let report = SyncReport {
            accounts: vec![AccountSyncReport {
                cancelled: true,
                ..AccountSyncReport::new("a")
            }],
        };
        assert_eq!(report.status(), SyncStatus::Cancelled);
    }
}
