//! Module dedicated to the IMAP session pool.
//!
//! The pool owns the sessions opened to one IMAP server. Folder
//! workers borrow a session for the duration of one action through
//! [`SessionPool::exec`], which also owns the bounded retry loop:
//! transient failures discard the session, reconnect and retry the
//! action with exponential backoff.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    sync::{Mutex, Semaphore},
    time::sleep,
};
use tracing::{debug, trace, warn};

use crate::retry::{Retry, RetryConfig, RetryState};

use super::{
    session::{self, ImapSession, SessionFactory},
    Error, Result,
};

/// Alias for a boxed IMAP session.
pub type Session = Box<dyn ImapSession>;

/// The IMAP session pool.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    idle: Mutex<Vec<Session>>,
    permits: Semaphore,
    retry: RetryConfig,
}

impl SessionPool {
    /// Creates a new pool holding at most `size` sessions.
    pub fn new(factory: Arc<dyn SessionFactory>, size: usize, retry: RetryConfig) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::new()),
            permits: Semaphore::new(size.max(1)),
            retry,
        }
    }

    fn timeout_error(&self) -> session::Error {
        session::Error::TimeoutError(Duration::from_secs(self.retry.timeout_secs))
    }

    /// Takes an idle session, or connects a new one. Both the health
    /// check and the connection are bounded by the attempt timeout.
    async fn checkout(&self, retry: &Retry) -> session::Result<Session> {
        loop {
            // wrap in a block to free the lock as quickly as possible
            let session = {
                let mut idle = self.idle.lock().await;
                idle.pop()
            };

            match session {
                None => {
                    debug!("connecting new IMAP session");
                    return match retry.timeout(self.factory.connect()).await {
                        Ok(res) => res,
                        Err(_) => Err(self.timeout_error()),
                    };
                }
                Some(mut session) => match retry.timeout(session.noop()).await {
                    Ok(Ok(())) => return Ok(session),
                    Ok(Err(err)) => {
                        debug!("discarding idle IMAP session: {err}");
                        trace!("{err:?}");
                    }
                    Err(_) => {
                        debug!("discarding idle IMAP session: NOOP timed out");
                    }
                },
            }
        }
    }

    async fn checkin(&self, session: Session) {
        self.idle.lock().await.push(session);
    }

    /// Executes the given action on a pooled session.
    ///
    /// Transient failures (lost connection, timeout) discard the
    /// session and retry the action on a fresh one, until the retry
    /// budget is exhausted. Other failures are returned as is.
    pub async fn exec<T, F>(&self, action: F) -> Result<T>
    where
        F: for<'a> Fn(&'a mut Session) -> BoxFuture<'a, session::Result<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::PoolClosedError)?;

        let mut retry = Retry::new(self.retry.clone());

        loop {
            let res = match self.checkout(&retry).await {
                Err(err) => Err(err),
                Ok(mut session) => {
                    let res = match retry.timeout(action(&mut session)).await {
                        Ok(res) => res,
                        Err(_) => Err(self.timeout_error()),
                    };

                    match &res {
                        Err(err) if err.is_transient() => {
                            debug!("discarding broken IMAP session");
                        }
                        _ => self.checkin(session).await,
                    }

                    res
                }
            };

            match retry.next(res, session::Error::is_transient) {
                RetryState::Ok(output) => return Ok(output),
                RetryState::Retry(err, delay) => {
                    warn!(
                        "IMAP action failed ({err}), retrying in {delay:?} ({}/{})",
                        retry.attempts, self.retry.attempts,
                    );
                    trace!("{err:?}");
                    sleep(delay).await;
                }
                RetryState::Err(err) if err.is_transient() => {
                    return Err(Error::RetriesExhaustedError(retry.attempts, err));
                }
                RetryState::Err(err) => return Err(Error::SessionError(err)),
            }
        }
    }

    /// Closes the pool: pending and future actions fail, idle
    /// sessions are logged out.
    pub async fn close(&self) {
        self.permits.close();

        let sessions: Vec<Session> = self.idle.lock().await.drain(..).collect();
        debug!("closing {} idle IMAP sessions", sessions.len());

        for mut session in sessions {
            if let Err(err) = session.logout().await {
                debug!("cannot logout from IMAP session: {err}");
                trace!("{err:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::{
        imap::{
            session::{self, ImapSession, SessionFactory},
            Error,
        },
        retry::RetryConfig,
    };

    use super::SessionPool;

    struct UnresponsiveServer;

    #[async_trait]
    impl SessionFactory for UnresponsiveServer {
        async fn connect(&self) -> session::Result<Box<dyn ImapSession>> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn hanging_connect_times_out() {
        let retry = RetryConfig {
            attempts: 1,
            backoff_ms: 1,
            max_backoff_ms: 1,
            timeout_secs: 1,
        };
        let pool = SessionPool::new(Arc::new(UnresponsiveServer), 1, retry);

        let res = pool.exec(|_| Box::pin(async { Ok(()) })).await;

        assert!(matches!(
            res,
            Err(Error::RetriesExhaustedError(
                1,
                session::Error::TimeoutError(_)
            ))
        ));
    }
}
