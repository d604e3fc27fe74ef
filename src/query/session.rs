//! Pooled query execution with validity checks and deadlines

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::query::{Connection, ConnectionFactory, ResultSet, with_one_retry};

/// Runs queries against connections produced by a factory
///
/// Idle connections are pooled. A failed query drops its connection and
/// every idle one, and the retry path always opens a new connection, since
/// pooled connections can pass `is_valid` yet be dead after an outage.
pub struct QuerySession {
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    timeout: Option<Duration>,
}

impl QuerySession {
    /// Create a session without a query deadline
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            idle: Mutex::new(Vec::new()),
            timeout: None,
        }
    }

    /// Bound every query attempt by `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Label of the underlying factory
    #[must_use]
    pub fn label(&self) -> &str {
        self.factory.label()
    }

    /// Number of pooled idle connections
    #[must_use]
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Take a pooled connection, or open one; `fresh` bypasses the pool
    async fn checkout(&self, fresh: bool) -> Result<Box<dyn Connection>> {
        if fresh {
            self.discard_idle();
        }
        loop {
            let pooled = self
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop();
            match pooled {
                Some(conn) if conn.is_valid() => return Ok(conn),
                Some(_) => {
                    log::debug!("Discarding stale pooled connection to {}", self.label());
                }
                None => break,
            }
        }

        log::debug!("Opening connection to {}", self.label());
        self.factory.connect().await
    }

    fn checkin(&self, conn: Box<dyn Connection>) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }

    /// Drop every pooled connection
    fn discard_idle(&self) {
        let dropped = std::mem::take(
            &mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if !dropped.is_empty() {
            log::debug!(
                "Dropping {} pooled connections to {}",
                dropped.len(),
                self.label()
            );
        }
    }

    async fn run(&self, query: &str, fresh: bool) -> Result<ResultSet> {
        let mut conn = self.checkout(fresh).await?;

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, conn.execute(query)).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout(limit)),
            },
            None => conn.execute(query).await,
        };

        match outcome {
            Ok(rows) => {
                self.checkin(conn);
                Ok(rows)
            }
            Err(e) => {
                // idle connections may have gone stale in the same outage
                drop(conn);
                self.discard_idle();
                Err(e)
            }
        }
    }

    /// Run a query once
    ///
    /// A pooled connection that fails `is_valid` is replaced before the
    /// query is issued. On failure the connection and the idle pool are
    /// dropped, so the next query opens a new connection.
    pub async fn execute(&self, query: &str) -> Result<ResultSet> {
        self.run(query, false).await
    }

    /// Run a query, retrying once on a newly opened connection if the
    /// first attempt fails
    pub async fn execute_with_retry(&self, label: &str, query: &str) -> Result<ResultSet> {
        with_one_retry(label, |attempt| self.run(query, attempt > 0)).await
    }
}

impl std::fmt::Debug for QuerySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySession")
            .field("factory", &self.factory.label())
            .field("idle", &self.idle_connections())
            .field("timeout", &self.timeout)
            .finish()
    }
}
