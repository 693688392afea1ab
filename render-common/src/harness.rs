//! Uniform reconnection policy for the worker loops.
//!
//! Transient infrastructure failures (lost connections, closed channels)
//! are retried with a fixed backoff; anything else exits the supervised
//! loop so the process supervisor can restart the worker.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Fixed backoff between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Classifies errors the harness can recover from by reconnecting.
pub trait Transient {
    fn is_connection_loss(&self) -> bool;
}

/// Supervises a connect-and-run loop for either worker role.
pub struct Harness {
    reconnect_delay: Duration,
}

impl Harness {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self { reconnect_delay }
    }

    /// Run `connect_and_run` until it either finishes cleanly or fails
    /// with a non-transient error. The factory owns building fresh
    /// connections and re-declaring the queue, so every retry starts from
    /// a clean slate.
    pub async fn supervise<F, Fut, E>(&self, component: &str, mut connect_and_run: F) -> Result<(), E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Transient + fmt::Display,
    {
        loop {
            match connect_and_run().await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_connection_loss() => {
                    tracing::error!(
                        component,
                        %error,
                        "connection lost, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
                Err(error) => {
                    tracing::error!(component, %error, "unrecoverable worker error");
                    return Err(error);
                }
            }
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(RECONNECT_DELAY)
    }
}
