//! Runs the message poller and the HTTP listener under one cancellation scope.
//!
//! ```text
//! Idle -> SchemaReady -> Running -> Draining -> Stopped
//! ```
//!
//! The listener is the foreground task. Whenever it finishes, normally or not,
//! the poller is cancelled and awaited for a bounded grace period. If the
//! poller finishes first, the listener is told to drain and the run fails.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SchemaReady,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("cannot {action} while {phase:?}")]
    InvalidPhase { action: &'static str, phase: Phase },
    #[error("schema setup failed: {0}")]
    Schema(String),
    #[error("HTTP listener failed: {0}")]
    Listener(#[from] std::io::Error),
    #[error("message poller exited unexpectedly: {0}")]
    PollerExited(String),
}

/// Cancellation handle handed to a supervised task.
#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self(receiver)
    }

    /// Resolves once cancellation is requested (or the supervisor is gone).
    pub async fn cancelled(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }

    #[cfg(test)]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

pub struct Supervisor {
    phase: Phase,
    grace: Duration,
}

impl Supervisor {
    pub fn new(grace: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            grace,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, next: Phase) {
        tracing::info!(from = ?self.phase, to = ?next, "supervisor phase change");
        self.phase = next;
    }

    /// `Idle -> SchemaReady`. The schema future must be idempotent.
    pub async fn apply_schema<F, E>(&mut self, schema: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = Result<(), E>>,
        E: Display,
    {
        if self.phase != Phase::Idle {
            return Err(SupervisorError::InvalidPhase {
                action: "apply schema",
                phase: self.phase,
            });
        }
        schema
            .await
            .map_err(|err| SupervisorError::Schema(err.to_string()))?;
        self.transition(Phase::SchemaReady);
        Ok(())
    }

    /// `SchemaReady -> Running -> Draining -> Stopped`.
    ///
    /// `poller` is spawned onto the runtime; `listener` runs on the calling
    /// task. Each receives its own [`Shutdown`]: the poller's fires when the
    /// listener has stopped, the listener's fires if the poller dies.
    pub async fn run<P, PF, PE, L, LF>(
        &mut self,
        poller: P,
        listener: L,
    ) -> Result<(), SupervisorError>
    where
        P: FnOnce(Shutdown) -> PF,
        PF: Future<Output = Result<(), PE>> + Send + 'static,
        PE: Display + Send + 'static,
        L: FnOnce(Shutdown) -> LF,
        LF: Future<Output = std::io::Result<()>>,
    {
        if self.phase != Phase::SchemaReady {
            return Err(SupervisorError::InvalidPhase {
                action: "start",
                phase: self.phase,
            });
        }

        let (poller_stop, poller_rx) = watch::channel(false);
        let (listener_stop, listener_rx) = watch::channel(false);

        let mut poller_task = tokio::spawn(poller(Shutdown::new(poller_rx)));
        let serve = listener(Shutdown::new(listener_rx));
        tokio::pin!(serve);
        self.transition(Phase::Running);

        let mut poller_failure = None;
        let served = tokio::select! {
            served = &mut serve => served,
            joined = &mut poller_task => {
                let reason = describe_exit(joined);
                tracing::error!(reason = %reason, "message poller stopped unexpectedly; draining HTTP listener");
                poller_failure = Some(reason);
                let _ = listener_stop.send(true);
                (&mut serve).await
            }
        };

        self.transition(Phase::Draining);
        if poller_failure.is_none() {
            let _ = poller_stop.send(true);
            match tokio::time::timeout(self.grace, &mut poller_task).await {
                Ok(Ok(Ok(()))) => tracing::info!("message poller stopped"),
                Ok(Ok(Err(err))) => {
                    tracing::warn!(error = %err, "message poller returned an error while stopping")
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "message poller task failed while stopping")
                }
                Err(_) => {
                    tracing::warn!(
                        grace_ms = self.grace.as_millis() as u64,
                        "message poller ignored cancellation; aborting"
                    );
                    poller_task.abort();
                }
            }
        }
        self.transition(Phase::Stopped);

        if let Some(reason) = poller_failure {
            if let Err(err) = served {
                tracing::error!(error = %err, "HTTP listener failed while draining");
            }
            return Err(SupervisorError::PollerExited(reason));
        }
        served.map_err(SupervisorError::from)
    }
}

fn describe_exit<E: Display>(joined: Result<Result<(), E>, JoinError>) -> String {
    match joined {
        Ok(Ok(())) => "returned without being cancelled".to_string(),
        Ok(Err(err)) => err.to_string(),
        Err(err) => err.to_string(),
    }
}
