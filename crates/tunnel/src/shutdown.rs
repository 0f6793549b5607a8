//! Ordered teardown steps and their outcomes

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use portway_core::CloseOutcome;

/// One step of `TunnelSession::stop()`, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    /// Withdraw the remote forward registration
    CancelForward,
    /// Release the inbound source and drain live relays
    StopAcceptor,
    /// Disconnect the SSH transport
    CloseTransport,
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownStep::CancelForward => write!(f, "cancel forward"),
            ShutdownStep::StopAcceptor => write!(f, "stop acceptor"),
            ShutdownStep::CloseTransport => write!(f, "close transport"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: ShutdownStep,
    pub outcome: CloseOutcome,
}

/// What `stop()` did. Empty when there was nothing to stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub steps: Vec<StepOutcome>,
}

impl ShutdownReport {
    /// Record a step, logging failures. Later steps run regardless.
    pub fn record(&mut self, step: ShutdownStep, outcome: CloseOutcome) {
        match &outcome {
            CloseOutcome::Failed(reason) => error!("Error during {}: {}", step, reason),
            other => debug!("{}: {}", step, other),
        }
        self.steps.push(StepOutcome { step, outcome });
    }

    /// True when no step failed
    pub fn is_clean(&self) -> bool {
        !self.steps.iter().any(|s| s.outcome.is_failed())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn outcome(&self, step: ShutdownStep) -> Option<&CloseOutcome> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.outcome.is_failed())
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "nothing to stop");
        }
        for (i, s) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", s.step, s.outcome)?;
        }
        Ok(())
    }
}

/// Run a fallible teardown call under `deadline`.
pub(crate) async fn bounded<F, E>(deadline: Duration, fut: F) -> CloseOutcome
where
    F: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(())) => CloseOutcome::Closed,
        Ok(Err(e)) => CloseOutcome::Failed(e.to_string()),
        Err(_) => CloseOutcome::Failed(format!("timed out after {:?}", deadline)),
    }
}

/// Wait for the acceptor task, aborting it after `grace`.
pub(crate) async fn join_acceptor(handle: JoinHandle<()>, grace: Duration) -> CloseOutcome {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => CloseOutcome::Closed,
        Ok(Err(e)) if e.is_panic() => CloseOutcome::Failed("acceptor panicked".to_string()),
        Ok(Err(e)) if e.is_cancelled() => CloseOutcome::AlreadyClosed,
        Ok(Err(e)) => CloseOutcome::Failed(e.to_string()),
        Err(_) => {
            abort.abort();
            CloseOutcome::Failed(format!("acceptor still running after {:?}, aborted", grace))
        }
    }
}
