//! Shutdown pipeline
//!
//! An explicit, ordered list of shutdown-capable resources, registered at
//! startup in dependency order (dependents before dependencies) and
//! drained in reverse order on termination. The drain is best-effort: a
//! failing step never aborts the remaining steps, and the whole sweep runs
//! under one deadline with each step capped to the remaining budget.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Shutdown error types, reported per step
#[derive(Debug, Clone, Error)]
pub enum ShutdownError {
    #[error("shutdown step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },
    #[error("shutdown step '{step}' exceeded the shutdown deadline")]
    Timeout { step: String },
}

/// A resource that knows how to shut itself down
#[async_trait]
pub trait ShutdownStep: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Aggregated outcome of one pipeline drain
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Every failure observed, in teardown order
    pub failures: Vec<ShutdownError>,
    /// Steps that completed without error
    pub steps_completed: usize,
}

impl ShutdownReport {
    /// Whether every step completed cleanly
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered shutdown orchestrator.
///
/// Steps registered first are shut down last, mirroring startup order.
pub struct ShutdownPipeline {
    steps: Vec<Arc<dyn ShutdownStep>>,
    bound: Duration,
}

impl ShutdownPipeline {
    /// Create a pipeline whose whole drain must finish within `bound`
    pub fn new(bound: Duration) -> Self {
        Self {
            steps: Vec::new(),
            bound,
        }
    }

    /// Register a resource. Call in dependency order: dependents before
    /// the resources they depend on.
    pub fn register(&mut self, step: Arc<dyn ShutdownStep>) {
        debug!(step = step.name(), "registered shutdown step");
        self.steps.push(step);
    }

    /// Number of registered steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps are registered
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Drain every step in reverse registration order.
    ///
    /// Failures are collected, never propagated mid-sweep. A step still in
    /// flight when the deadline passes is abandoned and reported as a
    /// timeout, as is every step the deadline left unreached.
    pub async fn shutdown(&self) -> ShutdownReport {
        let deadline = Instant::now() + self.bound;
        let mut report = ShutdownReport::default();

        info!(steps = self.steps.len(), "shutdown pipeline draining");

        for step in self.steps.iter().rev() {
            // Deadline check before starting a step, so an exhausted
            // budget abandons the remainder instead of running them late.
            if Instant::now() >= deadline {
                warn!(step = step.name(), "shutdown deadline exceeded, step abandoned");
                report.failures.push(ShutdownError::Timeout {
                    step: step.name().to_string(),
                });
                continue;
            }

            match timeout_at(deadline, step.shutdown()).await {
                Ok(Ok(())) => {
                    debug!(step = step.name(), "shutdown step completed");
                    report.steps_completed += 1;
                }
                Ok(Err(err)) => {
                    warn!(step = step.name(), error = %err, "shutdown step failed");
                    report.failures.push(ShutdownError::StepFailed {
                        step: step.name().to_string(),
                        message: err.to_string(),
                    });
                }
                Err(_) => {
                    warn!(step = step.name(), "shutdown step timed out");
                    report.failures.push(ShutdownError::Timeout {
                        step: step.name().to_string(),
                    });
                }
            }
        }

        info!(
            completed = report.steps_completed,
            failures = report.failures.len(),
            "shutdown pipeline drained"
        );
        report
    }
}

// ============================================================================
// TESTS
// ============================================================================
