//! Scenario runner
//!
//! The runner is the single recovery boundary of the harness. For each
//! scenario it builds a fresh topology, runs the body, converts whatever
//! happened into one `ScenarioResult`, and tears the topology down on every
//! path (success, error, cancellation).

pub mod report;
pub mod state_machine;

pub use report::{ScenarioResult, ScenarioStatus, SuiteReport};
pub use state_machine::{
    allowed_transitions, validate_transition, IllegalTransition, ScenarioState, ScenarioTracker,
};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::journal::EventJournal;
use crate::topology::{ServerSpec, Topology, TopologyManager};
use crate::transport::Connector;
use crate::types::ScenarioId;
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::Instrument;

/// How a scenario body ended when it did not error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    /// All checks passed
    Completed,
    /// A server rejected a precondition (capability NAK)
    Skipped(String),
}

/// A named test over a freshly built topology
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Unique name used for selection and reporting
    fn name(&self) -> &str;

    /// One-line description
    fn description(&self) -> &str {
        ""
    }

    /// Servers to build before `run`
    fn topology(&self, config: &HarnessConfig) -> Vec<ServerSpec> {
        config.server_specs()
    }

    /// Scenario body
    async fn run(&self, topology: &mut Topology, config: &HarnessConfig) -> Result<ScenarioOutcome>;
}

/// Suite execution bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteOptions {
    /// Scenarios running at once
    pub concurrency: usize,
    /// Hard cap on the whole suite; scenarios still running are cancelled
    pub deadline: Option<Duration>,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            deadline: None,
        }
    }
}

impl SuiteOptions {
    /// With concurrency bound (at least one)
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// With hard cap
    #[inline]
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Runs scenarios against topologies built through one manager
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    manager: Arc<TopologyManager>,
    config: Arc<HarnessConfig>,
}

impl ScenarioRunner {
    /// Create a runner
    #[must_use]
    pub fn new(manager: Arc<TopologyManager>, config: Arc<HarnessConfig>) -> Self {
        Self { manager, config }
    }

    /// Runner whose manager takes its options from `config`
    #[must_use]
    pub fn from_config(connector: Arc<dyn Connector>, config: HarnessConfig) -> Self {
        let manager = TopologyManager::new(connector, config.topology_options());
        Self::new(Arc::new(manager), Arc::new(config))
    }

    /// Configuration handed to scenarios
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one scenario to completion
    pub async fn run(&self, scenario: &dyn Scenario) -> ScenarioResult {
        self.run_until(scenario, std::future::pending()).await
    }

    /// Run one scenario, cancelling it when `cancel` resolves first
    ///
    /// A cancelled scenario is reported as `Failed` with a
    /// `HarnessError::Cancelled` reason.
    pub async fn run_until<F>(&self, scenario: &dyn Scenario, cancel: F) -> ScenarioResult
    where
        F: Future<Output = ()> + Send,
    {
        let id = ScenarioId::new();
        let span = tracing::info_span!("scenario", name = %scenario.name(), %id);
        self.run_inner(id, scenario, cancel).instrument(span).await
    }

    async fn run_inner<F>(&self, id: ScenarioId, scenario: &dyn Scenario, cancel: F) -> ScenarioResult
    where
        F: Future<Output = ()> + Send,
    {
        let mut tracker = ScenarioTracker::new();
        let started_at = Utc::now();
        let started = Instant::now();
        let journal = Arc::new(EventJournal::new());
        let mut slot: Option<Topology> = None;

        advance(&mut tracker, ScenarioState::Running);
        tracing::info!(description = %scenario.description(), "scenario started");

        let verdict = {
            let body = self.execute(scenario, Arc::clone(&journal), &mut slot);
            tokio::select! {
                biased;
                () = cancel => Err(HarnessError::Cancelled(scenario.name().to_string())),
                outcome = body => outcome,
            }
        };
        let elapsed = started.elapsed();

        if let Some(mut topology) = slot.take() {
            topology.teardown().await;
        }

        let (status, reason, failed_handles) = match verdict {
            Ok(ScenarioOutcome::Completed) => {
                advance(&mut tracker, ScenarioState::Passed);
                tracing::info!(elapsed_ms = millis(elapsed), "scenario passed");
                (ScenarioStatus::Passed, None, Vec::new())
            }
            Ok(ScenarioOutcome::Skipped(reason)) => {
                advance(&mut tracker, ScenarioState::Skipped);
                tracing::info!(%reason, "scenario skipped");
                (ScenarioStatus::Skipped, Some(reason), Vec::new())
            }
            Err(error) => {
                advance(&mut tracker, ScenarioState::Failed);
                tracing::warn!(%error, setup = error.is_setup_error(), "scenario failed");
                (ScenarioStatus::Failed, Some(error.to_string()), error.failed_handles())
            }
        };

        ScenarioResult {
            id,
            name: scenario.name().to_string(),
            status,
            reason,
            failed_handles,
            started_at,
            elapsed_ms: millis(elapsed),
            transcript: journal.events(),
        }
    }

    async fn execute(
        &self,
        scenario: &dyn Scenario,
        journal: Arc<EventJournal>,
        slot: &mut Option<Topology>,
    ) -> Result<ScenarioOutcome> {
        let specs = scenario.topology(&self.config);
        // The slot owns the topology from the first connection on, so a
        // cancelled bring-up still gets torn down
        let topology = slot.insert(Topology::new(journal));
        self.manager.populate(topology, &specs).await?;
        scenario.run(topology, &self.config).await
    }

    /// Run scenarios as separate tasks, at most `options.concurrency` at once
    ///
    /// Results keep submission order. When the deadline passes, running
    /// scenarios are cancelled and queued ones fail immediately.
    pub async fn run_suite(&self, scenarios: Vec<Arc<dyn Scenario>>, options: SuiteOptions) -> SuiteReport {
        let span = tracing::info_span!("suite", scenarios = scenarios.len());
        async move {
            let started_at = Utc::now();
            tracing::info!(
                started = %started_at.format("%Y-%m-%d %H:%M:%S"),
                concurrency = options.concurrency,
                "===== suite started ====="
            );

            let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
            let deadline = options.deadline.map(|d| Instant::now() + d);

            let tasks: Vec<_> = scenarios
                .iter()
                .map(|scenario| {
                    let runner = self.clone();
                    let scenario = Arc::clone(scenario);
                    let permits = Arc::clone(&permits);
                    tokio::spawn(
                        async move {
                            let _permit = permits.acquire_owned().await;
                            let cancel = async move {
                                match deadline {
                                    Some(at) => tokio::time::sleep_until(at).await,
                                    None => std::future::pending().await,
                                }
                            };
                            runner.run_until(scenario.as_ref(), cancel).await
                        }
                        .in_current_span(),
                    )
                })
                .collect();

            let mut results = Vec::with_capacity(tasks.len());
            for (task, scenario) in futures::future::join_all(tasks).await.into_iter().zip(&scenarios) {
                match task {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        tracing::error!(scenario = %scenario.name(), error = %e, "scenario task aborted");
                        results.push(ScenarioResult {
                            id: ScenarioId::new(),
                            name: scenario.name().to_string(),
                            status: ScenarioStatus::Failed,
                            reason: Some(format!("scenario task aborted: {e}")),
                            failed_handles: Vec::new(),
                            started_at,
                            elapsed_ms: 0,
                            transcript: Vec::new(),
                        });
                    }
                }
            }

            let report = SuiteReport {
                started_at,
                finished_at: Utc::now(),
                results,
            };
            tracing::info!(
                finished = %report.finished_at.format("%Y-%m-%d %H:%M:%S"),
                passed = report.count(ScenarioStatus::Passed),
                failed = report.count(ScenarioStatus::Failed),
                skipped = report.count(ScenarioStatus::Skipped),
                "===== suite finished ====="
            );
            report
        }
        .instrument(span)
        .await
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn advance(tracker: &mut ScenarioTracker, to: ScenarioState) {
    if let Err(e) = tracker.advance(to) {
        tracing::error!(error = %e, "runner state machine violated");
        debug_assert!(false, "{e}");
    }
}
