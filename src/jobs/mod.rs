//! Durable background workflows backed by SQLite.
//!
//! A workflow is a sequence of named steps. Every completed step's output is
//! stored in `workflow_steps`, so a retried or resumed run replays memoized
//! results instead of repeating side effects. A sleep step persists its
//! deadline and hands the run back to the queue, which keeps waiting
//! workflows from occupying a worker.

pub mod summarize;
pub mod time_limit;

pub use summarize::SummarizeTranscript;
pub use time_limit::EndMeetingOnTimeLimit;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::JobsConfig;
use crate::db::{now_timestamp, parse_timestamp, timestamp, Database, WorkflowRun, WorkflowStore};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Not a failure: the run sleeps until the given timestamp.
    #[error("workflow suspended until {0}")]
    Suspended(String),

    #[error("step '{step}' failed after {attempts} attempts: {message}")]
    StepFailed {
        step: String,
        attempts: u32,
        message: String,
    },

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whole-workflow retry budget. `None` uses the configured default.
    fn retries(&self) -> Option<u32> {
        None
    }

    async fn run(&self, ctx: &StepContext, payload: Value) -> Result<Value, WorkflowError>;
}

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at 64x.
pub fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(64);
    base.saturating_mul(factor)
}

/// Step execution for a single run.
pub struct StepContext {
    db: Database,
    run_id: String,
    step_attempts: u32,
    backoff_base: Duration,
}

impl StepContext {
    pub fn new(db: Database, run_id: String, config: &JobsConfig) -> Self {
        Self {
            db,
            run_id,
            step_attempts: config.step_attempts.max(1),
            backoff_base: config.backoff_base(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run `step` at most once to completion for this workflow run.
    ///
    /// A stored output is returned without calling `step`. Failures retry
    /// with exponential backoff up to the configured attempts.
    pub async fn run<T, F, Fut>(&self, name: &str, mut step: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(record) = self.load_step(name).await? {
            if record.completed {
                debug!("Step {} of run {} already completed", name, self.run_id);
                return serde_json::from_value(record.output)
                    .with_context(|| format!("Corrupt output for step {}", name))
                    .map_err(WorkflowError::Internal);
            }
        }

        let mut attempt = 1;
        loop {
            match step().await {
                Ok(output) => {
                    let value = serde_json::to_value(&output)
                        .with_context(|| format!("Failed to serialize output of step {}", name))?;
                    self.save_step(name, value, true).await?;
                    debug!("Step {} of run {} completed", name, self.run_id);
                    return Ok(output);
                }
                Err(e) if attempt < self.step_attempts => {
                    let delay = backoff(self.backoff_base, attempt);
                    warn!(
                        "Step {} of run {} failed (attempt {}/{}), retrying in {:?}: {:#}",
                        name, self.run_id, attempt, self.step_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(WorkflowError::StepFailed {
                        step: name.to_string(),
                        attempts: attempt,
                        message: format!("{:#}", e),
                    });
                }
            }
        }
    }

    /// Durable sleep. The first call records a deadline and suspends the run;
    /// once the deadline has passed the step completes and execution moves on.
    pub async fn sleep(&self, name: &str, duration: Duration) -> Result<(), WorkflowError> {
        let now = Utc::now();

        let deadline = match self.load_step(name).await? {
            Some(record) if record.completed => return Ok(()),
            Some(record) => {
                let raw = record
                    .output
                    .as_str()
                    .map(String::from)
                    .with_context(|| format!("Sleep step {} has no deadline", name))?;
                parse_timestamp(&raw)?
            }
            None => {
                let delay = chrono::Duration::from_std(duration)
                    .with_context(|| format!("Sleep duration out of range for step {}", name))?;
                let deadline = now + delay;
                self.save_step(name, Value::String(timestamp(deadline)), false)
                    .await?;
                deadline
            }
        };

        if deadline <= now {
            self.save_step(name, Value::String(timestamp(deadline)), true)
                .await?;
            return Ok(());
        }

        Err(WorkflowError::Suspended(timestamp(deadline)))
    }

    async fn load_step(&self, name: &str) -> anyhow::Result<Option<crate::db::StepRecord>> {
        let run_id = self.run_id.clone();
        let name = name.to_string();
        self.db
            .call(move |conn| WorkflowStore::get_step(conn, &run_id, &name))
            .await
    }

    async fn save_step(&self, name: &str, output: Value, completed: bool) -> anyhow::Result<()> {
        let run_id = self.run_id.clone();
        let name = name.to_string();
        self.db
            .call(move |conn| WorkflowStore::save_step(conn, &run_id, &name, &output, completed))
            .await
    }
}

/// Producer side of the runner: persists runs for later execution.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn enqueue(&self, workflow: &str, payload: Value) -> anyhow::Result<String> {
        self.schedule_after(workflow, payload, Duration::ZERO).await
    }

    pub async fn schedule_after(
        &self,
        workflow: &str,
        payload: Value,
        delay: Duration,
    ) -> anyhow::Result<String> {
        let delay = chrono::Duration::from_std(delay).context("Schedule delay out of range")?;
        let run_at = timestamp(Utc::now() + delay);
        let workflow_name = workflow.to_string();

        let id = self
            .db
            .call(move |conn| WorkflowStore::insert_run(conn, &workflow_name, &payload, &run_at))
            .await?;

        info!("Enqueued workflow {} as run {}", workflow, id);
        Ok(id)
    }
}

/// Consumer side: polls due runs and executes registered workflows.
pub struct JobRunner {
    db: Database,
    config: JobsConfig,
    workflows: HashMap<&'static str, Arc<dyn Workflow>>,
    permits: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(db: Database, config: JobsConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            db,
            config,
            workflows: HashMap::new(),
            permits,
        }
    }

    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        debug!("Registered workflow {}", workflow.name());
        self.workflows.insert(workflow.name(), workflow);
    }

    /// Make runs interrupted by a crash claimable again.
    pub async fn recover(&self) -> anyhow::Result<usize> {
        let reset = self.db.call(WorkflowStore::reset_running).await?;
        if reset > 0 {
            warn!("Reset {} interrupted workflow runs", reset);
        }
        Ok(reset)
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Job runner started (concurrency {}, poll every {:?})",
                self.config.concurrency,
                self.config.poll_interval()
            );
            loop {
                if let Err(e) = self.dispatch_due().await {
                    error!("Job runner poll failed: {:#}", e);
                }
                tokio::time::sleep(self.config.poll_interval()).await;
            }
        })
    }

    /// Claim as many due runs as there are free workers and spawn them.
    pub async fn dispatch_due(self: &Arc<Self>) -> anyhow::Result<usize> {
        let available = self.permits.available_permits();
        if available == 0 {
            return Ok(0);
        }

        let now = now_timestamp();
        let runs = self
            .db
            .call(move |conn| WorkflowStore::claim_due(conn, &now, available))
            .await?;
        let count = runs.len();

        for run in runs {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .context("Job runner semaphore closed")?;
            let runner = Arc::clone(self);
            tokio::spawn(async move {
                runner.execute(run).await;
                drop(permit);
            });
        }

        Ok(count)
    }

    /// Execute every due run inline until none is left. Returns the number
    /// of executions.
    pub async fn run_until_idle(&self) -> anyhow::Result<usize> {
        let mut executed = 0;
        loop {
            let now = now_timestamp();
            let runs = self
                .db
                .call(move |conn| WorkflowStore::claim_due(conn, &now, 1))
                .await?;
            let Some(run) = runs.into_iter().next() else {
                return Ok(executed);
            };
            self.execute(run).await;
            executed += 1;
        }
    }

    async fn execute(&self, run: WorkflowRun) {
        let run_id = run.id.clone();
        if let Err(e) = self.try_execute(run).await {
            error!("Failed to record outcome of run {}: {:#}", run_id, e);
        }
    }

    async fn try_execute(&self, run: WorkflowRun) -> anyhow::Result<()> {
        let Some(workflow) = self.workflows.get(run.workflow.as_str()).cloned() else {
            let err = WorkflowError::UnknownWorkflow(run.workflow.clone());
            error!("Run {}: {}", run.id, err);
            let (id, attempts, message) = (run.id.clone(), run.attempts + 1, err.to_string());
            return self
                .db
                .call(move |conn| WorkflowStore::fail_run(conn, &id, attempts, &message))
                .await;
        };

        debug!("Executing {} run {} (attempt {})", run.workflow, run.id, run.attempts + 1);
        let ctx = StepContext::new(self.db.clone(), run.id.clone(), &self.config);
        let outcome = workflow.run(&ctx, run.payload.clone()).await;
        let id = run.id.clone();

        match outcome {
            Ok(output) => {
                info!("Workflow {} run {} completed", run.workflow, run.id);
                self.db
                    .call(move |conn| WorkflowStore::complete_run(conn, &id, &output))
                    .await
            }
            Err(WorkflowError::Suspended(until)) => {
                debug!("Workflow {} run {} sleeping until {}", run.workflow, run.id, until);
                self.db
                    .call(move |conn| WorkflowStore::suspend_run(conn, &id, &until))
                    .await
            }
            Err(err) => {
                let attempts = run.attempts + 1;
                let budget = workflow.retries().unwrap_or(self.config.workflow_retries);
                let message = err.to_string();

                if attempts <= budget {
                    let delay = backoff(self.config.backoff_base(), attempts);
                    let run_at = timestamp(Utc::now() + chrono::Duration::from_std(delay)?);
                    warn!(
                        "Workflow {} run {} failed (retry {}/{} in {:?}): {}",
                        run.workflow, run.id, attempts, budget, delay, message
                    );
                    self.db
                        .call(move |conn| WorkflowStore::retry_run(conn, &id, attempts, &run_at, &message))
                        .await
                } else {
                    error!(
                        "Workflow {} run {} failed permanently after {} attempts: {}",
                        run.workflow, run.id, attempts, message
                    );
                    self.db
                        .call(move |conn| WorkflowStore::fail_run(conn, &id, attempts, &message))
                        .await
                }
            }
        }
    }
}
