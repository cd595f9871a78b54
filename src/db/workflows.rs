//! Durable state for the background job runner.
//!
//! `workflow_runs` holds one row per workflow invocation; `workflow_steps`
//! memoizes the output of every completed step so a resumed run skips work it
//! already did.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::now_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn parse(s: &str) -> Result<RunStatus> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => anyhow::bail!("Invalid run status: {}", s),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow: String,
    pub payload: Value,
    pub status: RunStatus,
    /// Number of failed attempts so far.
    pub attempts: u32,
    pub run_at: String,
    pub last_error: Option<String>,
    pub output: Option<Value>,
    pub created_at: String,
}

/// A memoized step: `completed` is false only for sleeps that have not yet
/// reached their deadline.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub output: Value,
    pub completed: bool,
}

const RUN_COLUMNS: &str =
    "id, workflow, payload, status, attempts, run_at, last_error, output, created_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<(WorkflowRunRow, String)> {
    Ok((
        WorkflowRunRow {
            id: row.get(0)?,
            workflow: row.get(1)?,
            payload: row.get(2)?,
            attempts: row.get(4)?,
            run_at: row.get(5)?,
            last_error: row.get(6)?,
            output: row.get(7)?,
            created_at: row.get(8)?,
        },
        row.get(3)?,
    ))
}

struct WorkflowRunRow {
    id: String,
    workflow: String,
    payload: String,
    attempts: u32,
    run_at: String,
    last_error: Option<String>,
    output: Option<String>,
    created_at: String,
}

impl WorkflowRunRow {
    fn into_run(self, status: &str) -> Result<WorkflowRun> {
        Ok(WorkflowRun {
            id: self.id,
            workflow: self.workflow,
            payload: serde_json::from_str(&self.payload).context("Corrupt workflow payload")?,
            status: RunStatus::parse(status)?,
            attempts: self.attempts,
            run_at: self.run_at,
            last_error: self.last_error,
            output: self
                .output
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("Corrupt workflow output")?,
            created_at: self.created_at,
        })
    }
}

pub struct WorkflowStore;

impl WorkflowStore {
    pub fn insert_run(conn: &Connection, workflow: &str, payload: &Value, run_at: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO workflow_runs (id, workflow, payload, status, run_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                workflow,
                serde_json::to_string(payload)?,
                RunStatus::Pending.as_str(),
                run_at,
                now,
            ],
        )
        .context("Failed to insert workflow run")?;
        Ok(id)
    }

    pub fn get_run(conn: &Connection, id: &str) -> Result<Option<WorkflowRun>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM workflow_runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                run_from_row,
            )
            .optional()
            .context("Failed to query workflow run")?;

        row.map(|(run, status)| run.into_run(&status)).transpose()
    }

    pub fn runs_for_workflow(conn: &Connection, workflow: &str) -> Result<Vec<WorkflowRun>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM workflow_runs WHERE workflow = ?1 ORDER BY created_at ASC",
                RUN_COLUMNS
            ))
            .context("Failed to prepare workflow run query")?;

        let rows = stmt
            .query_map(params![workflow], run_from_row)
            .context("Failed to query workflow runs")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to map workflow runs")?;

        rows.into_iter()
            .map(|(run, status)| run.into_run(&status))
            .collect()
    }

    /// Atomically move up to `limit` due runs from pending to running.
    pub fn claim_due(conn: &Connection, now: &str, limit: usize) -> Result<Vec<WorkflowRun>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let tx = conn
            .unchecked_transaction()
            .context("Failed to begin claim transaction")?;

        let rows = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM workflow_runs WHERE status = ?1 AND run_at <= ?2 \
                     ORDER BY run_at ASC LIMIT ?3",
                    RUN_COLUMNS
                ))
                .context("Failed to prepare due run query")?;

            let rows = stmt
                .query_map(
                    params![RunStatus::Pending.as_str(), now, limit as i64],
                    run_from_row,
                )
                .context("Failed to query due runs")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("Failed to map due runs")?;
            rows
        };

        let mut claimed = Vec::with_capacity(rows.len());
        for (row, _) in rows {
            tx.execute(
                "UPDATE workflow_runs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![RunStatus::Running.as_str(), now_timestamp(), row.id],
            )
            .context("Failed to claim workflow run")?;
            claimed.push(row.into_run(RunStatus::Running.as_str())?);
        }

        tx.commit().context("Failed to commit claim transaction")?;
        Ok(claimed)
    }

    pub fn complete_run(conn: &Connection, id: &str, output: &Value) -> Result<()> {
        conn.execute(
            "UPDATE workflow_runs SET status = ?1, output = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                RunStatus::Completed.as_str(),
                serde_json::to_string(output)?,
                now_timestamp(),
                id,
            ],
        )
        .context("Failed to complete workflow run")?;
        Ok(())
    }

    /// Put a run back to sleep until `run_at` without counting an attempt.
    pub fn suspend_run(conn: &Connection, id: &str, run_at: &str) -> Result<()> {
        conn.execute(
            "UPDATE workflow_runs SET status = ?1, run_at = ?2, updated_at = ?3 WHERE id = ?4",
            params![RunStatus::Pending.as_str(), run_at, now_timestamp(), id],
        )
        .context("Failed to suspend workflow run")?;
        Ok(())
    }

    pub fn retry_run(conn: &Connection, id: &str, attempts: u32, run_at: &str, error: &str) -> Result<()> {
        conn.execute(
            "UPDATE workflow_runs SET status = ?1, attempts = ?2, run_at = ?3, last_error = ?4, updated_at = ?5 \
             WHERE id = ?6",
            params![
                RunStatus::Pending.as_str(),
                attempts,
                run_at,
                error,
                now_timestamp(),
                id,
            ],
        )
        .context("Failed to reschedule workflow run")?;
        Ok(())
    }

    pub fn fail_run(conn: &Connection, id: &str, attempts: u32, error: &str) -> Result<()> {
        conn.execute(
            "UPDATE workflow_runs SET status = ?1, attempts = ?2, last_error = ?3, updated_at = ?4 WHERE id = ?5",
            params![RunStatus::Failed.as_str(), attempts, error, now_timestamp(), id],
        )
        .context("Failed to mark workflow run failed")?;
        Ok(())
    }

    /// Runs left `running` by a crashed process become claimable again.
    pub fn reset_running(conn: &Connection) -> Result<usize> {
        conn.execute(
            "UPDATE workflow_runs SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![
                RunStatus::Pending.as_str(),
                now_timestamp(),
                RunStatus::Running.as_str(),
            ],
        )
        .context("Failed to reset interrupted workflow runs")
    }

    pub fn get_step(conn: &Connection, run_id: &str, name: &str) -> Result<Option<StepRecord>> {
        let row: Option<(String, bool)> = conn
            .query_row(
                "SELECT output, completed FROM workflow_steps WHERE run_id = ?1 AND name = ?2",
                params![run_id, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query workflow step")?;

        row.map(|(output, completed)| {
            Ok(StepRecord {
                output: serde_json::from_str(&output).context("Corrupt step output")?,
                completed,
            })
        })
        .transpose()
    }

    pub fn save_step(conn: &Connection, run_id: &str, name: &str, output: &Value, completed: bool) -> Result<()> {
        conn.execute(
            "INSERT INTO workflow_steps (run_id, name, output, completed, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(run_id, name) DO UPDATE SET output = excluded.output, \
             completed = excluded.completed, updated_at = excluded.updated_at",
            params![
                run_id,
                name,
                serde_json::to_string(output)?,
                completed,
                now_timestamp(),
            ],
        )
        .context("Failed to save workflow step")?;
        Ok(())
    }
}
