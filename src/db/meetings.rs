//! Meeting record persistence.
//!
//! Every status change is a guarded conditional update: the `WHERE` clause
//! re-checks the expected prior status, and the affected-row count tells the
//! caller whether its write won. Duplicate or racing deliveries collapse to a
//! single effective transition.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::now_timestamp;
use crate::meeting::MeetingStatus;

const MEETING_COLUMNS: &str = "id, name, user_id, agent_id, status, started_at, ended_at, \
     transcript_url, recording_url, summary, created_at, updated_at";

/// A meeting record from the database.
#[derive(Debug, Clone, Serialize)]
pub struct MeetingRecord {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub agent_id: String,
    pub status: MeetingStatus,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub transcript_url: Option<String>,
    pub recording_url: Option<String>,
    pub summary: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl MeetingRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            user_id: row.get(2)?,
            agent_id: row.get(3)?,
            status: row.get(4)?,
            started_at: row.get(5)?,
            ended_at: row.get(6)?,
            transcript_url: row.get(7)?,
            recording_url: row.get(8)?,
            summary: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

/// Fields supplied by the user-facing create operation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMeeting {
    pub name: String,
    pub user_id: String,
    pub agent_id: String,
}

/// Repository for meeting records.
pub struct MeetingRepository;

impl MeetingRepository {
    /// Insert a new meeting with status `upcoming`.
    pub fn insert(conn: &Connection, meeting: &NewMeeting) -> Result<MeetingRecord> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = now_timestamp();

        conn.execute(
            "INSERT INTO meetings (id, name, user_id, agent_id, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                meeting.name,
                meeting.user_id,
                meeting.agent_id,
                MeetingStatus::Upcoming,
                now,
            ],
        )
        .context("Failed to insert meeting")?;

        Self::get(conn, &id)?.context("Inserted meeting vanished")
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<MeetingRecord>> {
        conn.query_row(
            &format!("SELECT {} FROM meetings WHERE id = ?1", MEETING_COLUMNS),
            params![id],
            MeetingRecord::from_row,
        )
        .optional()
        .context("Failed to query meeting")
    }

    pub fn status(conn: &Connection, id: &str) -> Result<Option<MeetingStatus>> {
        conn.query_row(
            "SELECT status FROM meetings WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query meeting status")
    }

    pub fn count_for_user(conn: &Connection, user_id: &str) -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM meetings WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .context("Failed to count meetings")
    }

    /// `upcoming -> active`. Keeps an existing `started_at`.
    pub fn mark_active(conn: &Connection, id: &str, started_at: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET status = ?1, started_at = COALESCE(started_at, ?2), updated_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![
                    MeetingStatus::Active,
                    started_at,
                    now_timestamp(),
                    id,
                    MeetingStatus::Upcoming,
                ],
            )
            .context("Failed to mark meeting active")?;
        Ok(changed > 0)
    }

    /// Fill in a missing `started_at` on a meeting that is already past `upcoming`.
    pub fn backfill_started_at(conn: &Connection, id: &str, started_at: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET started_at = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND started_at IS NULL AND status != ?4",
                params![started_at, now_timestamp(), id, MeetingStatus::Upcoming],
            )
            .context("Failed to backfill meeting start time")?;
        Ok(changed > 0)
    }

    /// `active -> processing`, stamping `ended_at`. A meeting whose summary
    /// was stored while the call was still live goes straight to `completed`.
    pub fn mark_ended(conn: &Connection, id: &str, ended_at: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET status = CASE WHEN summary IS NULL THEN ?1 ELSE ?2 END, \
                 ended_at = ?3, updated_at = ?4 \
                 WHERE id = ?5 AND status = ?6",
                params![
                    MeetingStatus::Processing,
                    MeetingStatus::Completed,
                    ended_at,
                    now_timestamp(),
                    id,
                    MeetingStatus::Active,
                ],
            )
            .context("Failed to mark meeting ended")?;
        Ok(changed > 0)
    }

    /// Last write wins. Returns false when the meeting does not exist.
    pub fn set_transcript_url(conn: &Connection, id: &str, url: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET transcript_url = ?1, updated_at = ?2 WHERE id = ?3",
                params![url, now_timestamp(), id],
            )
            .context("Failed to store transcript URL")?;
        Ok(changed > 0)
    }

    /// Last write wins. Returns false when the meeting does not exist.
    pub fn set_recording_url(conn: &Connection, id: &str, url: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET recording_url = ?1, updated_at = ?2 WHERE id = ?3",
                params![url, now_timestamp(), id],
            )
            .context("Failed to store recording URL")?;
        Ok(changed > 0)
    }

    /// Store the summary, last write wins. `processing` becomes `completed`;
    /// any earlier status is kept and [`Self::mark_ended`] completes the
    /// meeting when the call ends. Returns false when the meeting does not
    /// exist.
    pub fn store_summary(conn: &Connection, id: &str, summary: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET summary = ?1, \
                 status = CASE WHEN status = ?2 THEN ?3 ELSE status END, updated_at = ?4 \
                 WHERE id = ?5",
                params![
                    summary,
                    MeetingStatus::Processing,
                    MeetingStatus::Completed,
                    now_timestamp(),
                    id,
                ],
            )
            .context("Failed to save meeting summary")?;
        Ok(changed > 0)
    }
}
