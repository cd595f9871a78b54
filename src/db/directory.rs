//! Users and agents.
//!
//! Read-only from the lifecycle's point of view; these exist so that
//! handlers can look up agent instructions, owner emails, and speaker names.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;
use std::collections::HashMap;

use super::now_timestamp;

#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub instructions: String,
    pub user_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerKind {
    User,
    Agent,
}

/// Display data for a transcript speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerRecord {
    pub name: String,
    pub image: Option<String>,
    pub kind: SpeakerKind,
}

pub struct UserRepository;

impl UserRepository {
    pub fn insert(
        conn: &Connection,
        name: &str,
        email: Option<&str>,
        image: Option<&str>,
    ) -> Result<UserRecord> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT INTO users (id, name, email, image, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, email, image, now_timestamp()],
        )
        .context("Failed to insert user")?;

        Ok(UserRecord {
            id,
            name: name.to_string(),
            email: email.map(String::from),
            image: image.map(String::from),
        })
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<UserRecord>> {
        conn.query_row(
            "SELECT id, name, email, image FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    image: row.get(3)?,
                })
            },
        )
        .optional()
        .context("Failed to query user")
    }
}

pub struct AgentRepository;

impl AgentRepository {
    pub fn insert(
        conn: &Connection,
        name: &str,
        instructions: &str,
        user_id: &str,
    ) -> Result<AgentRecord> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let created_at = now_timestamp();
        conn.execute(
            "INSERT INTO agents (id, name, instructions, user_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, instructions, user_id, created_at],
        )
        .context("Failed to insert agent")?;

        Ok(AgentRecord {
            id,
            name: name.to_string(),
            instructions: instructions.to_string(),
            user_id: user_id.to_string(),
            created_at,
        })
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<AgentRecord>> {
        conn.query_row(
            "SELECT id, name, instructions, user_id, created_at FROM agents WHERE id = ?1",
            params![id],
            |row| {
                Ok(AgentRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    instructions: row.get(2)?,
                    user_id: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()
        .context("Failed to query agent")
    }
}

/// Resolve speaker ids against both users and agents.
///
/// Ids missing from both tables are absent from the returned map.
pub fn speakers_by_id(conn: &Connection, ids: &[String]) -> Result<HashMap<String, SpeakerRecord>> {
    let mut speakers = HashMap::new();
    if ids.is_empty() {
        return Ok(speakers);
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

    let user_sql = format!(
        "SELECT id, name, image FROM users WHERE id IN ({})",
        placeholders
    );
    let mut stmt = conn
        .prepare(&user_sql)
        .context("Failed to prepare user speaker query")?;
    let users = stmt
        .query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                SpeakerRecord {
                    name: row.get(1)?,
                    image: row.get(2)?,
                    kind: SpeakerKind::User,
                },
            ))
        })
        .context("Failed to query user speakers")?;
    for user in users {
        let (id, speaker) = user?;
        speakers.insert(id, speaker);
    }

    let agent_sql = format!("SELECT id, name FROM agents WHERE id IN ({})", placeholders);
    let mut stmt = conn
        .prepare(&agent_sql)
        .context("Failed to prepare agent speaker query")?;
    let agents = stmt
        .query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                SpeakerRecord {
                    name: row.get(1)?,
                    image: None,
                    kind: SpeakerKind::Agent,
                },
            ))
        })
        .context("Failed to query agent speakers")?;
    for agent in agents {
        let (id, speaker) = agent?;
        speakers.insert(id, speaker);
    }

    Ok(speakers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_user_round_trip() {
        let conn = setup_db();
        let user = UserRepository::insert(&conn, "Ada", Some("ada@example.com"), None).unwrap();

        let stored = UserRepository::get(&conn, &user.id).unwrap().unwrap();
        assert_eq!(stored.name, "Ada");
        assert_eq!(stored.email.as_deref(), Some("ada@example.com"));
        assert!(UserRepository::get(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_agent_round_trip() {
        let conn = setup_db();
        let agent = AgentRepository::insert(&conn, "Tutor", "Explain things slowly", "owner").unwrap();

        let stored = AgentRepository::get(&conn, &agent.id).unwrap().unwrap();
        assert_eq!(stored.instructions, "Explain things slowly");
        assert_eq!(stored.user_id, "owner");
    }

    #[test]
    fn test_speakers_by_id_spans_users_and_agents() {
        let conn = setup_db();
        let user = UserRepository::insert(&conn, "Ada", None, Some("https://img/ada.png")).unwrap();
        let agent = AgentRepository::insert(&conn, "Tutor", "Be kind", &user.id).unwrap();

        let ids = vec![user.id.clone(), agent.id.clone(), "ghost".to_string()];
        let speakers = speakers_by_id(&conn, &ids).unwrap();

        assert_eq!(speakers.len(), 2);
        assert_eq!(speakers[&user.id].name, "Ada");
        assert_eq!(speakers[&user.id].image.as_deref(), Some("https://img/ada.png"));
        assert_eq!(speakers[&user.id].kind, SpeakerKind::User);
        assert_eq!(speakers[&agent.id].name, "Tutor");
        assert_eq!(speakers[&agent.id].kind, SpeakerKind::Agent);
        assert!(!speakers.contains_key("ghost"));
    }

    #[test]
    fn test_speakers_by_id_empty_input() {
        let conn = setup_db();
        assert!(speakers_by_id(&conn, &[]).unwrap().is_empty());
    }
}
