//! SQLite-backed persistence for the two tables spec.md names (§6.4): agent
//! connection history and model name mappings. Every query opens its own connection
//! inside `spawn_blocking`, matching the store pattern the rest of this codebase uses
//! for its other sqlite-backed stores.

use std::path::{Path, PathBuf};

use agentbridge_protocol::ModelMapping;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(String),
    #[error("task join: {0}")]
    Join(String),
}

#[derive(Debug, Clone)]
pub struct AgentHistoryRow {
    pub id: String,
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

pub struct Store {
    db_path: PathBuf,
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn from_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

impl Store {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path).map_err(|e| PersistError::Sqlite(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| PersistError::Sqlite(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS model_mappings (
                public_name TEXT PRIMARY KEY,
                internal_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| PersistError::Sqlite(e.to_string()))?;
        Ok(Self { db_path })
    }

    pub async fn upsert_agent(&self, id: String, name: String, seen_at: DateTime<Utc>) -> Result<(), PersistError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| PersistError::Sqlite(e.to_string()))?;
            conn.execute(
                r#"
                INSERT INTO agents (id, name, first_seen, last_seen) VALUES (?1, ?2, ?3, ?3)
                ON CONFLICT(id) DO UPDATE SET name = excluded.name, last_seen = excluded.last_seen
                "#,
                params![id, name, to_rfc3339(seen_at)],
            )
            .map_err(|e| PersistError::Sqlite(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| PersistError::Join(e.to_string()))?
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentHistoryRow>, PersistError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| PersistError::Sqlite(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT id, name, first_seen, last_seen FROM agents ORDER BY id ASC")
                .map_err(|e| PersistError::Sqlite(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let name: String = row.get(1)?;
                    let first_seen: String = row.get(2)?;
                    let last_seen: String = row.get(3)?;
                    Ok((id, name, first_seen, last_seen))
                })
                .map_err(|e| PersistError::Sqlite(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                let (id, name, first_seen, last_seen) = row.map_err(|e| PersistError::Sqlite(e.to_string()))?;
                out.push(AgentHistoryRow {
                    id,
                    name,
                    first_seen: from_rfc3339(&first_seen),
                    last_seen: from_rfc3339(&last_seen),
                });
            }
            Ok(out)
        })
        .await
        .map_err(|e| PersistError::Join(e.to_string()))?
    }

    pub async fn put_mapping(&self, mapping: ModelMapping) -> Result<(), PersistError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| PersistError::Sqlite(e.to_string()))?;
            conn.execute(
                r#"
                INSERT INTO model_mappings (public_name, internal_name, created_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(public_name) DO UPDATE SET internal_name = excluded.internal_name
                "#,
                params![mapping.public_name, mapping.internal_name, to_rfc3339(mapping.created_at)],
            )
            .map_err(|e| PersistError::Sqlite(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| PersistError::Join(e.to_string()))?
    }

    pub async fn delete_mapping(&self, public_name: String) -> Result<(), PersistError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| PersistError::Sqlite(e.to_string()))?;
            conn.execute("DELETE FROM model_mappings WHERE public_name = ?1", params![public_name])
                .map_err(|e| PersistError::Sqlite(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| PersistError::Join(e.to_string()))?
    }

    pub async fn list_mappings(&self) -> Result<Vec<ModelMapping>, PersistError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(|e| PersistError::Sqlite(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT public_name, internal_name, created_at FROM model_mappings ORDER BY public_name ASC")
                .map_err(|e| PersistError::Sqlite(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| {
                    let public_name: String = row.get(0)?;
                    let internal_name: String = row.get(1)?;
                    let created_at: String = row.get(2)?;
                    Ok((public_name, internal_name, created_at))
                })
                .map_err(|e| PersistError::Sqlite(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                let (public_name, internal_name, created_at) = row.map_err(|e| PersistError::Sqlite(e.to_string()))?;
                out.push(ModelMapping {
                    public_name,
                    internal_name,
                    created_at: from_rfc3339(&created_at),
                });
            }
            Ok(out)
        })
        .await
        .map_err(|e| PersistError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn agent_upsert_then_list_round_trips() {
        let file = NamedTempFile::new().unwrap();
        let store = Store::new(file.path()).unwrap();
        let now = Utc::now();
        store.upsert_agent("a1".into(), "agent-one".into(), now).await.unwrap();
        let rows = store.list_agents().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "a1");
        assert_eq!(rows[0].name, "agent-one");
    }

    #[tokio::test]
    async fn upsert_agent_twice_updates_not_duplicates() {
        let file = NamedTempFile::new().unwrap();
        let store = Store::new(file.path()).unwrap();
        store.upsert_agent("a1".into(), "first".into(), Utc::now()).await.unwrap();
        store.upsert_agent("a1".into(), "renamed".into(), Utc::now()).await.unwrap();
        let rows = store.list_agents().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "renamed");
    }

    #[tokio::test]
    async fn mapping_crud() {
        let file = NamedTempFile::new().unwrap();
        let store = Store::new(file.path()).unwrap();
        store.put_mapping(ModelMapping::new("gpt-local", "llama-3-8b")).await.unwrap();
        let mappings = store.list_mappings().await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].internal_name, "llama-3-8b");

        store.delete_mapping("gpt-local".into()).await.unwrap();
        assert!(store.list_mappings().await.unwrap().is_empty());
    }
}
