use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::player::{Checkpoint, EpisodeKey};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredProgress {
    pub(crate) key: EpisodeKey,
    pub(crate) checkpoint: Checkpoint,
}

pub(crate) struct Database {
    conn: Connection,
}

impl Database {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Ok(Self { conn })
    }

    pub(crate) fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS playback_progress (
                show_id TEXT NOT NULL,
                episode TEXT NOT NULL,
                position_seconds REAL NOT NULL,
                duration_seconds REAL,
                completed INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (show_id, episode)
            );
            CREATE INDEX IF NOT EXISTS idx_playback_progress_updated ON playback_progress(updated_at DESC);
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn upsert_checkpoint(&self, key: &EpisodeKey, checkpoint: &Checkpoint) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO playback_progress (show_id, episode, position_seconds, duration_seconds, completed, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(show_id, episode) DO UPDATE SET
                position_seconds = excluded.position_seconds,
                duration_seconds = COALESCE(excluded.duration_seconds, playback_progress.duration_seconds),
                completed = MAX(excluded.completed, playback_progress.completed),
                updated_at = excluded.updated_at
            "#,
            params![
                key.show_id,
                key.episode,
                checkpoint.position_seconds,
                checkpoint.duration_seconds,
                checkpoint.completed,
                checkpoint.timestamp.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub(crate) fn load_checkpoint(&self, key: &EpisodeKey) -> Result<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(
                "SELECT position_seconds, duration_seconds, completed, updated_at FROM playback_progress WHERE show_id = ?1 AND episode = ?2",
                params![key.show_id, key.episode],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(position, duration, completed, updated_at)| {
            checkpoint_from_row(position, duration, completed, &updated_at)
        }))
    }

    pub(crate) fn list_checkpoints(&self) -> Result<Vec<StoredProgress>> {
        let mut stmt = self.conn.prepare(
            "SELECT show_id, episode, position_seconds, duration_seconds, completed, updated_at FROM playback_progress ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let updated_at: String = row.get(5)?;
            Ok(StoredProgress {
                key: EpisodeKey {
                    show_id: row.get(0)?,
                    episode: row.get(1)?,
                },
                checkpoint: checkpoint_from_row(row.get(2)?, row.get(3)?, row.get(4)?, &updated_at),
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn checkpoint_from_row(
    position_seconds: f64,
    duration_seconds: Option<f64>,
    completed: bool,
    updated_at: &str,
) -> Checkpoint {
    let timestamp = DateTime::parse_from_rfc3339(updated_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default();
    Checkpoint {
        position_seconds,
        duration_seconds,
        completed,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(episode: &str) -> EpisodeKey {
        EpisodeKey {
            show_id: "show-1".to_string(),
            episode: episode.to_string(),
        }
    }

    fn checkpoint(position: f64, duration: Option<f64>, completed: bool) -> Checkpoint {
        Checkpoint {
            position_seconds: position,
            duration_seconds: duration,
            completed,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn upsert_replaces_position_and_keeps_completion() {
        let db = Database::open_in_memory().expect("open db");
        db.migrate().expect("migrate");

        db.upsert_checkpoint(&key("1"), &checkpoint(1400.0, Some(1420.0), true))
            .expect("first write");
        db.upsert_checkpoint(&key("1"), &checkpoint(30.0, None, false))
            .expect("second write");

        let stored = db
            .load_checkpoint(&key("1"))
            .expect("load")
            .expect("row should exist");
        assert_eq!(stored.position_seconds, 30.0);
        assert_eq!(stored.duration_seconds, Some(1420.0));
        assert!(stored.completed);
    }

    #[test]
    fn load_missing_checkpoint_is_none() {
        let db = Database::open_in_memory().expect("open db");
        db.migrate().expect("migrate");
        assert!(db.load_checkpoint(&key("9")).expect("load").is_none());
    }

    #[test]
    fn list_orders_by_most_recent_update() {
        let db = Database::open_in_memory().expect("open db");
        db.migrate().expect("migrate");

        let mut older = checkpoint(10.0, Some(100.0), false);
        older.timestamp = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        db.upsert_checkpoint(&key("1"), &older).expect("write older");
        db.upsert_checkpoint(&key("2"), &checkpoint(20.0, None, false))
            .expect("write newer");

        let listed = db.list_checkpoints().expect("list");
        let episodes: Vec<_> = listed.iter().map(|row| row.key.episode.as_str()).collect();
        assert_eq!(episodes, vec!["2", "1"]);
        assert_eq!(listed[1].checkpoint.timestamp, older.timestamp);
    }
}
