//! SQLite document store.
//!
//! One row per person plus one row per observation. Observations are keyed
//! by their position in the history and only ever inserted, never updated.

use crate::{Backend, PersistError};
use chrono::{DateTime, Utc};
use facemood_core::{Descriptor, Identity, Mood, Observation};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};

const CURRENT_SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE people (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    descriptor  BLOB NOT NULL,
    dim         INTEGER NOT NULL
);

CREATE TABLE observations (
    person_id   INTEGER NOT NULL REFERENCES people(id) ON DELETE CASCADE,
    seq         INTEGER NOT NULL,
    image_ref   TEXT NOT NULL,
    mood        TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    PRIMARY KEY (person_id, seq)
);
";

pub struct SqliteBackend {
    conn: Connection,
    location: Option<PathBuf>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, PersistError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(mut conn: Connection, location: Option<PathBuf>) -> Result<Self, PersistError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        run_migrations(&mut conn)?;
        Ok(Self { conn, location })
    }
}

fn run_migrations(conn: &mut Connection) -> Result<(), PersistError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(PersistError::Corrupt(format!(
            "database schema version {version} is newer than supported {CURRENT_SCHEMA_VERSION}"
        )));
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for next in (version + 1)..=CURRENT_SCHEMA_VERSION {
        apply_migration(&tx, next)?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    tracing::info!(from = version, to = CURRENT_SCHEMA_VERSION, "migrated people database");
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), PersistError> {
    match version {
        1 => tx.execute_batch(SCHEMA_V1)?,
        other => {
            return Err(PersistError::Corrupt(format!("no migration to schema version {other}")))
        }
    }
    Ok(())
}

fn encode_descriptor(descriptor: &Descriptor) -> Vec<u8> {
    descriptor.values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_descriptor(name: &str, blob: &[u8], dim: i64) -> Result<Descriptor, PersistError> {
    if blob.len() % 4 != 0 || (blob.len() / 4) as i64 != dim {
        return Err(PersistError::Corrupt(format!(
            "descriptor for {name}: {} bytes does not hold {dim} f32 values",
            blob.len()
        )));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Descriptor::new(values))
}

fn decode_observation(
    name: &str,
    image_ref: String,
    mood: String,
    observed_at: String,
) -> Result<Observation, PersistError> {
    let mood: Mood = mood
        .parse()
        .map_err(|e| PersistError::Corrupt(format!("observation for {name}: {e}")))?;
    let timestamp = DateTime::parse_from_rfc3339(&observed_at)
        .map_err(|e| {
            PersistError::Corrupt(format!("observation for {name}: bad timestamp {observed_at}: {e}"))
        })?
        .with_timezone(&Utc);
    Ok(Observation {
        image_ref,
        mood,
        timestamp,
    })
}

impl Backend for SqliteBackend {
    fn read_all(&self) -> Result<Vec<Identity>, PersistError> {
        let mut people = self
            .conn
            .prepare("SELECT id, name, descriptor, dim FROM people ORDER BY id")?;
        let rows = people
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut history = self.conn.prepare(
            "SELECT image_ref, mood, observed_at FROM observations
             WHERE person_id = ?1 ORDER BY seq",
        )?;

        let mut identities = Vec::with_capacity(rows.len());
        for (id, name, blob, dim) in rows {
            let descriptor = decode_descriptor(&name, &blob, dim)?;
            let raw = history
                .query_map(params![id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            let observations = raw
                .into_iter()
                .map(|(image_ref, mood, at)| decode_observation(&name, image_ref, mood, at))
                .collect::<Result<Vec<_>, _>>()?;

            identities.push(Identity {
                name,
                descriptor,
                history: observations,
            });
        }

        Ok(identities)
    }

    fn upsert(&mut self, identity: &Identity) -> Result<(), PersistError> {
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM people WHERE name = ?1",
                params![identity.name],
                |row| row.get(0),
            )
            .optional()?;

        let person_id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO people (name, descriptor, dim) VALUES (?1, ?2, ?3)",
                    params![
                        identity.name,
                        encode_descriptor(&identity.descriptor),
                        identity.descriptor.len() as i64
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        let stored: i64 = tx.query_row(
            "SELECT COUNT(*) FROM observations WHERE person_id = ?1",
            params![person_id],
            |row| row.get(0),
        )?;
        let stored = stored as usize;
        if stored > identity.history.len() {
            return Err(PersistError::Corrupt(format!(
                "{} has {stored} stored observations but only {} in memory",
                identity.name,
                identity.history.len()
            )));
        }

        {
            let mut insert = tx.prepare(
                "INSERT INTO observations (person_id, seq, image_ref, mood, observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (seq, obs) in identity.history.iter().enumerate().skip(stored) {
                insert.execute(params![
                    person_id,
                    seq as i64,
                    obs.image_ref,
                    obs.mood.as_str(),
                    obs.timestamp.to_rfc3339()
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            person = %identity.name,
            appended = identity.history.len() - stored,
            "upserted identity"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.location {
            Some(path) => format!("sqlite:{}", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }
}
