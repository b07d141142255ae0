//! SQLite-backed event store.
//!
//! Events are keyed by their 5-digit access code; media URLs live in an
//! ordered child table so upload order survives round-trips. Expiry is
//! enforced on lookup and by a best-effort sweep.

use crate::code::AccessCode;
use crate::event::{Event, RetentionWindow};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

/// How many fresh codes `create_event` tries before giving up.
///
/// A collision means the random code already names a live event; retrying
/// against the primary key is what keeps two uploads from silently
/// overwriting each other.
const CODE_ATTEMPTS: usize = 8;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no event with that code")]
    NotFound,
    #[error("this event has expired")]
    Expired,
    #[error("could not find an unused access code after {0} attempts")]
    CodeSpaceExhausted(usize),
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("bad timestamp in database: {0}")]
    BadTimestamp(#[from] chrono::ParseError),
}

/// Event store over a single SQLite connection.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open (and if needed create) the store at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        tracing::debug!(path = %db_path.display(), "event store opened");
        Ok(Self { conn })
    }

    /// In-memory store, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                 code       TEXT PRIMARY KEY,
                 created_at TEXT NOT NULL,
                 expires_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS event_media (
                 code     TEXT NOT NULL REFERENCES events(code),
                 position INTEGER NOT NULL,
                 url      TEXT NOT NULL,
                 PRIMARY KEY (code, position)
             );",
        )?;
        Ok(())
    }

    /// Create an event under a freshly generated code.
    ///
    /// Generation retries against the primary-key constraint up to a bounded
    /// attempt count, so an existing event is never overwritten.
    pub fn create_event(
        &mut self,
        urls: &[String],
        retention: RetentionWindow,
    ) -> Result<Event, StoreError> {
        self.create_event_with(urls, retention, &mut rand::thread_rng())
    }

    /// [`create_event`](Self::create_event) with caller-supplied randomness.
    pub fn create_event_with(
        &mut self,
        urls: &[String],
        retention: RetentionWindow,
        rng: &mut impl Rng,
    ) -> Result<Event, StoreError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = AccessCode::generate(rng);
            let event = Event::new(code, urls.to_vec(), retention);
            match self.insert_event(&event) {
                Ok(()) => {
                    tracing::info!(
                        code = %event.code,
                        media = event.urls.len(),
                        expires_at = %event.expires_at,
                        "event created"
                    );
                    return Ok(event);
                }
                Err(StoreError::Database(rusqlite::Error::SqliteFailure(e, _)))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    tracing::debug!(code = %event.code, "access code collision, regenerating");
                }
                Err(other) => return Err(other),
            }
        }
        Err(StoreError::CodeSpaceExhausted(CODE_ATTEMPTS))
    }

    /// Insert a fully built event. Fails on a code collision.
    pub fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO events (code, created_at, expires_at) VALUES (?1, ?2, ?3)",
            params![
                event.code.as_str(),
                format_timestamp(event.created_at),
                format_timestamp(event.expires_at),
            ],
        )?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO event_media (code, position, url) VALUES (?1, ?2, ?3)")?;
            for (position, url) in event.urls.iter().enumerate() {
                stmt.execute(params![event.code.as_str(), position as i64, url])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Fetch the raw event row, expired or not.
    pub fn get_event(&self, code: &AccessCode) -> Result<Option<Event>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT created_at, expires_at FROM events WHERE code = ?1",
                [code.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((created_raw, expires_raw)) = row else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT url FROM event_media WHERE code = ?1 ORDER BY position")?;
        let urls = stmt
            .query_map([code.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Event {
            code: code.clone(),
            urls,
            created_at: parse_timestamp(&created_raw)?,
            expires_at: parse_timestamp(&expires_raw)?,
        }))
    }

    /// Fetch an event a viewer may see: absent codes are `NotFound`, codes
    /// whose event has passed its deadline are `Expired`.
    pub fn lookup_active(&self, code: &AccessCode) -> Result<Event, StoreError> {
        let event = self.get_event(code)?.ok_or(StoreError::NotFound)?;
        if event.is_expired(Utc::now()) {
            return Err(StoreError::Expired);
        }
        Ok(event)
    }

    /// Delete every event past its deadline. Returns how many were removed.
    pub fn sweep_expired(&mut self) -> Result<usize, StoreError> {
        let now = format_timestamp(Utc::now());
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM event_media
             WHERE code IN (SELECT code FROM events WHERE expires_at <= ?1)",
            [&now],
        )?;
        let removed = tx.execute("DELETE FROM events WHERE expires_at <= ?1", [&now])?;
        tx.commit()?;

        if removed > 0 {
            tracing::info!(removed, "expired events swept");
        }
        Ok(removed)
    }

    /// Number of stored events, expired ones included.
    pub fn event_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Fixed-width UTC timestamps ("2026-08-25T18:00:00Z") so the sweep's string
/// comparison in SQL orders chronologically.
fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
