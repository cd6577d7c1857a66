//! Alarm persistence
//!
//! A single SQLite file behind one process-wide lock. Operations are
//! short; nothing does I/O fan-out inside the critical section. The
//! claim step reads and deactivates in one transaction so an alarm can
//! never fire twice, even across restarts.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use walnut_core::StorageError;

/// One persisted alarm.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub id: i64,
    pub fire_time: DateTime<Utc>,
    pub message: String,
    /// "ringtone" plays the built-in tone; anything else is a cheerword
    /// theme.
    pub theme: String,
    pub cheerword: Option<String>,
    pub active: bool,
}

impl Alarm {
    pub fn uses_cheerword(&self) -> bool {
        !self.theme.is_empty() && self.theme != "ringtone"
    }
}

/// SQLite-backed alarm store.
pub struct AlarmStore {
    conn: Mutex<Connection>,
}

impl AlarmStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute(
                "CREATE TABLE IF NOT EXISTS alarms (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    fire_time TEXT NOT NULL,
                    message TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    theme TEXT NOT NULL DEFAULT 'ringtone',
                    cheerword TEXT,
                    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
                )",
                [],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn add(
        &self,
        fire_time: DateTime<Utc>,
        message: &str,
        theme: &str,
    ) -> Result<Alarm, StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO alarms (fire_time, message, active, theme) VALUES (?1, ?2, 1, ?3)",
            params![fire_time.to_rfc3339(), message, theme],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();

        tracing::info!(id, fire_time = %fire_time, message, "alarm set");
        Ok(Alarm {
            id,
            fire_time,
            message: message.to_string(),
            theme: theme.to_string(),
            cheerword: None,
            active: true,
        })
    }

    /// Returns true when an alarm was actually removed.
    pub fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM alarms WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(removed > 0)
    }

    pub fn list_active(&self) -> Result<Vec<Alarm>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, fire_time, message, active, theme, cheerword
                 FROM alarms WHERE active = 1 ORDER BY fire_time",
            )
            .map_err(db_err)?;
        let alarms = stmt
            .query_map([], row_to_alarm)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(alarms)
    }

    pub fn get(&self, id: i64) -> Result<Option<Alarm>, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, fire_time, message, active, theme, cheerword
             FROM alarms WHERE id = ?1",
            params![id],
            row_to_alarm,
        )
        .optional()
        .map_err(db_err)
    }

    /// Claim the earliest due alarm: read and mark inactive in one
    /// transaction. At most one alarm per call.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<Alarm>, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let due = tx
            .query_row(
                "SELECT id, fire_time, message, active, theme, cheerword
                 FROM alarms
                 WHERE active = 1 AND fire_time <= ?1
                 ORDER BY fire_time LIMIT 1",
                params![now.to_rfc3339()],
                row_to_alarm,
            )
            .optional()
            .map_err(db_err)?;

        if let Some(alarm) = &due {
            tx.execute("UPDATE alarms SET active = 0 WHERE id = ?1", params![alarm.id])
                .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(due.map(|a| Alarm { active: false, ..a }))
    }

    /// Store a pre-generated cheerword on an alarm.
    pub fn set_cheerword(&self, id: i64, cheerword: &str) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute(
                "UPDATE alarms SET cheerword = ?1 WHERE id = ?2",
                params![cheerword, id],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Snooze is a fresh alarm; the fired one stays inactive.
    pub fn snooze(
        &self,
        from: &Alarm,
        now: DateTime<Utc>,
        minutes: u32,
    ) -> Result<Alarm, StorageError> {
        let fire_time = now + chrono::Duration::minutes(i64::from(minutes));
        self.add(fire_time, &from.message, &from.theme)
    }
}

fn row_to_alarm(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alarm> {
    let fire_time: String = row.get(1)?;
    let fire_time = DateTime::parse_from_rfc3339(&fire_time)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?
        .with_timezone(&Utc);

    Ok(Alarm {
        id: row.get(0)?,
        fire_time,
        message: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        theme: row.get(4)?,
        cheerword: row.get(5)?,
    })
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Io(std::io::Error::other(e.to_string()))
}
