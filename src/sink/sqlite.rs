//! SQLite-backed sink.
//!
//! Each reading becomes one row in [`WATER_LEVEL_TABLE`] and one row in
//! [`RAIN_TABLE`], sharing `base_date` and `sensor_id`, written in a single
//! transaction. Blocking SQLite calls run on tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};

use super::{BoxFuture, Reading, ReadingSink};
use crate::error::{GatewayError, Result};
use crate::protocol::TIMESTAMP_FORMAT;

/// Water level rows.
pub const WATER_LEVEL_TABLE: &str = "water_level_log";

/// Rainfall rows.
pub const RAIN_TABLE: &str = "rain_log";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS water_level_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    base_date   TEXT NOT NULL,
    sensor_id   TEXT NOT NULL,
    sensor_data REAL NOT NULL,
    input_date  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS rain_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    base_date   TEXT NOT NULL,
    sensor_id   TEXT NOT NULL,
    sensor_data REAL NOT NULL,
    input_date  TEXT NOT NULL
);
";

/// Stored `base_date` format.
const BASE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sink writing readings into a SQLite database.
#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, gone when the sink is dropped.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| GatewayError::Persistence("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| GatewayError::Persistence(format!("blocking task failed: {}", e)))?
    }

    /// Number of rows in `table`.
    pub async fn count_rows(&self, table: &'static str) -> Result<i64> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            Ok(conn.query_row(&sql, [], |row| row.get(0))?)
        })
        .await
    }

    /// Execute arbitrary SQL; for maintenance and tests.
    pub async fn execute_batch(&self, sql: &'static str) -> Result<()> {
        self.with_conn(move |conn| Ok(conn.execute_batch(sql)?)).await
    }
}

fn insert_blocking(conn: &mut Connection, reading: &Reading) -> Result<()> {
    let base_date = NaiveDateTime::parse_from_str(&reading.timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| {
            GatewayError::Persistence(format!(
                "invalid timestamp {:?}: {}",
                reading.timestamp, e
            ))
        })?
        .format(BASE_DATE_FORMAT)
        .to_string();

    // dropped without commit on any error, which rolls back
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO water_level_log (base_date, sensor_id, sensor_data, input_date)
         VALUES (?1, ?2, ?3, datetime('now'))",
        params![base_date, reading.device_id, f64::from(reading.water_level)],
    )?;
    tx.execute(
        "INSERT INTO rain_log (base_date, sensor_id, sensor_data, input_date)
         VALUES (?1, ?2, ?3, datetime('now'))",
        params![base_date, reading.device_id, f64::from(reading.rainfall)],
    )?;
    tx.commit()?;
    Ok(())
}

impl ReadingSink for SqliteSink {
    fn insert_reading<'a>(&'a self, reading: &'a Reading) -> BoxFuture<'a, Result<()>> {
        let reading = reading.clone();
        Box::pin(async move {
            let result = self
                .with_conn(move |conn| insert_blocking(conn, &reading))
                .await;
            if let Err(e) = &result {
                tracing::error!("transaction rolled back: {}", e);
            }
            result
        })
    }
}
