//! Durable record storage.
//!
//! [`SqliteSink`] appends one row per enriched record to the `samples` table. The
//! connection is opened lazily on the first insert (creating the parent directory and
//! the schema when missing), held for the life of the process and dropped on
//! [`RecordSink::close`]. SQLite work runs on the blocking pool so a slow disk never
//! stalls the async runtime.
//!
//! [`LatestSnapshot`] keeps a pretty JSON copy of the most recent enriched record for
//! local tooling.

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::{AppResult, GatewayError};
use crate::normalize::TIMESTAMP_FIELD;
use crate::record::{EnrichedRecord, FieldValue};

/// Append-only sink for enriched records.
#[async_trait]
pub trait RecordSink: Send {
    /// Append one record.
    async fn insert(&mut self, record: &EnrichedRecord) -> AppResult<()>;

    /// Release the underlying handle.
    async fn close(&mut self) -> AppResult<()>;
}

/// Column name and the record field feeding it, in table order.
pub const SAMPLE_COLUMNS: [(&str, &str); 34] = [
    ("timestamp_utc", TIMESTAMP_FIELD),
    ("local_time", "local_time"),
    ("day_of_year", "day_of_year"),
    ("season_state", "season_state"),
    ("intent_window", "intent_window"),
    ("inside_temp_f", "inside_temp_f"),
    ("inside_humidity_rh", "inside_humidity_rh"),
    ("inside_dew_point_f", "inside_dew_point_f"),
    ("inside_vpd_kpa", "inside_vpd_kpa"),
    ("inside_brightness_lux", "inside_brightness_lux"),
    ("tsl_full_spectrum", "tsl_full_spectrum"),
    ("tsl_infrared", "tsl_infrared"),
    ("outside_temp_f", "outside_temp_f"),
    ("outside_humidity_rh", "outside_humidity_rh"),
    ("outside_brightness_raw", "outside_brightness_raw"),
    ("outside_color_r", "outside_color_r"),
    ("outside_color_g", "outside_color_g"),
    ("outside_color_b", "outside_color_b"),
    ("cloud_coverage_pct", "cloud_coverage_pct"),
    ("precip_probability_pct", "precip_probability_pct"),
    ("weather_code", "weather_code"),
    ("expected_light_trajectory", "expected_light_trajectory"),
    ("expected_humidity_decay", "expected_humidity_decay"),
    ("forecast_confidence", "forecast_confidence"),
    ("circulation_fan_pwm", "circulation_fan_pwm"),
    ("exhaust_fan_pwm", "exhaust_fan_pwm"),
    ("grow_light_pwm", "grow_light_pwm"),
    ("disconnected_sensors", "disconnected_sensors"),
    ("esp32_runtime_ms", "esp32_runtime_ms"),
    ("firmware_version", "firmware_version"),
    ("wifi_rssi", "wifi_rssi"),
    ("mqtt_reconnects", "mqtt_reconnects"),
    ("control_mode", "control_mode"),
    ("control_reason", "control_reason"),
];

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_utc TEXT NOT NULL,
    local_time TEXT,
    day_of_year INTEGER,
    season_state TEXT,
    intent_window TEXT,

    inside_temp_f REAL,
    inside_humidity_rh REAL,
    inside_dew_point_f REAL,
    inside_vpd_kpa REAL,
    inside_brightness_lux REAL,

    tsl_full_spectrum INTEGER,
    tsl_infrared INTEGER,

    outside_temp_f REAL,
    outside_humidity_rh REAL,
    outside_brightness_raw INTEGER,
    outside_color_r INTEGER,
    outside_color_g INTEGER,
    outside_color_b INTEGER,

    cloud_coverage_pct REAL,
    precip_probability_pct REAL,
    weather_code INTEGER,

    expected_light_trajectory TEXT,
    expected_humidity_decay TEXT,
    forecast_confidence REAL,

    circulation_fan_pwm INTEGER,
    exhaust_fan_pwm INTEGER,
    grow_light_pwm INTEGER,

    disconnected_sensors TEXT,

    esp32_runtime_ms INTEGER,
    firmware_version TEXT,
    wifi_rssi INTEGER,
    mqtt_reconnects INTEGER,

    control_mode TEXT,
    control_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp_utc);
"#;

fn insert_sql() -> String {
    let columns: Vec<&str> = SAMPLE_COLUMNS.iter().map(|(column, _)| *column).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO samples ({}) VALUES ({})",
        columns.join(", "),
        placeholders
    )
}

fn to_sql(value: Option<&FieldValue>) -> SqlValue {
    match value {
        None | Some(FieldValue::Null) => SqlValue::Null,
        Some(FieldValue::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(FieldValue::Int(i)) => SqlValue::Integer(*i),
        Some(FieldValue::Float(f)) => SqlValue::Real(*f),
        Some(FieldValue::Text(s)) => SqlValue::Text(s.clone()),
    }
}

/// SQLite-backed [`RecordSink`].
#[derive(Debug, Clone)]
pub struct SqliteSink {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteSink {
    /// Sink writing to `path`. Nothing is opened until the first insert.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a connection is currently held.
    pub fn is_open(&self) -> bool {
        self.conn.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Number of stored rows.
    pub async fn row_count(&self) -> AppResult<i64> {
        self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
                .map_err(GatewayError::from)
        })
        .await
    }

    fn open(path: &Path) -> AppResult<Connection> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!(path = %path.display(), "Opening SQLite database");
        let conn = Connection::open(path)?;
        info!("Initializing database schema");
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(conn)
    }

    async fn with_connection<T, F>(&self, work: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
    {
        let path = self.path.clone();
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| GatewayError::Task("SQLite connection lock poisoned".into()))?;
            if guard.is_none() {
                *guard = Some(Self::open(&path)?);
            }
            match guard.as_ref() {
                Some(conn) => work(conn),
                None => Err(GatewayError::Task("SQLite connection unavailable".into())),
            }
        })
        .await?
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn insert(&mut self, record: &EnrichedRecord) -> AppResult<()> {
        let values: Vec<SqlValue> = SAMPLE_COLUMNS
            .iter()
            .map(|(_, field)| to_sql(record.get(field)))
            .collect();

        self.with_connection(move |conn| {
            conn.execute(&insert_sql(), params_from_iter(values))?;
            Ok(())
        })
        .await?;
        debug!("Sensor record persisted");
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        let conn = Arc::clone(&self.conn);
        let taken = tokio::task::spawn_blocking(move || {
            conn.lock().map(|mut guard| guard.take()).unwrap_or(None)
        })
        .await?;

        if let Some(conn) = taken {
            info!("Closing SQLite database connection");
            conn.close().map_err(|(_, e)| GatewayError::from(e))?;
        }
        Ok(())
    }
}

/// Writes the most recent enriched record to a JSON file.
#[derive(Debug, Clone)]
pub struct LatestSnapshot {
    path: PathBuf,
}

impl LatestSnapshot {
    /// Snapshot written to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the snapshot with `record`.
    pub async fn save(&self, record: &EnrichedRecord) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_string_pretty(&record.to_json())?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn sample() -> EnrichedRecord {
        [
            (TIMESTAMP_FIELD, FieldValue::from("2025-04-10T12:00:00Z")),
            ("inside_temp_f", FieldValue::Float(72.5)),
            ("grow_light_pwm", FieldValue::Int(200)),
            ("season_state", FieldValue::from("spring")),
            ("control_mode", FieldValue::Null),
            ("unmapped_field", FieldValue::Bool(true)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn insert_statement_covers_every_column() {
        let sql = insert_sql();
        assert_eq!(sql.matches('?').count(), SAMPLE_COLUMNS.len());
        assert!(sql.starts_with("INSERT INTO samples (timestamp_utc, local_time"));
    }

    #[tokio::test]
    async fn lazily_creates_database_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("greenhouse.db");
        let mut sink = SqliteSink::new(&path);
        assert!(!sink.is_open());
        assert!(!path.exists());

        sink.insert(&sample()).await.unwrap();
        sink.insert(&sample()).await.unwrap();

        assert!(path.exists());
        assert!(sink.is_open());
        assert_eq!(sink.row_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stores_values_in_their_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greenhouse.db");
        let mut sink = SqliteSink::new(&path);
        sink.insert(&sample()).await.unwrap();
        sink.close().await.unwrap();

        let conn = Connection::open(&path).unwrap();
        let (temp, pwm, season, mode): (f64, i64, String, Option<String>) = conn
            .query_row(
                "SELECT inside_temp_f, grow_light_pwm, season_state, control_mode FROM samples",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(temp, 72.5);
        assert_eq!(pwm, 200);
        assert_eq!(season, "spring");
        assert_eq!(mode, None);
    }

    #[tokio::test]
    async fn close_then_insert_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SqliteSink::new(dir.path().join("greenhouse.db"));
        sink.insert(&sample()).await.unwrap();
        sink.close().await.unwrap();
        assert!(!sink.is_open());

        sink.insert(&sample()).await.unwrap();
        assert_eq!(sink.row_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unwritable_location_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let mut sink = SqliteSink::new(blocker.join("greenhouse.db"));
        let err = sink.insert(&sample()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn snapshot_holds_latest_record() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = LatestSnapshot::new(dir.path().join("runtime").join("latest_packet.json"));

        snapshot.save(&sample()).await.unwrap();
        let mut newer = sample();
        newer.insert("inside_temp_f", 75.0);
        snapshot.save(&newer).await.unwrap();

        let body = std::fs::read(snapshot.path()).unwrap();
        let stored = Record::from_json_slice(&body).unwrap();
        assert_eq!(stored.get("inside_temp_f"), Some(&FieldValue::Float(75.0)));
    }
}
