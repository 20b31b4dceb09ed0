use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureCategory {
    NavigationTimeout,
    RateLimited,
    BrowserProtocol,
    Unexpected,
}

pub struct ErrorCategorizer;

impl ErrorCategorizer {
    pub fn categorize(error: &BrowserError) -> FailureCategory {
        match error {
            BrowserError::Timeout(_) => FailureCategory::NavigationTimeout,
            BrowserError::RateLimited(_) => FailureCategory::RateLimited,
            BrowserError::Cdp(err) => {
                let text = err.to_string().to_lowercase();
                if text.contains("timeout") {
                    FailureCategory::NavigationTimeout
                } else {
                    FailureCategory::BrowserProtocol
                }
            }
            BrowserError::Launch(_) => FailureCategory::BrowserProtocol,
            BrowserError::Unexpected(message) => {
                let message = message.to_lowercase();
                if message.contains("rate limit") || message.contains("too many requests") {
                    FailureCategory::RateLimited
                } else {
                    FailureCategory::Unexpected
                }
            }
            BrowserError::Io(_)
            | BrowserError::Configuration(_)
            | BrowserError::Session(_)
            | BrowserError::Telemetry(_) => FailureCategory::Unexpected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum RemediationAction {
    RetryScheduled { delay_ms: u64 },
    Abort,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureContext {
    pub timestamp: DateTime<Utc>,
    pub handle: String,
    pub url: String,
    pub category: FailureCategory,
    pub error_message: String,
    pub attempt: u32,
    pub action: RemediationAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub handle: String,
    pub reason: String,
    pub posts: u64,
    pub success: bool,
    pub duration_ms: i64,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<TelemetryError> for BrowserError {
    fn from(error: TelemetryError) -> Self {
        BrowserError::Telemetry(error.to_string())
    }
}

/// Durable record of navigation failures (JSON lines plus SQLite) and of
/// per-account run outcomes.
#[derive(Debug)]
pub struct AutomationTelemetry {
    log: Mutex<File>,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl AutomationTelemetry {
    pub fn new(
        log_path: impl AsRef<Path>,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, TelemetryError> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let telemetry = Self {
            log: Mutex::new(file),
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        telemetry.initialize_db()?;
        Ok(telemetry)
    }

    fn initialize_db(&self) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scrape_failures (
                ts DATETIME DEFAULT CURRENT_TIMESTAMP,
                handle TEXT,
                url TEXT,
                category TEXT,
                error_message TEXT,
                attempt INTEGER,
                remediation TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_scrape_failures_ts ON scrape_failures(ts DESC);
            CREATE TABLE IF NOT EXISTS scrape_runs (
                ts TEXT NOT NULL,
                run_id TEXT NOT NULL,
                handle TEXT NOT NULL,
                reason TEXT NOT NULL,
                posts INTEGER NOT NULL,
                success INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scrape_runs_ts ON scrape_runs(ts DESC);",
        )?;
        Ok(())
    }

    fn open_db(&self) -> Result<Connection, TelemetryError> {
        Ok(Connection::open_with_flags(&self.db_path, self.flags)?)
    }

    pub fn record_failure(&self, failure: &FailureContext) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(failure)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO scrape_failures (handle, url, category, error_message, attempt, remediation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                failure.handle,
                failure.url,
                format!("{:?}", failure.category),
                failure.error_message,
                failure.attempt as i64,
                format!("{:?}", failure.action),
            ],
        )?;
        Ok(())
    }

    pub fn record_run(&self, run: &RunContext) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO scrape_runs (ts, run_id, handle, reason, posts, success, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.timestamp.to_rfc3339(),
                run.run_id,
                run.handle,
                run.reason,
                run.posts as i64,
                if run.success { 1 } else { 0 },
                run.duration_ms,
            ],
        )?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunContext>, TelemetryError> {
        let conn = self.open_db()?;
        let mut stmt = conn.prepare(
            "SELECT ts, run_id, handle, reason, posts, success, duration_ms
             FROM scrape_runs ORDER BY ts DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let ts: String = row.get(0)?;
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .map(|value| value.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            Ok(RunContext {
                timestamp,
                run_id: row.get(1)?,
                handle: row.get(2)?,
                reason: row.get(3)?,
                posts: row.get::<_, i64>(4)?.max(0) as u64,
                success: row.get::<_, i64>(5)? != 0,
                duration_ms: row.get(6)?,
            })
        })?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}

pub fn map_category(error: &BrowserError) -> FailureCategory {
    ErrorCategorizer::categorize(error)
}

pub fn telemetry_failure(
    telemetry: &AutomationTelemetry,
    handle: &str,
    url: &str,
    error: &BrowserError,
    attempt: u32,
    action: RemediationAction,
) -> BrowserResult<()> {
    let entry = FailureContext {
        timestamp: Utc::now(),
        handle: handle.to_string(),
        url: url.to_string(),
        category: map_category(error),
        error_message: error.to_string(),
        attempt,
        action,
    };
    telemetry.record_failure(&entry)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn categorize_timeouts_and_rate_limits() {
        assert_eq!(
            ErrorCategorizer::categorize(&BrowserError::Timeout("profile".into())),
            FailureCategory::NavigationTimeout
        );
        assert_eq!(
            ErrorCategorizer::categorize(&BrowserError::RateLimited("slow down".into())),
            FailureCategory::RateLimited
        );
        assert_eq!(
            ErrorCategorizer::categorize(&BrowserError::Unexpected("Too Many Requests".into())),
            FailureCategory::RateLimited
        );
    }

    #[test]
    fn telemetry_persists_failures_and_runs() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("logs/failures.log");
        let db_path = dir.path().join("metrics.sqlite");
        let telemetry = AutomationTelemetry::new(&log_path, &db_path).unwrap();

        let error = BrowserError::Timeout("profile page".into());
        telemetry_failure(
            &telemetry,
            "foo",
            "https://x.com/foo",
            &error,
            1,
            RemediationAction::RetryScheduled { delay_ms: 2_000 },
        )
        .unwrap();
        telemetry
            .record_run(&RunContext {
                timestamp: Utc::now(),
                run_id: "run-1".into(),
                handle: "foo".into(),
                reason: "limit_reached".into(),
                posts: 12,
                success: true,
                duration_ms: 1_500,
            })
            .unwrap();

        let log_contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(log_contents.contains("profile page"));

        let conn = Connection::open(&db_path).unwrap();
        let failure_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scrape_failures", [], |row| row.get(0))
            .unwrap();
        assert_eq!(failure_count, 1);

        let runs = telemetry.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].handle, "foo");
        assert_eq!(runs[0].posts, 12);
        assert!(runs[0].success);
    }
}
