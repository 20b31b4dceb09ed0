use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::handle::sanitize_handle;
use super::post::PostRecord;

pub const COMBINED_STEM: &str = "results";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error writing {path}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("sink task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("handle {0:?} has no characters usable in a file name")]
    UnusableKey(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKey {
    Account(String),
    Combined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLocation {
    pub json: PathBuf,
    pub csv: PathBuf,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, records: &[PostRecord], key: SinkKey) -> SinkResult<StoredLocation>;
}

/// Writes `<handle>.json`/`.csv` per account and `results.json`/`.csv` for
/// the combined batch.
#[derive(Debug, Clone)]
pub struct FileResultSink {
    output_dir: PathBuf,
}

impl FileResultSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn stem(key: &SinkKey) -> SinkResult<String> {
        match key {
            SinkKey::Combined => Ok(COMBINED_STEM.to_string()),
            SinkKey::Account(handle) => {
                let stem = sanitize_handle(handle);
                if stem.is_empty() {
                    Err(SinkError::UnusableKey(handle.clone()))
                } else if stem.eq_ignore_ascii_case(COMBINED_STEM) {
                    // account stems never contain '-', so this cannot clash
                    Ok(format!("{stem}-account"))
                } else {
                    Ok(stem)
                }
            }
        }
    }

    fn write_blocking(
        output_dir: &Path,
        stem: &str,
        records: &[PostRecord],
    ) -> SinkResult<StoredLocation> {
        fs::create_dir_all(output_dir).map_err(|source| SinkError::Io {
            source,
            path: output_dir.to_path_buf(),
        })?;
        let location = StoredLocation {
            json: output_dir.join(format!("{stem}.json")),
            csv: output_dir.join(format!("{stem}.csv")),
        };

        let json = serde_json::to_string_pretty(records)?;
        fs::write(&location.json, json).map_err(|source| SinkError::Io {
            source,
            path: location.json.clone(),
        })?;

        let file = File::create(&location.csv).map_err(|source| SinkError::Io {
            source,
            path: location.csv.clone(),
        })?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(PostRecord::csv_header())?;
        for record in records {
            writer.write_record(record.csv_row())?;
        }
        writer.flush().map_err(|source| SinkError::Io {
            source,
            path: location.csv.clone(),
        })?;
        Ok(location)
    }
}

#[async_trait]
impl ResultSink for FileResultSink {
    async fn store(&self, records: &[PostRecord], key: SinkKey) -> SinkResult<StoredLocation> {
        let stem = Self::stem(&key)?;
        let output_dir = self.output_dir.clone();
        let records = records.to_vec();
        let count = records.len();
        let location = tokio::task::spawn_blocking(move || {
            Self::write_blocking(&output_dir, &stem, &records)
        })
        .await??;
        info!(
            posts = count,
            json = %location.json.display(),
            csv = %location.csv.display(),
            "results written"
        );
        Ok(location)
    }
}
