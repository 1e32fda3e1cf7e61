use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use bvat_message::{GeoPosition, TelemetrySample};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SinkError;

/// Column names, in file order. The analysis notebooks key on these.
pub const CSV_HEADER: [&str; 8] = [
    "Timestamp",
    "Accel_X_g",
    "Accel_Y_g",
    "Accel_Z_g",
    "GPS_Fix",
    "Speed_kmh",
    "Latitude",
    "Longitude",
];

/// Timestamp column format (local time, millisecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Session file name timestamp format.
const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Suffixes tried after the bare name is taken (`_1` .. `_999`).
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Where session files go.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Logging directory. Created on first use. Default: `logs`.
    pub output_dir: PathBuf,
    /// File name prefix. Default: `datalog`.
    pub file_prefix: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("logs"),
            file_prefix: "datalog".to_string(),
        }
    }
}

/// A writable session destination that can be made durable.
pub trait SinkTarget: Write {
    /// Push written data to stable storage.
    fn sync_all(&mut self) -> std::io::Result<()>;
}

impl SinkTarget for File {
    fn sync_all(&mut self) -> std::io::Result<()> {
        File::sync_all(self)
    }
}

impl SinkTarget for Vec<u8> {
    fn sync_all(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Creates one fresh destination per session.
pub trait SinkOpener {
    type Target: SinkTarget;

    /// Open the destination for a session that started at `started_at`.
    fn open(&mut self, started_at: NaiveDateTime) -> Result<SessionSink<Self::Target>, SinkError>;
}

/// Opens `<output_dir>/<prefix>_<YYYYmmdd_HHMMSS>.csv` files.
///
/// Never truncates or appends to an existing file: a taken name gets a
/// numeric suffix instead.
#[derive(Debug, Clone, Default)]
pub struct DirectoryOpener {
    config: SinkConfig,
}

impl DirectoryOpener {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }
}

impl SinkOpener for DirectoryOpener {
    type Target = File;

    fn open(&mut self, started_at: NaiveDateTime) -> Result<SessionSink<File>, SinkError> {
        let dir = &self.config.output_dir;
        std::fs::create_dir_all(dir).map_err(|source| SinkError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let stem = format!(
            "{}_{}",
            self.config.file_prefix,
            started_at.format(FILE_STAMP_FORMAT)
        );

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.csv")
            } else {
                format!("{stem}_{attempt}.csv")
            };
            let path = dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return SessionSink::new(file, path),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "session file name taken");
                    continue;
                }
                Err(source) => return Err(SinkError::Create { path, source }),
            }
        }

        Err(SinkError::NameExhausted {
            dir: dir.clone(),
            stem,
        })
    }
}

/// Append-only CSV writer for one session.
///
/// The header is written on creation. Every row is flushed to the OS as soon
/// as it is written. [`close`](Self::close) flushes and syncs; dropping an
/// unclosed sink still flushes.
pub struct SessionSink<W: SinkTarget> {
    writer: Option<csv::Writer<W>>,
    path: PathBuf,
    rows: u64,
}

impl<W: SinkTarget> SessionSink<W> {
    /// Wrap `target` and write the header row.
    pub fn new(target: W, path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(target);

        writer
            .write_record(CSV_HEADER)
            .map_err(|source| SinkError::Write {
                path: path.clone(),
                source,
            })?;
        writer.flush().map_err(|source| SinkError::Flush {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), "session file created");

        Ok(Self {
            writer: Some(writer),
            path,
            rows: 0,
        })
    }

    /// Append one sample and flush it.
    pub fn append(&mut self, sample: &TelemetrySample) -> Result<(), SinkError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(SinkError::Flush {
                path: self.path.clone(),
                source: std::io::Error::other("session sink already closed"),
            });
        };

        writer
            .serialize(SampleRow::from(sample))
            .map_err(|source| SinkError::Write {
                path: self.path.clone(),
                source,
            })?;
        writer.flush().map_err(|source| SinkError::Flush {
            path: self.path.clone(),
            source,
        })?;

        self.rows += 1;
        Ok(())
    }

    /// Flush, sync and release the destination. Returns it to the caller.
    pub fn close(mut self) -> Result<W, SinkError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<W, SinkError> {
        let writer = self.writer.take().ok_or_else(|| SinkError::Flush {
            path: self.path.clone(),
            source: std::io::Error::other("session sink already closed"),
        })?;

        let mut target = writer.into_inner().map_err(|err| SinkError::Flush {
            path: self.path.clone(),
            source: std::io::Error::new(err.error().kind(), err.error().to_string()),
        })?;
        target.sync_all().map_err(|source| SinkError::Flush {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), rows = self.rows, "session file closed");
        Ok(target)
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data rows written so far (header excluded).
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl<W: SinkTarget> Drop for SessionSink<W> {
    fn drop(&mut self) {
        if self.writer.is_some() {
            warn!(path = %self.path.display(), "session file was not closed; flushing on drop");
            if let Err(err) = self.finish() {
                warn!(path = %self.path.display(), error = %err, "flush on drop failed");
            }
        }
    }
}

impl<W: SinkTarget> std::fmt::Debug for SessionSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSink")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .field("open", &self.writer.is_some())
            .finish()
    }
}

/// Read a session file back into samples.
pub fn read_session_file(path: impl AsRef<Path>) -> Result<Vec<TelemetrySample>, SinkError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| SinkError::Read {
        path: path.to_path_buf(),
        source: source.into(),
    })?;
    read_session(file, path)
}

/// Read session rows from any reader. `path` is only used in errors.
pub fn read_session<R: Read>(
    reader: R,
    path: impl AsRef<Path>,
) -> Result<Vec<TelemetrySample>, SinkError> {
    let path = path.as_ref();
    let read_err = |source: csv::Error| SinkError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let header = rdr.headers().map_err(read_err)?;
    if header.iter().ne(CSV_HEADER) {
        return Err(SinkError::Header {
            path: path.to_path_buf(),
        });
    }

    rdr.deserialize::<SampleRow>()
        .map(|row| row.map(TelemetrySample::from).map_err(read_err))
        .collect()
}

/// On-disk row layout.
#[derive(Debug, Serialize, Deserialize)]
struct SampleRow {
    #[serde(rename = "Timestamp", with = "timestamp_column")]
    timestamp: NaiveDateTime,
    #[serde(rename = "Accel_X_g")]
    accel_x: f64,
    #[serde(rename = "Accel_Y_g")]
    accel_y: f64,
    #[serde(rename = "Accel_Z_g")]
    accel_z: f64,
    #[serde(rename = "GPS_Fix")]
    gps_fix: u8,
    #[serde(rename = "Speed_kmh")]
    speed_kmh: f64,
    #[serde(rename = "Latitude")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    longitude: Option<f64>,
}

impl From<&TelemetrySample> for SampleRow {
    fn from(sample: &TelemetrySample) -> Self {
        Self {
            timestamp: sample.timestamp,
            accel_x: sample.accel_x,
            accel_y: sample.accel_y,
            accel_z: sample.accel_z,
            gps_fix: sample.gps_fix,
            speed_kmh: sample.speed_kmh,
            latitude: sample.position.map(|p| p.latitude),
            longitude: sample.position.map(|p| p.longitude),
        }
    }
}

impl From<SampleRow> for TelemetrySample {
    fn from(row: SampleRow) -> Self {
        let position = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPosition {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Self {
            timestamp: row.timestamp,
            accel_x: row.accel_x,
            accel_y: row.accel_y,
            accel_z: row.accel_z,
            gps_fix: row.gps_fix,
            speed_kmh: row.speed_kmh,
            position,
        }
    }
}

mod timestamp_column {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
