//! JSONL ride log with size-based rotation and retention.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::control::arbiter::OutputMode;
use crate::error::Result;
use crate::link::intent::RemoteIntent;
use crate::vesc::decoder::RejectionCounters;
use crate::vesc::protocol::TelemetrySnapshot;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = "jsonl";

/// One line of the ride log
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    /// Wall clock time, RFC 3339
    pub timestamp: String,
    /// Intent acted on this tick
    pub intent: RemoteIntent,
    /// Latest controller telemetry, if any has been decoded
    pub telemetry: Option<TelemetrySnapshot>,
    /// Arbiter mode this tick
    pub mode: OutputMode,
    /// Whether a radio message arrived within the timeout
    pub link_fresh: bool,
    /// Serial frame counters so far
    pub rejections: RejectionCounters,
}

impl TelemetryRecord {
    /// Stamp a record with the current local time.
    pub fn now(
        intent: RemoteIntent,
        telemetry: Option<TelemetrySnapshot>,
        mode: OutputMode,
        link_fresh: bool,
        rejections: RejectionCounters,
    ) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            intent,
            telemetry,
            mode,
            link_fresh,
            rejections,
        }
    }
}

/// Rotating JSONL writer
///
/// Files are named `telemetry_<YYYYmmdd_HHMMSS>_<seq>.jsonl` so that name
/// order is creation order.
#[derive(Debug)]
pub struct TelemetryLogger {
    log_dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    sequence: u32,
}

impl TelemetryLogger {
    /// Create the log directory if needed.
    ///
    /// The first file is opened on the first record.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Io` if the directory cannot be created
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let log_dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&log_dir)?;
        info!("Telemetry log directory: {}", log_dir.display());

        Ok(Self {
            log_dir,
            max_records_per_file: config.max_records_per_file.max(1),
            max_files_to_keep: config.max_files_to_keep.max(1),
            writer: None,
            current_path: None,
            records_in_file: 0,
            sequence: 0,
        })
    }

    /// Append one record, rotating first if the current file is full.
    pub fn log(&mut self, record: &TelemetryRecord) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let line = serde_json::to_string(record)?;
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line)?;
            writer.flush()?;
            self.records_in_file += 1;
        }
        Ok(())
    }

    /// File currently written to.
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        let name = format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            Local::now().format("%Y%m%d_%H%M%S"),
            self.sequence,
            FILE_EXTENSION
        );
        self.sequence = self.sequence.wrapping_add(1);

        let path = self.log_dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened telemetry file {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.records_in_file = 0;

        self.prune()
    }

    /// Delete the oldest log files beyond the retention limit.
    fn prune(&self) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.log_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_log_file(path))
            .collect();

        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed old telemetry file {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

fn is_log_file(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FILE_PREFIX));
    named && path.extension().is_some_and(|ext| ext == FILE_EXTENSION)
}
