use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sentinel written to output pixels that are not yet computed or had no-data input
pub const FILL_VALUE: f32 = -9999.0;

/// Half-open range of image lines `[start, stop)` owned by a single worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub stop: usize,
}

impl LineRange {
    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    /// Number of lines in the range
    pub fn height(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    pub fn contains(&self, line: usize) -> bool {
        line >= self.start && line < self.stop
    }

    pub fn overlaps(&self, other: &LineRange) -> bool {
        self.start < other.stop && other.start < self.stop
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

impl From<(usize, usize)> for LineRange {
    fn from((start, stop): (usize, usize)) -> Self {
        Self::new(start, stop)
    }
}

/// Dimensions of a raster as (lines, samples, bands)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterShape {
    pub lines: usize,
    pub samples: usize,
    pub bands: usize,
}

impl RasterShape {
    pub fn new(lines: usize, samples: usize, bands: usize) -> Self {
        Self { lines, samples, bands }
    }

    pub fn pixels(&self) -> usize {
        self.lines * self.samples
    }

    pub fn values(&self) -> usize {
        self.lines * self.samples * self.bands
    }
}

impl fmt::Display for RasterShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.lines, self.samples, self.bands)
    }
}

/// What a worker reports back after finishing its partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionReport {
    pub range: LineRange,
    /// Spectra passed to the inversion
    pub inverted: usize,
    /// No-data spectra left at the fill value
    pub skipped: usize,
}

/// Timing and throughput of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunDiagnostics {
    pub elapsed: Duration,
    pub workers: usize,
    pub partitions: usize,
    pub valid_spectra: usize,
    pub skipped_spectra: usize,
    pub spectra_per_second: f64,
    pub spectra_per_second_per_worker: f64,
}

impl RunDiagnostics {
    pub fn from_reports(reports: &[PartitionReport], workers: usize, elapsed: Duration) -> Self {
        let valid_spectra: usize = reports.iter().map(|r| r.inverted).sum();
        let skipped_spectra: usize = reports.iter().map(|r| r.skipped).sum();

        let seconds = elapsed.as_secs_f64();
        let spectra_per_second = if seconds > 0.0 {
            valid_spectra as f64 / seconds
        } else {
            0.0
        };
        let spectra_per_second_per_worker = if workers > 0 {
            spectra_per_second / workers as f64
        } else {
            0.0
        };

        Self {
            elapsed,
            workers,
            partitions: reports.len(),
            valid_spectra,
            skipped_spectra,
            spectra_per_second,
            spectra_per_second_per_worker,
        }
    }
}

/// Result of a pipeline invocation
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Output already existed with no fill values; nothing was read or written
    AlreadyComplete,
    Completed(RunDiagnostics),
}

/// Error types for water content retrieval
#[derive(Debug, thiserror::Error)]
pub enum CwcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Header error: {0}")]
    Header(String),

    #[error("Calibration failed on seed pixel: {0}")]
    Calibration(String),

    #[error("Inversion failed at line {line}, sample {sample}: {message}")]
    Inversion {
        line: usize,
        sample: usize,
        message: String,
    },

    #[error("Worker for lines {range} failed: {source}")]
    Worker {
        range: LineRange,
        #[source]
        source: Box<CwcError>,
    },

    #[error("Worker for lines {range} cancelled before line {line}")]
    Cancelled { range: LineRange, line: usize },

    #[error("Deadline exceeded in worker for lines {range} before line {line}")]
    DeadlineExceeded { range: LineRange, line: usize },

    #[error("Line {line} is outside the partition {range}")]
    OutOfRange { line: usize, range: LineRange },
}

impl CwcError {
    /// True for errors raised only because a sibling worker failed first
    pub fn is_cancellation(&self) -> bool {
        match self {
            CwcError::Cancelled { .. } => true,
            CwcError::Worker { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

/// Result type for retrieval operations
pub type CwcResult<T> = Result<T, CwcError>;
