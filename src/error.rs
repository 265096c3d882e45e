//! Error taxonomy, one enum per layer.
//!
//! Geometry errors stay inside the annealing loop (the proposal is dropped),
//! cost errors abort a single job, and everything else surfaces as a
//! [`RunError`] that stops the run after reporting the last committed frame.

use std::path::PathBuf;

use thiserror::Error;

/// A cell pose or division that would break a geometric invariant.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("invalid geometry for cell {name}: {reason}")]
    InvalidGeometry { name: String, reason: String },
}

impl GeometryError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        GeometryError::InvalidGeometry { name: name.to_string(), reason: reason.into() }
    }
}

/// Violations of the lineage ordering/commit protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineageError {
    #[error("frame order violated: can only copy forward from frame {last}, got {requested}")]
    FrameOrder { last: usize, requested: usize },
    #[error("frame {0} is already committed")]
    AlreadyCommitted(usize),
    #[error("frame {0} does not exist")]
    UnknownFrame(usize),
    #[error("cell {cell} in frame {frame} has no parent in the previous frame")]
    MissingParent { frame: usize, cell: String },
    #[error("cell name {cell} appears twice in frame {frame}")]
    DuplicateCell { frame: usize, cell: String },
}

/// Failure while scoring a synthetic image against the real one.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CostError {
    #[error("image shape mismatch: expected {expected} pixels, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("cost evaluation produced a non-finite value in frame {frame}")]
    NonFinite { frame: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Run-level failures.
///
/// Variants raised once frames have been committed carry `last_committed`,
/// the absolute frame number a resumed run should continue after.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("lineage invariant violated: {source}")]
    Lineage {
        #[source]
        source: LineageError,
        last_committed: Option<usize>,
    },
    #[error("all {jobs} jobs aborted in window starting at {window_start}: {reason}")]
    AllJobsAborted {
        window_start: isize,
        jobs: usize,
        reason: String,
        last_committed: Option<usize>,
    },
    #[error("failed to score committed frame: {source}")]
    Cost {
        #[source]
        source: CostError,
        last_committed: Option<usize>,
    },
    #[error("input frame not found: {0}")]
    MissingInputFrame(PathBuf),
    #[error("run cancelled")]
    Cancelled { last_committed: Option<usize> },
    #[error("failed to resume: {0}")]
    Resume(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// An input or output failure after some frames were already committed.
    #[error("run aborted after frame {last_committed}: {source}")]
    Aborted {
        #[source]
        source: Box<RunError>,
        last_committed: usize,
    },
}

impl RunError {
    /// Absolute number of the last committed frame, when the failure happened mid-run.
    pub fn last_committed(&self) -> Option<usize> {
        match self {
            RunError::Lineage { last_committed, .. }
            | RunError::AllJobsAborted { last_committed, .. }
            | RunError::Cost { last_committed, .. }
            | RunError::Cancelled { last_committed } => *last_committed,
            RunError::Aborted { last_committed, .. } => Some(*last_committed),
            _ => None,
        }
    }

    /// Attach the resume point to an input/output failure raised mid-run.
    pub(crate) fn after_frame(self, last_committed: Option<usize>) -> Self {
        let io = matches!(
            self,
            RunError::Io(_) | RunError::Image(_) | RunError::Csv(_) | RunError::MissingInputFrame(_)
        );
        match last_committed {
            Some(last_committed) if io => RunError::Aborted { source: Box::new(self), last_committed },
            _ => self,
        }
    }
}
