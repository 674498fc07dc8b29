// Classifier errors

use thiserror::Error;

use crate::metadata::{DateKey, RunKey, RunType};
use crate::recording::{RecordingError, TraceKind};

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Run {run} does not belong to {expected}")]
    MismatchedParent { run: RunKey, expected: DateKey },

    #[error("Cannot estimate activity for a {run_type} run tagged {tags:?}")]
    UnsupportedRunKind { run_type: RunType, tags: Vec<String> },

    #[error("No training data for class {0}")]
    InsufficientData(String),

    #[error(
        "Malformed window: expected {expected_cells} cells x {expected_frames} frames, \
         found {found_cells} x {found_frames}"
    )]
    MalformedWindow {
        expected_cells: usize,
        expected_frames: usize,
        found_cells: usize,
        found_frames: usize,
    },

    #[error("Trace has {found} cells, model was trained on {expected}")]
    CellMismatch { expected: usize, found: usize },

    #[error("Model is already trained")]
    AlreadyTrained,

    #[error("Model has not been trained")]
    NotTrained,

    #[error("Temporal prior is only implemented for deconvolved traces, got {0}")]
    UnsupportedTraceKind(TraceKind),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ClassifierResult<T> = Result<T, ClassifierError>;
