// Recording module
// Trace matrices and the trace-source contract the classifier reads runs through

pub mod matrix;
pub mod memory;
pub mod source;

#[cfg(test)]
pub(crate) mod fixtures;

pub use matrix::TraceMatrix;
pub use memory::{MemoryRunStore, Recording, Trial};
pub use source::{
    class_matches, RecordingError, RecordingResult, RunStore, TraceKind, TraceSource, TrialFilter,
};
