// Trace source contract
// What the classifier needs from a recorded run and from the collection of runs

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

use super::matrix::TraceMatrix;
use crate::metadata::{DateKey, RunInfo, RunKey, RunType};

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Run not available: {0}")]
    MissingRun(RunKey),

    #[error("No runs recorded on {0}")]
    MissingDate(DateKey),

    #[error("Trace {kind} not available for {run}")]
    MissingTrace { run: RunKey, kind: TraceKind },

    #[error("Shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: usize, found: usize },
}

pub type RecordingResult<T> = Result<T, RecordingError>;

/// Processing stage of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    /// Spike-inferred activity, non-negative
    Deconvolved,
    /// Relative fluorescence change
    Dff,
    Raw,
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceKind::Deconvolved => "deconvolved",
            TraceKind::Dff => "dff",
            TraceKind::Raw => "raw",
        };
        f.write_str(name)
    }
}

/// Which trials to keep by behavioral outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrialFilter {
    All,
    CorrectOnly,
    ErrorsOnly,
}

impl TrialFilter {
    pub fn accepts(&self, error: bool) -> bool {
        match self {
            TrialFilter::All => true,
            TrialFilter::CorrectOnly => !error,
            TrialFilter::ErrorsOnly => error,
        }
    }
}

/// Match a stimulus class name against a pattern.
/// A trailing `*` matches any suffix and the empty pattern matches every class.
pub fn class_matches(pattern: &str, class: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => class.starts_with(prefix),
        None => class == pattern,
    }
}

/// One recorded run as seen by the classifier
pub trait TraceSource {
    fn key(&self) -> &RunKey;

    fn frame_rate(&self) -> f64;

    fn n_frames(&self) -> usize;

    fn trace(&self, kind: TraceKind) -> RecordingResult<Cow<'_, TraceMatrix>>;

    /// Stimulus classes presented during the run
    fn cses(&self) -> Vec<String>;

    /// Onset frames of trials matching `pattern`.
    /// Trials with more than `lick_cutoff` licks inside `lick_window`
    /// (seconds relative to onset) are dropped.
    fn cs_onsets(
        &self,
        pattern: &str,
        filter: TrialFilter,
        lick_cutoff: Option<usize>,
        lick_window: (f64, f64),
    ) -> Vec<usize>;

    /// Running speed per frame in cm/s; empty when not recorded
    fn speed(&self) -> &[f64];

    /// Frames covered by matching trials, padded by seconds before and after.
    /// `full_trial` extends each trial to the next onset instead of the stimulus offset.
    fn trial_mask(
        &self,
        pattern: &str,
        filter: TrialFilter,
        full_trial: bool,
        pad_pre_s: f64,
        pad_post_s: f64,
    ) -> Vec<bool>;

    /// Frames where the animal is inactive
    fn inactivity_mask(&self) -> Vec<bool>;

    /// Onset of the last stimulus, 0 when there were none
    fn last_onset_frame(&self) -> usize;

    /// Start frames of `length`-frame windows that keep `pad` frames
    /// (before, after) away from every stimulus. With a running threshold,
    /// only windows where the animal runs faster than it throughout.
    fn non_stimulus_windows(
        &self,
        length: usize,
        pad: (usize, usize),
        running_threshold: Option<f64>,
    ) -> Vec<usize>;
}

/// Collection of runs with catalog lookups
pub trait RunStore {
    /// Runs of a date, filtered by type (empty slice = all) and required tags
    fn runs(&self, date: &DateKey, run_types: &[RunType], tags: &[&str]) -> Vec<RunInfo>;

    fn source(&self, run: &RunKey) -> RecordingResult<&dyn TraceSource>;

    /// Frame rate of an imaging date, taken from its first run
    fn frame_rate(&self, date: &DateKey) -> RecordingResult<f64> {
        let first = self
            .runs(date, &[], &[])
            .into_iter()
            .next()
            .ok_or_else(|| RecordingError::MissingDate(date.clone()))?;
        Ok(self.source(&first.key)?.frame_rate())
    }
}
