// Window extraction
// Slices training runs into fixed-length labeled windows per class

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{ClassifierError, ClassifierResult};
use super::params::{ClassifierParams, FrameParams};
use crate::metadata::{RunInfo, RunKey};
use crate::recording::{RunStore, TraceKind, TraceMatrix, TrialFilter};

pub const OTHER: &str = "other";
pub const OTHER_RUNNING: &str = "other-running";

/// Background classes are "other" and its "other-*" variants
pub fn is_background(class: &str) -> bool {
    class == OTHER || class.starts_with("other-")
}

/// How a class above `maximum-cs-onsets` is cut down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubsampleStrategy {
    /// Random subset without replacement
    #[default]
    Uniform,
    /// Evenly spaced through the windows in extraction order
    Evenly,
}

impl SubsampleStrategy {
    /// Sorted indices of `k` out of `n` windows
    pub fn select<R: Rng + ?Sized>(&self, n: usize, k: usize, rng: &mut R) -> Vec<usize> {
        if k >= n {
            return (0..n).collect();
        }
        let mut picked = match self {
            SubsampleStrategy::Uniform => index::sample(rng, n, k).into_vec(),
            SubsampleStrategy::Evenly => (0..k).map(|i| i * n / k).collect(),
        };
        picked.sort_unstable();
        picked
    }
}

/// Windows of one class, all `n_frames` long
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStack {
    n_frames: usize,
    n_cells: Option<usize>,
    windows: Vec<TraceMatrix>,
}

impl WindowStack {
    pub fn new(n_frames: usize) -> Self {
        WindowStack {
            n_frames,
            n_cells: None,
            windows: Vec::new(),
        }
    }

    /// Add a window; its shape must match the stack
    pub fn push(&mut self, window: TraceMatrix) -> ClassifierResult<()> {
        let cells = self.n_cells.unwrap_or(window.n_cells());
        if window.n_frames() != self.n_frames || window.n_cells() != cells {
            return Err(ClassifierError::MalformedWindow {
                expected_cells: cells,
                expected_frames: self.n_frames,
                found_cells: window.n_cells(),
                found_frames: window.n_frames(),
            });
        }
        self.n_cells = Some(cells);
        self.windows.push(window);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Cell count, unknown until the first window arrives
    pub fn n_cells(&self) -> Option<usize> {
        self.n_cells
    }

    pub fn windows(&self) -> &[TraceMatrix] {
        &self.windows
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceMatrix> {
        self.windows.iter()
    }

    /// Keep the windows at the given sorted indices
    pub fn retain_indices(&mut self, keep: &[usize]) {
        let mut keep = keep.iter().peekable();
        let mut i = 0;
        self.windows.retain(|_| {
            let hit = keep.peek() == Some(&&i);
            if hit {
                keep.next();
            }
            i += 1;
            hit
        });
    }

    pub fn scale_clip(&mut self, multiplier: f64, lo: f64, hi: f64) {
        for window in &mut self.windows {
            *window = window.scale_clip(multiplier, lo, hi);
        }
    }

    /// True for cells with a non-finite value in any window
    pub fn non_finite_cells(&self) -> Vec<bool> {
        let mut mask = vec![false; self.n_cells.unwrap_or(0)];
        for window in &self.windows {
            for (flag, bad) in mask.iter_mut().zip(window.non_finite_cells()) {
                *flag |= bad;
            }
        }
        mask
    }
}

pub type ClassBuckets = BTreeMap<String, WindowStack>;

/// Cells with a non-finite value in any window of any class
pub fn nan_cells(buckets: &ClassBuckets) -> Vec<bool> {
    let n_cells = buckets.values().filter_map(|s| s.n_cells()).max().unwrap_or(0);
    let mut mask = vec![false; n_cells];
    for stack in buckets.values() {
        for (flag, bad) in mask.iter_mut().zip(stack.non_finite_cells()) {
            *flag |= bad;
        }
    }
    mask
}

/// Extraction settings in frames
#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub trace_type: TraceKind,
    pub length: usize,
    pub offset: isize,
    /// Frames kept clear of stimuli (before, after) around "other" windows
    pub pad: (usize, usize),
    pub running_threshold: f64,
    pub running_fraction: f64,
    pub lick_cutoff: Option<usize>,
    pub lick_window: (f64, f64),
    pub correct_only: bool,
    pub max_onsets: Option<usize>,
    pub strategy: SubsampleStrategy,
    pub seed: u64,
    /// Stimulus windows of the target run may be used
    pub remove_stim: bool,
}

impl WindowConfig {
    pub fn from_params(params: &ClassifierParams, frames: &FrameParams) -> Self {
        WindowConfig {
            trace_type: params.trace_type,
            length: frames.stimulus_frames,
            offset: frames.stimulus_offset_frames,
            pad: frames.excluded_frames,
            running_threshold: params.other_running_speed_threshold_cms,
            running_fraction: params.other_running_fraction,
            lick_cutoff: params.lick_cutoff,
            lick_window: params.lick_window,
            correct_only: params.train_only_on_positives,
            max_onsets: params.maximum_cs_onsets.filter(|&cap| cap > 0),
            strategy: params.subsample_strategy,
            seed: params.subsample_seed,
            remove_stim: params.remove_stim,
        }
    }
}

/// Build the class buckets for training a classifier of `target`.
///
/// Every class named in `class_map`, plus "other" and "other-running", is
/// present in the result even when no window was found for it. Windows that
/// would run past either end of a trace are dropped.
pub fn extract_windows(
    store: &dyn RunStore,
    target: &RunKey,
    training_runs: &[RunInfo],
    running_runs: &[RunInfo],
    class_map: &BTreeMap<String, String>,
    config: &WindowConfig,
) -> ClassifierResult<ClassBuckets> {
    let mut buckets = ClassBuckets::new();
    for class in [OTHER, OTHER_RUNNING]
        .into_iter()
        .chain(class_map.values().map(String::as_str))
    {
        buckets
            .entry(class.to_string())
            .or_insert_with(|| WindowStack::new(config.length));
    }
    if config.length == 0 {
        return Ok(buckets);
    }

    // Running-only runs feed "other-running" directly
    for run in running_runs.iter().filter(|r| &r.key != target) {
        let source = store.source(&run.key)?;
        let trace = source.trace(config.trace_type)?;
        let starts = source
            .non_stimulus_windows(config.length, config.pad, Some(config.running_threshold))
            .into_iter()
            .filter_map(|start| shift(start, config.offset));
        push_windows(&mut buckets, OTHER_RUNNING, &trace, starts, config.length)?;
    }

    let filter = if config.correct_only {
        TrialFilter::CorrectOnly
    } else {
        TrialFilter::All
    };

    for run in training_runs {
        let source = store.source(&run.key)?;
        let trace = source.trace(config.trace_type)?;
        let is_target = &run.key == target;

        if config.remove_stim || !is_target {
            for cs in source.cses() {
                let Some(class) = class_map.get(&cs) else {
                    continue;
                };
                let starts: Vec<usize> = source
                    .cs_onsets(&cs, filter, config.lick_cutoff, config.lick_window)
                    .into_iter()
                    .filter_map(|onset| shift(onset, config.offset))
                    .collect();
                push_windows(&mut buckets, class, &trace, starts, config.length)?;
            }
        }

        if is_target {
            continue;
        }

        let speed = source.speed();
        if speed.is_empty() {
            log::warn!("No running speed for {}, all other windows count as still", run.key);
        }
        let starts = source
            .non_stimulus_windows(config.length, config.pad, None)
            .into_iter()
            .filter_map(|start| shift(start, config.offset));
        for start in starts {
            let class = if running_fraction(speed, start, config.length, config.running_threshold)
                > config.running_fraction
            {
                OTHER_RUNNING
            } else {
                OTHER
            };
            push_windows(&mut buckets, class, &trace, [start], config.length)?;
        }
    }

    if let Some(cap) = config.max_onsets {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        for (class, stack) in buckets.iter_mut() {
            if is_background(class) || stack.len() <= cap {
                continue;
            }
            log::debug!("Subsampling {} from {} to {} windows", class, stack.len(), cap);
            let keep = config.strategy.select(stack.len(), cap, &mut rng);
            stack.retain_indices(&keep);
        }
    }

    let counts: Vec<String> = buckets
        .iter()
        .map(|(class, stack)| format!("{}={}", class, stack.len()))
        .collect();
    log::info!("Extracted training windows: {}", counts.join(", "));

    Ok(buckets)
}

/// Window start `offset` frames from `frame`, if it is still inside the trace
fn shift(frame: usize, offset: isize) -> Option<usize> {
    let start = frame as isize + offset;
    (start >= 0).then_some(start as usize)
}

fn push_windows(
    buckets: &mut ClassBuckets,
    class: &str,
    trace: &TraceMatrix,
    starts: impl IntoIterator<Item = usize>,
    length: usize,
) -> ClassifierResult<()> {
    let stack = buckets
        .entry(class.to_string())
        .or_insert_with(|| WindowStack::new(length));
    for start in starts {
        if let Some(window) = trace.frame_slice(start, length) {
            stack.push(window)?;
        }
    }
    Ok(())
}

/// Fraction of frames in the window faster than `threshold`; 0 without speed data
fn running_fraction(speed: &[f64], start: usize, length: usize, threshold: f64) -> f64 {
    let end = (start + length).min(speed.len());
    if start >= end {
        return 0.0;
    }
    let running = speed[start..end].iter().filter(|&&s| s > threshold).count();
    running as f64 / length as f64
}
