// In-memory recordings
// A TraceSource backed by owned traces and trial tables, and a RunStore around them

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;

use super::matrix::TraceMatrix;
use super::source::{
    class_matches, RecordingError, RecordingResult, RunStore, TraceKind, TraceSource, TrialFilter,
};
use crate::metadata::{
    DateKey, MetadataDocument, MetadataResult, RunInfo, RunKey, RunType, WriteMode,
};

/// One stimulus presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub class: String,
    /// First stimulus frame
    pub onset: usize,
    /// First frame after the stimulus
    pub offset: usize,
    /// Behavioral error on this trial
    #[serde(default)]
    pub error: bool,
}

impl Trial {
    pub fn new(class: impl Into<String>, onset: usize, offset: usize) -> Self {
        Trial {
            class: class.into(),
            onset,
            offset,
            error: false,
        }
    }

    pub fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }
}

/// A fully loaded run
#[derive(Debug, Clone)]
pub struct Recording {
    key: RunKey,
    frame_rate: f64,
    n_frames: usize,
    traces: HashMap<TraceKind, TraceMatrix>,
    trials: Vec<Trial>,
    licks: Vec<usize>,
    speed: Vec<f64>,
    inactivity: Option<Vec<bool>>,
}

impl Recording {
    /// New recording from its deconvolved trace
    pub fn new(key: RunKey, frame_rate: f64, deconvolved: TraceMatrix) -> Self {
        let n_frames = deconvolved.n_frames();
        let mut traces = HashMap::new();
        traces.insert(TraceKind::Deconvolved, deconvolved);

        Recording {
            key,
            frame_rate,
            n_frames,
            traces,
            trials: Vec::new(),
            licks: Vec::new(),
            speed: Vec::new(),
            inactivity: None,
        }
    }

    pub fn with_trace(mut self, kind: TraceKind, trace: TraceMatrix) -> Self {
        self.traces.insert(kind, trace);
        self
    }

    pub fn with_trials(mut self, mut trials: Vec<Trial>) -> Self {
        trials.sort_by_key(|t| t.onset);
        self.trials = trials;
        self
    }

    /// Lick times as frame indices
    pub fn with_licks(mut self, licks: Vec<usize>) -> Self {
        self.licks = licks;
        self
    }

    pub fn with_speed(mut self, speed: Vec<f64>) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_inactivity(mut self, mask: Vec<bool>) -> Self {
        self.inactivity = Some(mask);
        self
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    fn seconds_to_frames(&self, seconds: f64) -> isize {
        (seconds * self.frame_rate).round() as isize
    }

    fn licks_between(&self, start: isize, end: isize) -> usize {
        self.licks
            .iter()
            .filter(|&&l| (l as isize) >= start && (l as isize) < end)
            .count()
    }
}

impl TraceSource for Recording {
    fn key(&self) -> &RunKey {
        &self.key
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn n_frames(&self) -> usize {
        self.n_frames
    }

    fn trace(&self, kind: TraceKind) -> RecordingResult<Cow<'_, TraceMatrix>> {
        self.traces
            .get(&kind)
            .map(Cow::Borrowed)
            .ok_or_else(|| RecordingError::MissingTrace {
                run: self.key.clone(),
                kind,
            })
    }

    fn cses(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.trials.iter().map(|t| t.class.clone()).collect();
        classes.sort();
        classes.dedup();
        classes
    }

    fn cs_onsets(
        &self,
        pattern: &str,
        filter: TrialFilter,
        lick_cutoff: Option<usize>,
        lick_window: (f64, f64),
    ) -> Vec<usize> {
        let (w_start, w_end) = (
            self.seconds_to_frames(lick_window.0),
            self.seconds_to_frames(lick_window.1),
        );

        self.trials
            .iter()
            .filter(|t| class_matches(pattern, &t.class) && filter.accepts(t.error))
            .filter(|t| match lick_cutoff {
                Some(cutoff) => {
                    let onset = t.onset as isize;
                    self.licks_between(onset + w_start, onset + w_end) <= cutoff
                }
                None => true,
            })
            .map(|t| t.onset)
            .collect()
    }

    fn speed(&self) -> &[f64] {
        &self.speed
    }

    fn trial_mask(
        &self,
        pattern: &str,
        filter: TrialFilter,
        full_trial: bool,
        pad_pre_s: f64,
        pad_post_s: f64,
    ) -> Vec<bool> {
        let mut mask = vec![false; self.n_frames];
        let pre = self.seconds_to_frames(pad_pre_s);
        let post = self.seconds_to_frames(pad_post_s);

        for (i, trial) in self.trials.iter().enumerate() {
            if !class_matches(pattern, &trial.class) || !filter.accepts(trial.error) {
                continue;
            }

            let end = if full_trial {
                self.trials
                    .get(i + 1)
                    .map(|next| next.onset)
                    .unwrap_or(self.n_frames)
            } else {
                trial.offset
            };

            let start = (trial.onset as isize - pre).max(0) as usize;
            let stop = ((end as isize + post).max(0) as usize).min(self.n_frames);
            for frame in mask.iter_mut().take(stop).skip(start) {
                *frame = true;
            }
        }

        mask
    }

    fn inactivity_mask(&self) -> Vec<bool> {
        match &self.inactivity {
            Some(mask) => {
                let mut mask = mask.clone();
                mask.resize(self.n_frames, false);
                mask
            }
            None => vec![true; self.n_frames],
        }
    }

    fn last_onset_frame(&self) -> usize {
        self.trials.iter().map(|t| t.onset).max().unwrap_or(0)
    }

    fn non_stimulus_windows(
        &self,
        length: usize,
        pad: (usize, usize),
        running_threshold: Option<f64>,
    ) -> Vec<usize> {
        if length == 0 {
            return Vec::new();
        }

        let mut excluded = vec![false; self.n_frames];
        for trial in &self.trials {
            let start = trial.onset.saturating_sub(pad.0);
            let stop = (trial.offset + pad.1).min(self.n_frames);
            for frame in excluded.iter_mut().take(stop).skip(start) {
                *frame = true;
            }
        }

        let mut starts = Vec::new();
        let mut start = 0;
        while start + length <= self.n_frames {
            let range = start..start + length;
            let clear = !excluded[range.clone()].iter().any(|&e| e);
            let running = match running_threshold {
                Some(threshold) => {
                    self.speed.len() >= range.end
                        && self.speed[range].iter().all(|&s| s > threshold)
                }
                None => true,
            };
            if clear && running {
                starts.push(start);
            }
            start += length;
        }

        starts
    }
}

/// Runs held in memory, listed through a metadata document
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    catalog: MetadataDocument,
    recordings: HashMap<RunKey, Recording>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing catalog; recordings are attached with [`MemoryRunStore::attach`]
    pub fn with_catalog(catalog: MetadataDocument) -> Self {
        MemoryRunStore {
            catalog,
            recordings: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &MetadataDocument {
        &self.catalog
    }

    /// Register a recording in the catalog (creating its mouse and date
    /// as needed) and keep it for loading
    pub fn insert(
        &mut self,
        run_type: RunType,
        tags: &[&str],
        recording: Recording,
    ) -> MetadataResult<RunInfo> {
        let key = recording.key().clone();
        self.catalog.add_mouse(&key.mouse, &[], WriteMode::Update)?;
        self.catalog
            .add_date(&key.mouse, key.date, &[], &[], WriteMode::Update)?;
        self.catalog
            .add_run(&key.mouse, key.date, key.run, run_type, tags, WriteMode::Overwrite)?;
        self.recordings.insert(key.clone(), recording);

        Ok(RunInfo::new(key, run_type, tags))
    }

    /// Keep a recording for a run the catalog already lists
    pub fn attach(&mut self, recording: Recording) {
        self.recordings.insert(recording.key().clone(), recording);
    }
}

impl RunStore for MemoryRunStore {
    fn runs(&self, date: &DateKey, run_types: &[RunType], tags: &[&str]) -> Vec<RunInfo> {
        self.catalog.runs_of(date, run_types, tags)
    }

    fn source(&self, run: &RunKey) -> RecordingResult<&dyn TraceSource> {
        self.recordings
            .get(run)
            .map(|r| r as &dyn TraceSource)
            .ok_or_else(|| RecordingError::MissingRun(run.clone()))
    }
}
