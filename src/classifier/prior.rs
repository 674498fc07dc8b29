// Temporal prior
// Baseline population activity per run kind and the per-frame prior derived from it

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{ClassifierError, ClassifierResult};
use super::windows::is_background;
use crate::metadata::{RunInfo, RunType};
use crate::recording::{RunStore, TraceKind, TraceMatrix, TrialFilter};
use crate::stats::{self, Kernel};

/// Seconds after every onset excluded from training-run baselines
const POST_ONSET_BLANK_S: f64 = 4.0;

/// Fraction trimmed from each tail of pooled training activity
const TRIM_FRACTION: f64 = 0.02;

/// Cells whose mean exceeds median + this many deviations are outliers
const OUTLIER_SIGMAS: f64 = 2.0;

const FALLBACK_BASELINE: f64 = 0.01;
const FALLBACK_VARIANCE: f64 = 0.08;

/// Population activity statistics of one behavioral state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityBaseline {
    pub baseline: f64,
    pub variance: f64,
    /// Cells excluded as too active, one entry per cell
    pub outliers: Vec<bool>,
}

/// Estimate baseline activity for `run` from the runs of its date in the same state.
///
/// Spontaneous runs tagged "hungry" or "sated" pool the inactive frames after
/// the last stimulus of every spontaneous run in that state. Training runs pool
/// all training runs with stimulus-evoked activity blanked.
pub fn estimate_activity(
    store: &dyn RunStore,
    run: &RunInfo,
    trace_type: TraceKind,
    activity_scale: f64,
    sigma_scale: f64,
) -> ClassifierResult<ActivityBaseline> {
    if trace_type != TraceKind::Deconvolved {
        return Err(ClassifierError::UnsupportedTraceKind(trace_type));
    }

    let date = run.parent();
    let pooled = match run.run_type {
        RunType::Spontaneous if run.has_tag("sated") || run.has_tag("hungry") => {
            let state = if run.has_tag("sated") { "sated" } else { "hungry" };
            let runs = store.runs(&date, &[RunType::Spontaneous], &[state]);
            pool_spontaneous(store, &runs, trace_type)?
        }
        RunType::Training => {
            let runs = store.runs(&date, &[RunType::Training], &[]);
            pool_training(store, &runs, trace_type)?
        }
        _ => {
            return Err(ClassifierError::UnsupportedRunKind {
                run_type: run.run_type,
                tags: run.tags.clone(),
            })
        }
    };

    let (baseline, variance) = match (pooled.baseline, pooled.variance) {
        (b, v) if b.is_finite() && v.is_finite() => (b * activity_scale, v * sigma_scale),
        _ => {
            log::warn!(
                "No usable activity for {}, falling back to default temporal prior baseline",
                run.key
            );
            (FALLBACK_BASELINE, FALLBACK_VARIANCE * sigma_scale)
        }
    };

    Ok(ActivityBaseline {
        baseline,
        variance,
        outliers: pooled.outliers,
    })
}

struct Pooled {
    baseline: f64,
    variance: f64,
    outliers: Vec<bool>,
}

fn pool_spontaneous(
    store: &dyn RunStore,
    runs: &[RunInfo],
    trace_type: TraceKind,
) -> ClassifierResult<Pooled> {
    let mut quiet = Vec::with_capacity(runs.len());
    let mut outliers: Vec<bool> = Vec::new();

    for run in runs {
        let source = store.source(&run.key)?;
        let trace = source.trace(trace_type)?;

        let mut mask = source.inactivity_mask();
        let last_onset = source.last_onset_frame().min(mask.len());
        mask[..last_onset].iter_mut().for_each(|m| *m = false);
        let selected = trace.select_frames(&mask);

        // Outliers are judged on every frame after the last onset, active or not
        let means = trace.cell_means(last_onset);
        let threshold = stats::nanmedian(&means) + OUTLIER_SIGMAS * stats::nanstd(&means);
        if outliers.len() < means.len() {
            outliers.resize(means.len(), false);
        }
        for (flag, mean) in outliers.iter_mut().zip(&means) {
            *flag |= *mean > threshold;
        }

        quiet.push(selected);
    }

    let keep: Vec<bool> = outliers.iter().map(|o| !o).collect();
    let mut activity = Vec::new();
    for selected in &quiet {
        activity.extend(selected.select_cells(&keep).population_mean());
    }

    Ok(Pooled {
        baseline: stats::nanmedian(&activity),
        variance: stats::nanstd(&activity),
        outliers,
    })
}

fn pool_training(
    store: &dyn RunStore,
    runs: &[RunInfo],
    trace_type: TraceKind,
) -> ClassifierResult<Pooled> {
    let mut activity = Vec::new();
    let mut n_cells = 0;

    for run in runs {
        let source = store.source(&run.key)?;
        let trace = source.trace(trace_type)?;
        n_cells = n_cells.max(trace.n_cells());

        let blank = (POST_ONSET_BLANK_S * source.frame_rate()).round() as usize;
        let mut population = trace.population_mean();
        for onset in source.cs_onsets("", TrialFilter::All, None, (0.0, 0.0)) {
            let end = (onset + blank).min(population.len());
            for value in population.iter_mut().take(end).skip(onset) {
                *value = f64::NAN;
            }
        }
        activity.extend(population.into_iter().filter(|v| v.is_finite()));
    }

    activity.sort_by(|a, b| a.total_cmp(b));
    let trim = (TRIM_FRACTION * activity.len() as f64) as usize;
    let trimmed = &activity[trim..activity.len() - trim];

    Ok(Pooled {
        baseline: stats::median_sorted(trimmed),
        variance: stats::nanstd(trimmed),
        outliers: vec![false; n_cells],
    })
}

/// Per-frame probability that the population is above baseline,
/// smoothed with a Gaussian of `fwhm_frames`. Frames inside `stim_mask`
/// are zero; frames where every cell is NaN stay NaN.
pub fn temporal_prior(
    trace: &TraceMatrix,
    baseline: f64,
    variance: f64,
    fwhm_frames: usize,
    stim_mask: Option<&[bool]>,
) -> Vec<f64> {
    let above: Vec<f64> = trace
        .population_mean()
        .into_iter()
        .map(|activity| stats::normal_cdf(activity, baseline, variance))
        .collect();

    let mut prior = Kernel::gaussian(fwhm_frames as f64).smooth(&above);
    if let Some(mask) = stim_mask {
        for (value, &stim) in prior.iter_mut().zip(mask) {
            if stim {
                *value = 0.0;
            }
        }
    }
    prior
}

/// Class priors per frame: background classes keep their base probability,
/// every other class is scaled by the temporal prior.
pub fn assign_temporal_priors(
    probabilities: &BTreeMap<String, f64>,
    classes: &[String],
    tprior: &[f64],
) -> BTreeMap<String, Vec<f64>> {
    classes
        .iter()
        .map(|class| {
            let p = probabilities.get(class).copied().unwrap_or(0.0);
            let series = if is_background(class) {
                vec![p; tprior.len()]
            } else {
                tprior.iter().map(|t| p * t).collect()
            };
            (class.clone(), series)
        })
        .collect()
}
