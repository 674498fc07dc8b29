// AODE classifier
// Averaged one-dependence estimator over soft binary cell activity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::error::{ClassifierError, ClassifierResult};
use super::windows::ClassBuckets;
use crate::recording::TraceMatrix;
use crate::stats;

/// Hyperparameters of [`AodeModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AodeConfig {
    /// Additive smoothing applied to every activity count
    pub pseudocount: f64,
    /// Summed activity a cell needs across all classes to act as a parent
    pub min_parent_support: f64,
}

impl Default for AodeConfig {
    fn default() -> Self {
        AodeConfig {
            pseudocount: 1.0,
            min_parent_support: 1.0,
        }
    }
}

impl AodeConfig {
    pub fn validate(&self) -> ClassifierResult<()> {
        if !(self.pseudocount > 0.0 && self.pseudocount.is_finite()) {
            return Err(ClassifierError::InvalidParameter(format!(
                "pseudocount must be positive, got {}",
                self.pseudocount
            )));
        }
        if !(self.min_parent_support >= 0.0) {
            return Err(ClassifierError::InvalidParameter(format!(
                "min-parent-support must be non-negative, got {}",
                self.min_parent_support
            )));
        }
        Ok(())
    }
}

/// Activity distribution of one class.
/// Pairwise tables are `n_cells x n_cells`, row-major by parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDistribution {
    pub n_windows: usize,
    pub n_frames: usize,
    /// P(cell active | class)
    pub p_active: Vec<f64>,
    /// P(child active | parent active, class)
    pub p_given_active: Vec<f64>,
    /// P(child active | parent inactive, class)
    pub p_given_inactive: Vec<f64>,
    /// Summed activity per cell
    pub support: Vec<f64>,
}

impl ClassDistribution {
    /// Conditional activity of `child` given a soft `parent` value
    fn conditional(&self, n_cells: usize, parent: usize, child: usize, parent_value: f64) -> f64 {
        let idx = parent * n_cells + child;
        parent_value * self.p_given_active[idx] + (1.0 - parent_value) * self.p_given_inactive[idx]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TrainedState {
    trained_at: DateTime<Utc>,
    n_cells: usize,
    classnames: Vec<String>,
    classes: BTreeMap<String, ClassDistribution>,
    /// P(cell active) over all classes pooled
    marginal: Vec<f64>,
    /// Cells eligible as parents
    parents: Vec<bool>,
}

/// Output of [`AodeModel::compare`], every series aligned to the compared frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Posterior probability per class
    pub results: BTreeMap<String, Vec<f64>>,
    /// Log-likelihood per class
    pub likelihood: BTreeMap<String, Vec<f64>>,
    /// The trace after integration
    pub data: TraceMatrix,
}

/// Bayesian classifier that averages one single-dependence estimator per parent cell.
/// Trained exactly once; comparisons require a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AodeModel {
    id: Uuid,
    config: AodeConfig,
    trained: Option<TrainedState>,
}

/// Running sums for one class
struct Counts {
    n_cells: usize,
    active: Vec<f64>,
    observed: Vec<f64>,
    parent_on: Vec<f64>,
    both_on: Vec<f64>,
    parent_off: Vec<f64>,
    child_on_parent_off: Vec<f64>,
}

impl Counts {
    fn new(n_cells: usize) -> Self {
        Counts {
            n_cells,
            active: vec![0.0; n_cells],
            observed: vec![0.0; n_cells],
            parent_on: vec![0.0; n_cells * n_cells],
            both_on: vec![0.0; n_cells * n_cells],
            parent_off: vec![0.0; n_cells * n_cells],
            child_on_parent_off: vec![0.0; n_cells * n_cells],
        }
    }

    fn add_frame(&mut self, x: &[f64]) {
        let n = self.n_cells;
        for i in 0..n {
            let xi = x[i];
            if xi.is_nan() {
                continue;
            }
            self.active[i] += xi;
            self.observed[i] += 1.0;

            for j in 0..n {
                let xj = x[j];
                if j == i || xj.is_nan() {
                    continue;
                }
                let idx = i * n + j;
                self.parent_on[idx] += xi;
                self.both_on[idx] += xi * xj;
                self.parent_off[idx] += 1.0 - xi;
                self.child_on_parent_off[idx] += (1.0 - xi) * xj;
            }
        }
    }

    fn estimate(&self, alpha: f64, n_windows: usize, n_frames: usize) -> ClassDistribution {
        let smooth = |hits: f64, total: f64| (hits + alpha) / (total + 2.0 * alpha);
        ClassDistribution {
            n_windows,
            n_frames,
            p_active: self
                .active
                .iter()
                .zip(&self.observed)
                .map(|(&s, &n)| smooth(s, n))
                .collect(),
            p_given_active: self
                .both_on
                .iter()
                .zip(&self.parent_on)
                .map(|(&s, &n)| smooth(s, n))
                .collect(),
            p_given_inactive: self
                .child_on_parent_off
                .iter()
                .zip(&self.parent_off)
                .map(|(&s, &n)| smooth(s, n))
                .collect(),
            support: self.active.clone(),
        }
    }
}

/// Probability of a soft observation under a Bernoulli with rate `p`
fn soft_bernoulli_ln(x: f64, p: f64) -> f64 {
    (x * p + (1.0 - x) * (1.0 - p)).ln()
}

impl AodeModel {
    pub fn new(config: AodeConfig) -> Self {
        AodeModel {
            id: Uuid::new_v4(),
            config,
            trained: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &AodeConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    /// Trained class names in sorted order; empty before training
    pub fn classnames(&self) -> &[String] {
        self.trained
            .as_ref()
            .map(|t| t.classnames.as_slice())
            .unwrap_or(&[])
    }

    pub fn n_cells(&self) -> Option<usize> {
        self.trained.as_ref().map(|t| t.n_cells)
    }

    /// Pooled per-cell activity probability
    pub fn marginal(&self) -> Option<&[f64]> {
        self.trained.as_ref().map(|t| t.marginal.as_slice())
    }

    pub fn distribution(&self, class: &str) -> Option<&ClassDistribution> {
        self.trained.as_ref().and_then(|t| t.classes.get(class))
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.trained.as_ref().map(|t| t.trained_at)
    }

    /// Fit every class of `buckets`. Values are clamped into [0, 1];
    /// NaN values are left out of the counts of the cells they touch.
    pub fn train(&mut self, buckets: &ClassBuckets) -> ClassifierResult<()> {
        if self.trained.is_some() {
            return Err(ClassifierError::AlreadyTrained);
        }
        self.config.validate()?;

        if buckets.is_empty() {
            return Err(ClassifierError::InsufficientData(
                "no classes to train".to_string(),
            ));
        }
        let mut n_cells = None;
        for (class, stack) in buckets {
            let cells = match stack.n_cells() {
                Some(cells) if !stack.is_empty() => cells,
                _ => return Err(ClassifierError::InsufficientData(class.clone())),
            };
            match n_cells {
                None => n_cells = Some(cells),
                Some(expected) if expected != cells => {
                    return Err(ClassifierError::CellMismatch {
                        expected,
                        found: cells,
                    })
                }
                _ => {}
            }
        }
        let n_cells = n_cells.unwrap_or(0);

        let alpha = self.config.pseudocount;
        let mut classes = BTreeMap::new();
        let mut pooled_active = vec![0.0; n_cells];
        let mut pooled_observed = vec![0.0; n_cells];
        let mut frame = vec![0.0; n_cells];

        for (class, stack) in buckets {
            let mut counts = Counts::new(n_cells);
            let mut n_frames = 0;
            for window in stack.iter() {
                for f in 0..window.n_frames() {
                    for (c, value) in frame.iter_mut().enumerate() {
                        let v = window.get(c, f);
                        *value = if v.is_finite() { v.clamp(0.0, 1.0) } else { f64::NAN };
                    }
                    counts.add_frame(&frame);
                    n_frames += 1;
                }
            }

            for c in 0..n_cells {
                pooled_active[c] += counts.active[c];
                pooled_observed[c] += counts.observed[c];
            }
            classes.insert(class.clone(), counts.estimate(alpha, stack.len(), n_frames));
        }

        let marginal = pooled_active
            .iter()
            .zip(&pooled_observed)
            .map(|(&s, &n)| (s + alpha) / (n + 2.0 * alpha))
            .collect();
        let parents = pooled_active
            .iter()
            .map(|&s| s >= self.config.min_parent_support)
            .collect();

        self.trained = Some(TrainedState {
            trained_at: Utc::now(),
            n_cells,
            classnames: classes.keys().cloned().collect(),
            classes,
            marginal,
            parents,
        });
        Ok(())
    }

    /// Class posteriors for every frame of `trace`.
    ///
    /// Each cell is first integrated with a trailing moving max over
    /// `integrate_frames`. `priors` needs one series per class covering every
    /// frame. Frames without any finite cell, or with a NaN prior, give NaN.
    pub fn compare(
        &self,
        trace: &TraceMatrix,
        integrate_frames: usize,
        priors: &BTreeMap<String, Vec<f64>>,
    ) -> ClassifierResult<Comparison> {
        let state = self.trained.as_ref().ok_or(ClassifierError::NotTrained)?;
        if trace.n_cells() != state.n_cells {
            return Err(ClassifierError::CellMismatch {
                expected: state.n_cells,
                found: trace.n_cells(),
            });
        }
        let n_frames = trace.n_frames();
        for class in &state.classnames {
            match priors.get(class) {
                Some(series) if series.len() == n_frames => {}
                Some(series) => {
                    return Err(ClassifierError::InvalidParameter(format!(
                        "prior for {} has {} frames, trace has {}",
                        class,
                        series.len(),
                        n_frames
                    )))
                }
                None => {
                    return Err(ClassifierError::InvalidParameter(format!(
                        "missing prior for {}",
                        class
                    )))
                }
            }
        }

        let mut data = trace.clone();
        for c in 0..data.n_cells() {
            let integrated = stats::rolling_max(trace.row(c), integrate_frames);
            data.row_mut(c).copy_from_slice(&integrated);
        }

        let mut likelihood: BTreeMap<String, Vec<f64>> = state
            .classnames
            .iter()
            .map(|c| (c.clone(), Vec::with_capacity(n_frames)))
            .collect();
        let mut results: BTreeMap<String, Vec<f64>> = state
            .classnames
            .iter()
            .map(|c| (c.clone(), Vec::with_capacity(n_frames)))
            .collect();

        let mut log_post = vec![0.0; state.classnames.len()];
        for f in 0..n_frames {
            let x: Vec<f64> = data
                .column(f)
                .into_iter()
                .map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { f64::NAN })
                .collect();
            let any_finite = x.iter().any(|v| !v.is_nan());

            for (k, class) in state.classnames.iter().enumerate() {
                let ll = if any_finite {
                    frame_log_likelihood(state, &state.classes[class], &x)
                } else {
                    f64::NAN
                };
                if let Some(series) = likelihood.get_mut(class) {
                    series.push(ll);
                }
                log_post[k] = ll + priors[class][f].ln();
            }

            let norm = stats::logsumexp(&log_post);
            let valid = norm.is_finite() && log_post.iter().all(|v| !v.is_nan());
            for (k, class) in state.classnames.iter().enumerate() {
                let p = if valid { (log_post[k] - norm).exp() } else { f64::NAN };
                if let Some(series) = results.get_mut(class) {
                    series.push(p);
                }
            }
        }

        Ok(Comparison {
            results,
            likelihood,
            data,
        })
    }

    /// Human-readable summary of the trained classes
    pub fn describe(&self) -> String {
        let Some(state) = &self.trained else {
            return format!("AODE model {} (untrained)", self.id);
        };

        let mut lines = vec![format!(
            "AODE model {} trained {} on {} cells, {} parent cells",
            self.id,
            state.trained_at.to_rfc3339(),
            state.n_cells,
            state.parents.iter().filter(|&&p| p).count()
        )];
        for (class, dist) in &state.classes {
            let lo = dist.p_active.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = dist.p_active.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            lines.push(format!(
                "  {}: {} windows, {} frames, P(active) {:.3}-{:.3}",
                class, dist.n_windows, dist.n_frames, lo, hi
            ));
        }
        lines.join("\n")
    }
}

/// ln P(x | class): average over eligible observed parents, naive Bayes when none qualify
fn frame_log_likelihood(state: &TrainedState, dist: &ClassDistribution, x: &[f64]) -> f64 {
    let n = state.n_cells;
    let mut terms = Vec::new();

    for i in 0..n {
        if !state.parents[i] || x[i].is_nan() {
            continue;
        }
        let mut ll = soft_bernoulli_ln(x[i], dist.p_active[i]);
        for j in 0..n {
            if j == i || x[j].is_nan() {
                continue;
            }
            ll += soft_bernoulli_ln(x[j], dist.conditional(n, i, j, x[i]));
        }
        terms.push(ll);
    }

    if terms.is_empty() {
        return (0..n)
            .filter(|&j| !x[j].is_nan())
            .map(|j| soft_bernoulli_ln(x[j], dist.p_active[j]))
            .sum();
    }
    stats::logsumexp(&terms) - (terms.len() as f64).ln()
}
