// Reactivation classification
// Runs a trained model over a whole run: temporal prior, trace transforms, comparison, merging

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::aode::AodeModel;
use super::error::{ClassifierError, ClassifierResult};
use super::params::{FrameParams, ResolvedParams};
use super::prior::{assign_temporal_priors, estimate_activity, temporal_prior};
use super::train::TrainedClassifier;
use crate::metadata::RunInfo;
use crate::recording::{RunStore, TraceMatrix, TraceSource, TrialFilter};

/// Extra post-stimulus time masked after pavlovian and blank trials
const REWARD_PAD_S: f64 = 0.5;

/// Optional inputs of a classification call
#[derive(Debug, Clone, Default)]
pub struct ClassifyOptions {
    /// Cells to ignore; defaults to none, so NaNs only affect their own frames
    pub nan_cells: Option<Vec<bool>>,
    /// Classes summed into the first listed class
    pub merge_classes: Option<Vec<String>>,
    /// Classify this trace instead of the run's own
    pub replace_data: Option<TraceMatrix>,
    /// Base probability per class instead of the trained ones
    pub replace_priors: Option<BTreeMap<String, f64>>,
    pub replace_temporal_prior: Option<Vec<f64>>,
    pub replace_integrate_frames: Option<usize>,
}

impl ClassifyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nan_cells(mut self, mask: Vec<bool>) -> Self {
        self.nan_cells = Some(mask);
        self
    }

    pub fn merge_classes<S: Into<String>>(mut self, classes: impl IntoIterator<Item = S>) -> Self {
        self.merge_classes = Some(classes.into_iter().map(Into::into).collect());
        self
    }

    pub fn replace_data(mut self, data: TraceMatrix) -> Self {
        self.replace_data = Some(data);
        self
    }

    pub fn replace_priors(mut self, priors: BTreeMap<String, f64>) -> Self {
        self.replace_priors = Some(priors);
        self
    }

    pub fn replace_temporal_prior(mut self, prior: Vec<f64>) -> Self {
        self.replace_temporal_prior = Some(prior);
        self
    }

    pub fn replace_integrate_frames(mut self, frames: usize) -> Self {
        self.replace_integrate_frames = Some(frames);
        self
    }
}

/// Everything one classification produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResults {
    pub parameters: ResolvedParams,
    /// Frame counts at the classified run's frame rate
    pub frames: FrameParams,
    /// Posterior probability per class and frame
    pub results: BTreeMap<String, Vec<f64>>,
    /// Log-likelihood per class and frame
    pub likelihood: BTreeMap<String, Vec<f64>>,
    pub marginal: Vec<f64>,
    /// Prior per class and frame
    pub priors: BTreeMap<String, Vec<f64>>,
    /// True for cells that took part in the comparison
    pub cell_mask: Vec<bool>,
}

impl TrainedClassifier {
    /// Classify `run` with this model, ignoring the cells that had NaNs in
    /// training unless `options` names other cells
    pub fn classify(
        &self,
        store: &dyn RunStore,
        run: &RunInfo,
        options: &ClassifyOptions,
    ) -> ClassifierResult<ClassificationResults> {
        let mut options = options.clone();
        if options.nan_cells.is_none() && self.nan_cells.iter().any(|&bad| bad) {
            options.nan_cells = Some(self.nan_cells.clone());
        }
        classify_reactivations(store, run, &self.model, &self.params, &options)
    }
}

/// Frames around stimuli that must not count as reactivations.
///
/// Every trial is padded by half the classification window rounded up to
/// whole frames; pavlovian and blank trials get an extra half second after
/// the stimulus, rounded up together with that half window. Blank trials are
/// then removed from the mask.
pub fn stimulus_mask(source: &dyn TraceSource, classification_ms: f64) -> Vec<bool> {
    let fr = source.frame_rate();
    let half_window = classification_ms * fr / 2000.0;
    let pad_s = half_window.ceil() / fr;
    let reward_post_s = (REWARD_PAD_S * fr + half_window).ceil() / fr;

    let all = source.trial_mask("", TrialFilter::All, false, pad_s, pad_s);
    let pavlovian = source.trial_mask("pavlovian*", TrialFilter::All, false, pad_s, reward_post_s);
    let blank = source.trial_mask("blank*", TrialFilter::All, false, pad_s, reward_post_s);

    all.iter()
        .zip(&pavlovian)
        .zip(&blank)
        .map(|((&a, &p), &b)| (a || p) && !b)
        .collect()
}

/// Classify every frame of `run` with a trained model
pub fn classify_reactivations(
    store: &dyn RunStore,
    run: &RunInfo,
    model: &AodeModel,
    params: &ResolvedParams,
    options: &ClassifyOptions,
) -> ClassifierResult<ClassificationResults> {
    let settings = &params.params;
    let source = store.source(&run.key)?;
    let frames = settings.frames(source.frame_rate())?;
    let integrate_frames = options
        .replace_integrate_frames
        .unwrap_or(frames.classification_frames);

    let data = match &options.replace_data {
        Some(data) => data.clone(),
        None => source.trace(settings.trace_type)?.into_owned(),
    };
    let n_frames = data.n_frames();

    let nan_cells = match &options.nan_cells {
        Some(mask) if mask.len() == data.n_cells() => mask.clone(),
        Some(mask) => {
            return Err(ClassifierError::CellMismatch {
                expected: data.n_cells(),
                found: mask.len(),
            })
        }
        None => vec![false; data.n_cells()],
    };

    let stim_mask = if settings.remove_stim && options.replace_data.is_none() {
        Some(stimulus_mask(source, settings.classification_ms))
    } else {
        None
    };

    let tprior = match &options.replace_temporal_prior {
        Some(prior) => prior.clone(),
        None if settings.temporal_dependent_priors => {
            let activity = estimate_activity(
                store,
                run,
                settings.trace_type,
                settings.temporal_prior_baseline_activity,
                settings.temporal_prior_baseline_sigma,
            )?;
            let keep: Vec<bool> = nan_cells
                .iter()
                .enumerate()
                .map(|(c, &bad)| !bad && !activity.outliers.get(c).copied().unwrap_or(false))
                .collect();
            temporal_prior(
                &data.select_cells(&keep),
                activity.baseline,
                activity.variance,
                frames.temporal_prior_fwhm_frames,
                stim_mask.as_deref(),
            )
        }
        None => match &stim_mask {
            Some(mask) => mask.iter().map(|&stim| if stim { 0.0 } else { 1.0 }).collect(),
            None => vec![1.0; n_frames],
        },
    };

    let probabilities = options
        .replace_priors
        .as_ref()
        .unwrap_or(&settings.probability);
    let priors = assign_temporal_priors(probabilities, model.classnames(), &tprior);

    let mut trace = data.scale_clip(settings.analog_comparison_multiplier, 0.0, 1.0);
    for (cell, &bad) in nan_cells.iter().enumerate() {
        if bad {
            trace.row_mut(cell).fill(f64::NAN);
        }
    }

    let comparison = model.compare(&trace, integrate_frames, &priors)?;
    log::info!(
        "Classified {} frames of {} with {} classes",
        n_frames,
        run.key,
        model.classnames().len()
    );

    let mut results = comparison.results;
    if let Some(merge) = &options.merge_classes {
        merge_results(&mut results, merge);
    }

    Ok(ClassificationResults {
        parameters: params.clone(),
        frames,
        results,
        likelihood: comparison.likelihood,
        marginal: model.marginal().map(<[f64]>::to_vec).unwrap_or_default(),
        priors,
        cell_mask: nan_cells.iter().map(|&bad| !bad).collect(),
    })
}

/// Add every listed class into the first one and drop the merged entries
fn merge_results(results: &mut BTreeMap<String, Vec<f64>>, merge: &[String]) {
    let Some((target, rest)) = merge.split_first() else {
        return;
    };
    let Some(mut merged) = results.remove(target) else {
        log::warn!("Cannot merge into {}, class not in results", target);
        return;
    };

    for class in rest {
        match results.remove(class) {
            Some(series) => {
                for (total, value) in merged.iter_mut().zip(series) {
                    *total += value;
                }
            }
            None => log::warn!("Cannot merge {}, class not in results", class),
        }
    }
    results.insert(target.clone(), merged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::params::ParamOverrides;
    use crate::classifier::train::{train_classifier, TrainOptions};
    use crate::metadata::{RunKey, RunType};
    use crate::recording::fixtures::{self, hungry_day, FixtureStore};
    use crate::recording::{Recording, Trial};
    use serde_json::json;

    fn overrides() -> ParamOverrides {
        ParamOverrides::new()
            .set(
                "probability",
                json!({ "plus": 0.05, "minus": 0.05, "other": 0.997, "other-running": 0.997 }),
            )
            .set("stimulus_training_ms", 1500)
            .set("classification_ms", 300)
            .set("excluded_time_around_onsets_ms", 1000)
            .set("analog_training_multiplier", 1.0)
            .set("analog_comparison_multiplier", 1.0)
    }

    fn trained(day: &FixtureStore) -> TrainedClassifier {
        train_classifier(
            &day.store,
            &day.spontaneous,
            &TrainOptions::new().overrides(overrides()),
        )
        .unwrap()
    }

    #[test]
    fn test_results_cover_trained_classes() {
        let day = hungry_day();
        let trained = trained(&day);
        let classified = trained
            .classify(&day.store, &day.spontaneous, &ClassifyOptions::new())
            .unwrap();

        let classes: Vec<&String> = classified.results.keys().collect();
        let expected: Vec<&String> = trained.model.classnames().iter().collect();
        assert_eq!(classes, expected);
        for series in classified.results.values() {
            assert_eq!(series.len(), 400);
        }
        assert_eq!(classified.marginal.len(), fixtures::N_CELLS);
        assert_eq!(classified.cell_mask, vec![true; fixtures::N_CELLS]);
    }

    #[test]
    fn test_reactivation_detected() {
        let day = hungry_day();
        let trained = trained(&day);
        let classified = trained
            .classify(&day.store, &day.spontaneous, &ClassifyOptions::new())
            .unwrap();

        let plus = &classified.results["plus"];
        let minus = &classified.results["minus"];
        for event in [102, 252] {
            assert!(plus[event] > 10.0 * plus[50], "frame {}", event);
            assert!(plus[event] > minus[event]);
        }
    }

    #[test]
    fn test_merge_classes_sums_into_first() {
        let day = hungry_day();
        let trained = trained(&day);
        let plain = trained
            .classify(&day.store, &day.spontaneous, &ClassifyOptions::new())
            .unwrap();
        let merged = trained
            .classify(
                &day.store,
                &day.spontaneous,
                &ClassifyOptions::new().merge_classes(["plus", "minus", "neutral"]),
            )
            .unwrap();

        assert!(!merged.results.contains_key("minus"));
        assert!(merged.results.contains_key("plus"));
        for f in [0, 102, 300] {
            let expected = plain.results["plus"][f] + plain.results["minus"][f];
            assert!((merged.results["plus"][f] - expected).abs() < 1e-12);
        }
        assert_eq!(merged.results["other"], plain.results["other"]);
    }

    #[test]
    fn test_nan_cells_are_ignored() {
        let day = hungry_day();
        let trained = trained(&day);
        let mask = vec![true, true, false, false, false];
        let classified = trained
            .classify(
                &day.store,
                &day.spontaneous,
                &ClassifyOptions::new().nan_cells(mask),
            )
            .unwrap();

        assert_eq!(classified.cell_mask, vec![false, false, true, true, true]);
        assert!(classified.results["plus"][102] < 0.05);

        let wrong = ClassifyOptions::new().nan_cells(vec![false; 3]);
        assert!(trained.classify(&day.store, &day.spontaneous, &wrong).is_err());
    }

    #[test]
    fn test_dropout_frame_stays_local() {
        let mut day = hungry_day();
        let mut trace = fixtures::background(fixtures::N_CELLS, 400, 0.02);
        fixtures::paint(&mut trace, &fixtures::PLUS_CELLS, 100, 5, 0.9);
        for cell in 0..fixtures::N_CELLS {
            trace.set(cell, 300, f64::NAN);
        }
        let recording = Recording::new(RunKey::new(fixtures::MOUSE, fixtures::DATE, 4), 10.0, trace);
        let info = day
            .store
            .insert(RunType::Spontaneous, &["hungry"], recording)
            .unwrap();

        let trained = trained(&day);
        let classified = trained
            .classify(&day.store, &info, &ClassifyOptions::new())
            .unwrap();

        assert_eq!(classified.cell_mask, vec![true; fixtures::N_CELLS]);
        let plus = &classified.results["plus"];
        let nan_frames: Vec<usize> = (0..plus.len()).filter(|&f| plus[f].is_nan()).collect();
        assert_eq!(nan_frames, vec![300]);
        assert!(plus[102] > 10.0 * plus[50]);
    }

    #[test]
    fn test_replaced_data_and_nan_frames() {
        let day = hungry_day();
        let trained = trained(&day);
        let mut data = fixtures::background(fixtures::N_CELLS, 50, 0.02);
        fixtures::paint(&mut data, &fixtures::PLUS_CELLS, 20, 5, 0.9);
        for cell in 0..fixtures::N_CELLS {
            data.set(cell, 40, f64::NAN);
        }

        let classified = trained
            .classify(
                &day.store,
                &day.spontaneous,
                &ClassifyOptions::new()
                    .replace_data(data)
                    .nan_cells(vec![false; fixtures::N_CELLS])
                    .replace_integrate_frames(1),
            )
            .unwrap();

        let plus = &classified.results["plus"];
        assert_eq!(plus.len(), 50);
        assert!(plus[22] > 10.0 * plus[10]);
        for series in classified.results.values() {
            assert!(series[40].is_nan());
        }
    }

    #[test]
    fn test_uniform_prior_without_temporal_dependence() {
        let day = hungry_day();
        let trained = train_classifier(
            &day.store,
            &day.spontaneous,
            &TrainOptions::new().overrides(overrides().set("temporal_dependent_priors", false)),
        )
        .unwrap();
        let classified = trained
            .classify(&day.store, &day.spontaneous, &ClassifyOptions::new())
            .unwrap();

        assert!(classified.priors["plus"].iter().all(|&p| p == 0.05));
        assert!(classified.priors["other"].iter().all(|&p| p == 0.997));
    }

    #[test]
    fn test_replaced_priors() {
        let day = hungry_day();
        let trained = trained(&day);
        let tprior = vec![0.5; 400];
        let base: BTreeMap<String, f64> = [
            ("plus".to_string(), 0.2),
            ("minus".to_string(), 0.1),
            ("other".to_string(), 0.6),
        ]
        .into();

        let classified = trained
            .classify(
                &day.store,
                &day.spontaneous,
                &ClassifyOptions::new()
                    .replace_temporal_prior(tprior)
                    .replace_priors(base),
            )
            .unwrap();
        assert_eq!(classified.priors["plus"][0], 0.1);
        assert_eq!(classified.priors["other"][0], 0.6);
        // Classes without a replaced probability get none
        assert_eq!(classified.priors["other-running"][0], 0.0);

        let short = ClassifyOptions::new().replace_temporal_prior(vec![0.5; 10]);
        assert!(matches!(
            trained.classify(&day.store, &day.spontaneous, &short),
            Err(ClassifierError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_stimulus_mask_padding() {
        let recording = Recording::new(
            RunKey::new("TM4", 190301, 1),
            10.0,
            TraceMatrix::zeros(2, 120),
        )
        .with_trials(vec![
            Trial::new("plus", 20, 35),
            Trial::new("pavlovian", 50, 55),
            Trial::new("blank", 80, 85),
        ]);

        // 300 ms classification window pads by ceil(1.5) = 2 frames
        let mask = stimulus_mask(&recording, 300.0);
        let masked: Vec<usize> = (0..120).filter(|&f| mask[f]).collect();
        let mut expected: Vec<usize> = (18..37).collect();
        expected.extend(48..62);
        assert_eq!(masked, expected);
    }

    #[test]
    fn test_reward_padding_rounds_once() {
        let recording = Recording::new(
            RunKey::new("TM4", 190301, 1),
            15.0,
            TraceMatrix::zeros(2, 150),
        )
        .with_trials(vec![Trial::new("pavlovian", 50, 55)]);

        // Half of 200 ms is 1.5 frames at 15 Hz: 2 frames before, and
        // ceil(7.5 + 1.5) = 9 frames after instead of 2 + ceil(7.5)
        let mask = stimulus_mask(&recording, 200.0);
        let masked: Vec<usize> = (0..150).filter(|&f| mask[f]).collect();
        assert_eq!(masked, (48..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_stimulus_frames_get_zero_prior() {
        let mut day = hungry_day();
        let mut trace = fixtures::background(fixtures::N_CELLS, 400, 0.02);
        fixtures::paint(&mut trace, &fixtures::PLUS_CELLS, 100, 15, 0.9);
        let recording = Recording::new(RunKey::new(fixtures::MOUSE, fixtures::DATE, 4), 10.0, trace)
            .with_trials(vec![Trial::new("plus", 100, 115)]);
        let info = day
            .store
            .insert(RunType::Spontaneous, &["hungry"], recording)
            .unwrap();

        let trained = trained(&day);
        let classified = trained
            .classify(&day.store, &info, &ClassifyOptions::new())
            .unwrap();
        assert_eq!(classified.priors["plus"][105], 0.0);
        assert_eq!(classified.results["plus"][105], 0.0);
        assert!(classified.priors["plus"][200] > 0.0);
    }
}
