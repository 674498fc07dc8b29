// Classifier training
// Resolves runs and parameters, extracts windows and fits the AODE model

use serde::{Deserialize, Serialize};

use super::aode::AodeModel;
use super::error::{ClassifierError, ClassifierResult};
use super::params::{ClassifierParams, ParamOverrides, Provenance, ResolvedParams};
use super::windows::{extract_windows, nan_cells, WindowConfig};
use crate::metadata::{DateKey, RunInfo, RunType};
use crate::recording::RunStore;

/// Run selection and parameter overrides for one training call
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    pub training_runs: Option<Vec<RunInfo>>,
    pub running_runs: Option<Vec<RunInfo>>,
    /// Train on another date of the same mouse
    pub training_date: Option<u32>,
    pub overrides: ParamOverrides,
}

impl TrainOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn training_runs(mut self, runs: Vec<RunInfo>) -> Self {
        self.training_runs = Some(runs);
        self
    }

    pub fn running_runs(mut self, runs: Vec<RunInfo>) -> Self {
        self.running_runs = Some(runs);
        self
    }

    pub fn training_date(mut self, date: u32) -> Self {
        self.training_date = Some(date);
        self
    }

    pub fn overrides(mut self, overrides: ParamOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// A trained model with the parameters it was trained under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedClassifier {
    pub model: AodeModel,
    pub params: ResolvedParams,
    /// Cells with non-finite values in any training window
    pub nan_cells: Vec<bool>,
}

/// Train a classifier for reactivations in `run`.
///
/// Training and running runs default to the hungry training and running
/// runs of the training date, which is the run's own date unless overridden.
pub fn train_classifier(
    store: &dyn RunStore,
    run: &RunInfo,
    options: &TrainOptions,
) -> ClassifierResult<TrainedClassifier> {
    let training_date = DateKey::new(
        run.key.mouse.clone(),
        options.training_date.unwrap_or(run.key.date),
    );

    for supplied in options
        .training_runs
        .iter()
        .chain(options.running_runs.iter())
        .flatten()
    {
        if supplied.parent() != training_date {
            return Err(ClassifierError::MismatchedParent {
                run: supplied.key.clone(),
                expected: training_date,
            });
        }
    }

    let params = options.overrides.apply(&ClassifierParams::default())?;
    params.validate()?;

    let frame_rate = store.frame_rate(&training_date)?;
    let frames = params.frames(frame_rate)?;
    log::debug!("Frame parameters at {:.2} Hz: {:?}", frame_rate, frames);

    let training_runs = match &options.training_runs {
        Some(runs) => runs.clone(),
        None => store.runs(&training_date, &[RunType::Training], &["hungry"]),
    };
    let running_runs = match &options.running_runs {
        Some(runs) => runs.clone(),
        None => store.runs(&training_date, &[RunType::Running], &["hungry"]),
    };

    let class_map = params.class_map();
    let config = WindowConfig::from_params(&params, &frames);
    let mut buckets = extract_windows(
        store,
        &run.key,
        &training_runs,
        &running_runs,
        &class_map,
        &config,
    )?;

    let nan_cells = nan_cells(&buckets);
    let n_nan = nan_cells.iter().filter(|&&bad| bad).count();
    if n_nan > 0 {
        log::warn!("{} cells contain NaNs in training windows", n_nan);
    }

    for stack in buckets.values_mut() {
        stack.scale_clip(params.analog_training_multiplier, 0.0, 1.0);
    }
    buckets.retain(|class, _| {
        let keep = params.participates(class);
        if !keep {
            log::debug!("Dropping non-participating class {}", class);
        }
        keep
    });

    let mut model = AodeModel::new(params.classifier.clone());
    model.train(&buckets)?;
    log::info!("{}", model.describe());

    let provenance = Provenance {
        mouse: run.key.mouse.clone(),
        comparison_date: run.key.date,
        comparison_run: run.key.run,
        training_date: training_date.date,
        training_runs: training_runs.iter().map(|r| r.key.run).collect(),
        training_other_running_runs: running_runs.iter().map(|r| r.key.run).collect(),
    };

    Ok(TrainedClassifier {
        model,
        params: ResolvedParams {
            params,
            frames,
            provenance,
        },
        nan_cells,
    })
}
