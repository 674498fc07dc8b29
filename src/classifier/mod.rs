// Reactivation classifier module
// Window extraction, temporal prior, AODE model, training and classification

pub mod aode;
pub mod classify;
pub mod error;
pub mod params;
pub mod prior;
pub mod storage;
pub mod train;
pub mod windows;

pub use aode::{AodeConfig, AodeModel, ClassDistribution, Comparison};
pub use classify::{classify_reactivations, stimulus_mask, ClassificationResults, ClassifyOptions};
pub use error::{ClassifierError, ClassifierResult};
pub use params::{ClassifierParams, FrameParams, Padding, ParamOverrides, Provenance, ResolvedParams};
pub use prior::{assign_temporal_priors, estimate_activity, temporal_prior, ActivityBaseline};
pub use storage::{load_model, models_dir, save_model, store_model, StorageError, StorageResult};
pub use train::{train_classifier, TrainOptions, TrainedClassifier};
pub use windows::{
    extract_windows, is_background, nan_cells, ClassBuckets, SubsampleStrategy, WindowConfig,
    WindowStack, OTHER, OTHER_RUNNING,
};
