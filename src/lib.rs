// Reactivate - Stimulus reactivation detection in calcium imaging
// Module declarations

pub mod classifier;
pub mod metadata;
pub mod recording;
pub mod stats;

pub use classifier::{
    classify_reactivations, train_classifier, ClassificationResults, ClassifierError,
    ClassifierParams, ClassifyOptions, ParamOverrides, TrainOptions, TrainedClassifier,
};
pub use metadata::{MetadataStore, RunInfo, RunKey, RunType};
pub use recording::{MemoryRunStore, Recording, RunStore, TraceMatrix, TraceSource};
