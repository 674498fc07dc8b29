// Experiment metadata module
// Catalog of mice, imaging dates and runs with their tags

pub mod catalog;
pub mod models;
pub mod store;

pub use catalog::{DateSummary, MetaFilter, MetadataError, MetadataResult};
pub use models::{
    DateEntry, DateKey, MetaRecord, MetadataDocument, MouseEntry, RunEntry, RunInfo, RunKey,
    RunType, WriteMode,
};
pub use store::{default_metadata_path, MetadataStore};
