// Catalog queries and edits
// Filtering, run selection and insert/overwrite/update edits on a MetadataDocument

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::models::{
    DateEntry, DateKey, MetaRecord, MetadataDocument, MouseEntry, RunEntry, RunInfo, RunType,
    WriteMode,
};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Missing parent: {0}")]
    MissingParent(String),

    #[error("Already present in metadata: {0}")]
    AlreadyPresent(String),

    #[error("Not found in metadata: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to get app data directory")]
    NoDataDir,
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Filter applied to the flattened catalog.
/// `None` fields match everything; tag filters use the effective tags of each run.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaFilter {
    pub mice: Option<Vec<String>>,
    pub dates: Option<Vec<u32>>,
    pub runs: Option<Vec<u32>>,
    pub run_types: Option<Vec<RunType>>,
    /// Every listed tag must be present
    pub tags: Option<Vec<String>>,
    /// Every listed photometry channel must be present
    pub photometry: Option<Vec<String>>,
    /// Runs carrying any of these tags are dropped
    pub exclude_tags: Vec<String>,
}

impl Default for MetaFilter {
    fn default() -> Self {
        MetaFilter {
            mice: None,
            dates: None,
            runs: None,
            run_types: None,
            tags: None,
            photometry: None,
            exclude_tags: vec!["bad".to_string()],
        }
    }
}

impl MetaFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mice<S: Into<String>>(mut self, mice: impl IntoIterator<Item = S>) -> Self {
        self.mice = Some(mice.into_iter().map(Into::into).collect());
        self
    }

    pub fn dates(mut self, dates: impl IntoIterator<Item = u32>) -> Self {
        self.dates = Some(dates.into_iter().collect());
        self
    }

    pub fn runs(mut self, runs: impl IntoIterator<Item = u32>) -> Self {
        self.runs = Some(runs.into_iter().collect());
        self
    }

    pub fn run_types(mut self, run_types: impl IntoIterator<Item = RunType>) -> Self {
        self.run_types = Some(run_types.into_iter().collect());
        self
    }

    pub fn tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn photometry<S: Into<String>>(mut self, channels: impl IntoIterator<Item = S>) -> Self {
        self.photometry = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.exclude_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, record: &MetaRecord) -> bool {
        if let Some(mice) = &self.mice {
            if !mice.contains(&record.mouse) {
                return false;
            }
        }
        if let Some(dates) = &self.dates {
            if !dates.contains(&record.date) {
                return false;
            }
        }
        if let Some(runs) = &self.runs {
            if !runs.contains(&record.run) {
                return false;
            }
        }
        if let Some(run_types) = &self.run_types {
            if !run_types.contains(&record.run_type) {
                return false;
            }
        }

        let tags = record.tags();
        if let Some(required) = &self.tags {
            if !required.iter().all(|t| tags.contains(t)) {
                return false;
            }
        }
        if let Some(channels) = &self.photometry {
            if !channels.iter().all(|c| record.photometry.contains(c)) {
                return false;
            }
        }

        !self.exclude_tags.iter().any(|t| tags.contains(t))
    }
}

/// Runs of one date grouped by type, plus the hungry/sated spontaneous split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateSummary {
    pub mouse: String,
    pub date: u32,
    pub runs_by_type: BTreeMap<RunType, Vec<u32>>,
    pub hungry: Vec<u32>,
    pub sated: Vec<u32>,
}

impl MetadataDocument {
    /// One record per run, in document order
    pub fn records(&self) -> Vec<MetaRecord> {
        let mut out = Vec::new();
        for mouse in &self.mice {
            for date in &mouse.dates {
                for run in &date.runs {
                    out.push(MetaRecord {
                        mouse: mouse.name.clone(),
                        mouse_tags: mouse.tags.clone(),
                        date: date.date,
                        date_tags: date.tags.clone(),
                        photometry: date.photometry.clone(),
                        run: run.run,
                        run_type: run.run_type,
                        run_tags: run.tags.clone(),
                    });
                }
            }
        }
        out
    }

    pub fn meta(&self, filter: &MetaFilter) -> Vec<MetaRecord> {
        self.records()
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect()
    }

    /// Sorted mouse names with at least one matching run
    pub fn mice_with_tags(&self, tags: &[&str]) -> Vec<String> {
        let filter = MetaFilter::new().tags(tags.iter().copied());
        let names: BTreeSet<String> = self.meta(&filter).into_iter().map(|r| r.mouse).collect();
        names.into_iter().collect()
    }

    /// Sorted dates of a mouse with at least one matching run
    pub fn dates_of(&self, mouse: &str, tags: &[&str]) -> Vec<u32> {
        let filter = MetaFilter::new().mice([mouse]).tags(tags.iter().copied());
        let dates: BTreeSet<u32> = self.meta(&filter).into_iter().map(|r| r.date).collect();
        dates.into_iter().collect()
    }

    /// Runs of a date, optionally restricted by run type and required tags.
    /// An empty `run_types` slice means every type.
    pub fn runs_of(&self, date: &DateKey, run_types: &[RunType], tags: &[&str]) -> Vec<RunInfo> {
        let mut filter = MetaFilter::new()
            .mice([date.mouse.as_str()])
            .dates([date.date])
            .tags(tags.iter().copied());
        if !run_types.is_empty() {
            filter = filter.run_types(run_types.iter().copied());
        }

        let mut runs: Vec<RunInfo> = self.meta(&filter).iter().map(MetaRecord::info).collect();
        runs.sort_by_key(|r| r.key.run);
        runs
    }

    pub fn date_summary(&self, mouse: &str, date: u32) -> DateSummary {
        let records = self.meta(&MetaFilter::new().mice([mouse]).dates([date]));

        let mut runs_by_type: BTreeMap<RunType, Vec<u32>> = BTreeMap::new();
        let mut hungry = Vec::new();
        let mut sated = Vec::new();
        for record in &records {
            runs_by_type
                .entry(record.run_type)
                .or_default()
                .push(record.run);

            if record.run_type == RunType::Spontaneous {
                let tags = record.tags();
                if tags.iter().any(|t| t == "hungry") {
                    hungry.push(record.run);
                }
                if tags.iter().any(|t| t == "sated") {
                    sated.push(record.run);
                }
            }
        }

        for runs in runs_by_type.values_mut() {
            runs.sort_unstable();
        }
        hungry.sort_unstable();
        sated.sort_unstable();

        DateSummary {
            mouse: mouse.to_string(),
            date,
            runs_by_type,
            hungry,
            sated,
        }
    }

    pub fn add_mouse(&mut self, name: &str, tags: &[&str], mode: WriteMode) -> MetadataResult<()> {
        let mut entry = MouseEntry {
            name: name.to_string(),
            tags: Vec::new(),
            reversal: None,
            dates: Vec::new(),
        };

        if let Some(pos) = self.mice.iter().position(|m| m.name == name) {
            match mode {
                WriteMode::Insert => {
                    return Err(MetadataError::AlreadyPresent(format!("mouse {}", name)))
                }
                WriteMode::Overwrite => {}
                WriteMode::Update => entry = self.mice[pos].clone(),
            }
            self.mice.remove(pos);
        }

        extend_unique(&mut entry.tags, tags);
        self.mice.push(entry);
        self.sort();
        Ok(())
    }

    pub fn reversal(&self, mouse: &str) -> Option<u32> {
        self.mice.iter().find(|m| m.name == mouse)?.reversal
    }

    pub fn set_reversal(&mut self, mouse: &str, date: u32) -> MetadataResult<()> {
        let entry = self
            .mice
            .iter_mut()
            .find(|m| m.name == mouse)
            .ok_or_else(|| MetadataError::MissingParent(format!("must first add mouse {}", mouse)))?;
        entry.reversal = Some(date);
        Ok(())
    }

    pub fn add_date(
        &mut self,
        mouse: &str,
        date: u32,
        tags: &[&str],
        photometry: &[&str],
        mode: WriteMode,
    ) -> MetadataResult<()> {
        let mouse_entry = self
            .mice
            .iter_mut()
            .find(|m| m.name == mouse)
            .ok_or_else(|| MetadataError::MissingParent(format!("must first add mouse {}", mouse)))?;

        let mut entry = DateEntry {
            date,
            tags: Vec::new(),
            photometry: Vec::new(),
            runs: Vec::new(),
        };

        if let Some(pos) = mouse_entry.dates.iter().position(|d| d.date == date) {
            match mode {
                WriteMode::Insert => {
                    return Err(MetadataError::AlreadyPresent(format!(
                        "date {}",
                        DateKey::new(mouse, date)
                    )))
                }
                WriteMode::Overwrite => {}
                WriteMode::Update => entry = mouse_entry.dates[pos].clone(),
            }
            mouse_entry.dates.remove(pos);
        }

        extend_unique(&mut entry.tags, tags);
        extend_unique(&mut entry.photometry, photometry);
        mouse_entry.dates.push(entry);
        self.sort();
        Ok(())
    }

    pub fn add_run(
        &mut self,
        mouse: &str,
        date: u32,
        run: u32,
        run_type: RunType,
        tags: &[&str],
        mode: WriteMode,
    ) -> MetadataResult<()> {
        let mouse_entry = self
            .mice
            .iter_mut()
            .find(|m| m.name == mouse)
            .ok_or_else(|| MetadataError::MissingParent(format!("must first add mouse {}", mouse)))?;
        let date_entry = mouse_entry
            .dates
            .iter_mut()
            .find(|d| d.date == date)
            .ok_or_else(|| {
                MetadataError::MissingParent(format!(
                    "must first add date {}",
                    DateKey::new(mouse, date)
                ))
            })?;

        let mut entry = RunEntry {
            run,
            run_type,
            tags: Vec::new(),
        };

        if let Some(pos) = date_entry.runs.iter().position(|r| r.run == run) {
            match mode {
                WriteMode::Insert => {
                    return Err(MetadataError::AlreadyPresent(format!(
                        "run {}",
                        DateKey::new(mouse, date).run(run)
                    )))
                }
                WriteMode::Overwrite => {}
                WriteMode::Update => entry.tags = date_entry.runs[pos].tags.clone(),
            }
            date_entry.runs.remove(pos);
        }

        extend_unique(&mut entry.tags, tags);
        date_entry.runs.push(entry);
        self.sort();
        Ok(())
    }

    /// Sort mice by name, dates by date and runs by run number
    pub fn sort(&mut self) {
        self.mice.sort_by(|a, b| a.name.cmp(&b.name));
        for mouse in &mut self.mice {
            mouse.dates.sort_by_key(|d| d.date);
            for date in &mut mouse.dates {
                date.runs.sort_by_key(|r| r.run);
            }
        }
    }
}

fn extend_unique(target: &mut Vec<String>, values: &[&str]) {
    for value in values {
        if !target.iter().any(|t| t == value) {
            target.push(value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> MetadataDocument {
        let mut doc = MetadataDocument::default();
        doc.add_mouse("OA32", &[], WriteMode::Insert).unwrap();
        doc.add_date("OA32", 170406, &["hungry"], &["nacc"], WriteMode::Insert)
            .unwrap();
        doc.add_run("OA32", 170406, 1, RunType::Running, &[], WriteMode::Insert)
            .unwrap();
        doc.add_run("OA32", 170406, 2, RunType::Training, &[], WriteMode::Insert)
            .unwrap();
        doc.add_run("OA32", 170406, 3, RunType::Training, &["bad"], WriteMode::Insert)
            .unwrap();
        doc.add_run("OA32", 170406, 4, RunType::Spontaneous, &[], WriteMode::Insert)
            .unwrap();
        doc.add_date("OA32", 170407, &["sated"], &[], WriteMode::Insert)
            .unwrap();
        doc.add_run("OA32", 170407, 5, RunType::Spontaneous, &[], WriteMode::Insert)
            .unwrap();
        doc.add_mouse("AS20", &["naive"], WriteMode::Insert).unwrap();
        doc
    }

    #[test]
    fn test_missing_parent() {
        let mut doc = MetadataDocument::default();
        let err = doc
            .add_date("OA32", 170406, &[], &[], WriteMode::Insert)
            .unwrap_err();
        assert!(matches!(err, MetadataError::MissingParent(_)));

        doc.add_mouse("OA32", &[], WriteMode::Insert).unwrap();
        let err = doc
            .add_run("OA32", 170406, 1, RunType::Training, &[], WriteMode::Insert)
            .unwrap_err();
        assert!(matches!(err, MetadataError::MissingParent(_)));
    }

    #[test]
    fn test_reversal_date() {
        let mut doc = sample_document();
        assert_eq!(doc.reversal("OA32"), None);

        doc.set_reversal("OA32", 170406).unwrap();
        assert_eq!(doc.reversal("OA32"), Some(170406));
        assert_eq!(doc.reversal("AS20"), None);
        assert_eq!(doc.reversal("CB173"), None);

        // Updating the mouse keeps it, overwriting clears it
        doc.add_mouse("OA32", &["reversal"], WriteMode::Update).unwrap();
        assert_eq!(doc.reversal("OA32"), Some(170406));
        doc.add_mouse("OA32", &[], WriteMode::Overwrite).unwrap();
        assert_eq!(doc.reversal("OA32"), None);

        assert!(matches!(
            doc.set_reversal("CB173", 160516),
            Err(MetadataError::MissingParent(_))
        ));
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let mut doc = sample_document();
        let err = doc.add_mouse("OA32", &[], WriteMode::Insert).unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyPresent(_)));

        let err = doc
            .add_run("OA32", 170406, 2, RunType::Training, &[], WriteMode::Insert)
            .unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyPresent(_)));
    }

    #[test]
    fn test_update_keeps_children_and_overwrite_clears_them() {
        let mut doc = sample_document();
        doc.add_mouse("OA32", &["reversal"], WriteMode::Update).unwrap();
        let mouse = doc.mice.iter().find(|m| m.name == "OA32").unwrap();
        assert_eq!(mouse.dates.len(), 2);
        assert_eq!(mouse.tags, vec!["reversal"]);

        doc.add_mouse("OA32", &[], WriteMode::Overwrite).unwrap();
        let mouse = doc.mice.iter().find(|m| m.name == "OA32").unwrap();
        assert!(mouse.dates.is_empty());
        assert!(mouse.tags.is_empty());
    }

    #[test]
    fn test_update_run_changes_type_and_appends_tags() {
        let mut doc = sample_document();
        doc.add_run("OA32", 170406, 4, RunType::Other, &["sleep"], WriteMode::Update)
            .unwrap();
        let record = doc
            .meta(&MetaFilter::new().runs([4]))
            .into_iter()
            .next()
            .unwrap();
        assert_eq!(record.run_type, RunType::Other);
        assert_eq!(record.run_tags, vec!["sleep"]);
    }

    #[test]
    fn test_meta_excludes_bad_by_default() {
        let doc = sample_document();
        let training = doc.meta(&MetaFilter::new().run_types([RunType::Training]));
        assert_eq!(training.len(), 1);
        assert_eq!(training[0].run, 2);

        let everything = doc.meta(
            &MetaFilter::new()
                .run_types([RunType::Training])
                .exclude_tags(Vec::<String>::new()),
        );
        assert_eq!(everything.len(), 2);
    }

    #[test]
    fn test_tag_and_photometry_filters() {
        let doc = sample_document();
        assert_eq!(doc.meta(&MetaFilter::new().tags(["hungry"])).len(), 3);
        assert_eq!(doc.meta(&MetaFilter::new().photometry(["nacc"])).len(), 3);
        assert_eq!(doc.meta(&MetaFilter::new().tags(["sated"])).len(), 1);
    }

    #[test]
    fn test_mice_dates_runs() {
        let doc = sample_document();
        // AS20 has no runs
        assert_eq!(doc.mice_with_tags(&[]), vec!["OA32"]);
        assert_eq!(doc.dates_of("OA32", &[]), vec![170406, 170407]);
        assert_eq!(doc.dates_of("OA32", &["sated"]), vec![170407]);

        let date = DateKey::new("OA32", 170406);
        let runs: Vec<u32> = doc
            .runs_of(&date, &[RunType::Training, RunType::Running], &["hungry"])
            .iter()
            .map(|r| r.key.run)
            .collect();
        assert_eq!(runs, vec![1, 2]);
    }

    #[test]
    fn test_date_summary() {
        let doc = sample_document();
        let summary = doc.date_summary("OA32", 170406);
        assert_eq!(summary.runs_by_type[&RunType::Training], vec![2]);
        assert_eq!(summary.runs_by_type[&RunType::Spontaneous], vec![4]);
        assert_eq!(summary.hungry, vec![4]);
        assert!(summary.sated.is_empty());
    }

    #[test]
    fn test_sorted_after_edits() {
        let doc = sample_document();
        let names: Vec<&str> = doc.mice.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["AS20", "OA32"]);
    }
}
