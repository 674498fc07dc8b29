// File-backed metadata catalog
// Holds the parsed document as an explicit cache that edits invalidate

use std::fs;
use std::path::{Path, PathBuf};

use super::catalog::{DateSummary, MetaFilter, MetadataError, MetadataResult};
use super::models::{DateKey, MetaRecord, MetadataDocument, RunInfo, RunType, WriteMode};

/// Default catalog location under the platform data directory
pub fn default_metadata_path() -> MetadataResult<PathBuf> {
    let data_dir = dirs::data_dir().ok_or(MetadataError::NoDataDir)?;
    Ok(data_dir.join("reactivate").join("metadata.json"))
}

/// Catalog stored as a JSON file.
///
/// The parsed document is cached after the first read. Every edit reloads the
/// file, applies the change, writes it back and then calls
/// [`MetadataStore::invalidate`] so the next query sees the saved state.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    cache: Option<MetadataDocument>,
}

impl MetadataStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        MetadataStore {
            path: path.into(),
            cache: None,
        }
    }

    pub fn open_default() -> MetadataResult<Self> {
        Ok(Self::open(default_metadata_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop the cached document
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Cached document, read from disk on first use.
    /// A missing file reads as an empty catalog.
    pub fn document(&mut self) -> MetadataResult<&MetadataDocument> {
        if self.cache.is_none() {
            self.cache = Some(self.read()?);
        }
        self.cache.as_ref().ok_or(MetadataError::NotFound(
            self.path.display().to_string(),
        ))
    }

    /// Force a fresh read from disk
    pub fn reload(&mut self) -> MetadataResult<&MetadataDocument> {
        self.invalidate();
        self.document()
    }

    pub fn meta(&mut self, filter: &MetaFilter) -> MetadataResult<Vec<MetaRecord>> {
        Ok(self.document()?.meta(filter))
    }

    pub fn mice(&mut self, tags: &[&str]) -> MetadataResult<Vec<String>> {
        Ok(self.document()?.mice_with_tags(tags))
    }

    pub fn dates(&mut self, mouse: &str, tags: &[&str]) -> MetadataResult<Vec<u32>> {
        Ok(self.document()?.dates_of(mouse, tags))
    }

    pub fn runs(
        &mut self,
        date: &DateKey,
        run_types: &[RunType],
        tags: &[&str],
    ) -> MetadataResult<Vec<RunInfo>> {
        Ok(self.document()?.runs_of(date, run_types, tags))
    }

    pub fn date_summary(&mut self, mouse: &str, date: u32) -> MetadataResult<DateSummary> {
        Ok(self.document()?.date_summary(mouse, date))
    }

    pub fn reversal(&mut self, mouse: &str) -> MetadataResult<Option<u32>> {
        Ok(self.document()?.reversal(mouse))
    }

    pub fn add_mouse(&mut self, name: &str, tags: &[&str], mode: WriteMode) -> MetadataResult<()> {
        self.edit(|doc| doc.add_mouse(name, tags, mode))
    }

    pub fn set_reversal(&mut self, mouse: &str, date: u32) -> MetadataResult<()> {
        self.edit(|doc| doc.set_reversal(mouse, date))
    }

    pub fn add_date(
        &mut self,
        mouse: &str,
        date: u32,
        tags: &[&str],
        photometry: &[&str],
        mode: WriteMode,
    ) -> MetadataResult<()> {
        self.edit(|doc| doc.add_date(mouse, date, tags, photometry, mode))
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
        self.edit(|doc| doc.add_run(mouse, date, run, run_type, tags, mode))
    }

    /// Write a whole document, sorted
    pub fn save(&mut self, document: &MetadataDocument) -> MetadataResult<()> {
        let mut document = document.clone();
        document.sort();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&document)?;
        fs::write(&self.path, json)?;

        self.invalidate();
        Ok(())
    }

    fn edit<F>(&mut self, apply: F) -> MetadataResult<()>
    where
        F: FnOnce(&mut MetadataDocument) -> MetadataResult<()>,
    {
        let mut document = self.read()?;
        apply(&mut document)?;
        self.save(&document)?;
        log::debug!("Metadata updated at {}", self.path.display());
        Ok(())
    }

    fn read(&self) -> MetadataResult<MetadataDocument> {
        if !self.path.exists() {
            return Ok(MetadataDocument::default());
        }
        let data = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}
