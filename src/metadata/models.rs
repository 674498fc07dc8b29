// Data models for the experiment catalog
// Mice own dates, dates own runs; every level carries free-form tags

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    /// Stimulus presentations used to train the classifier
    Training,
    /// Running without stimuli
    Running,
    /// Spontaneous activity, the usual classification target
    Spontaneous,
    #[serde(other)]
    Other,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Training => "training",
            RunType::Running => "running",
            RunType::Spontaneous => "spontaneous",
            RunType::Other => "other",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One imaging day of one mouse
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateKey {
    pub mouse: String,
    /// Date as YYMMDD
    pub date: u32,
}

impl DateKey {
    pub fn new(mouse: impl Into<String>, date: u32) -> Self {
        DateKey {
            mouse: mouse.into(),
            date,
        }
    }

    pub fn run(&self, run: u32) -> RunKey {
        RunKey {
            mouse: self.mouse.clone(),
            date: self.date,
            run,
        }
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.mouse, self.date)
    }
}

/// One recording session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    pub mouse: String,
    pub date: u32,
    pub run: u32,
}

impl RunKey {
    pub fn new(mouse: impl Into<String>, date: u32, run: u32) -> Self {
        RunKey {
            mouse: mouse.into(),
            date,
            run,
        }
    }

    /// The date this run belongs to
    pub fn parent(&self) -> DateKey {
        DateKey {
            mouse: self.mouse.clone(),
            date: self.date,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.mouse, self.date, self.run)
    }
}

/// A run together with its type and effective tags
/// (union of mouse, date and run tags)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub key: RunKey,
    pub run_type: RunType,
    pub tags: Vec<String>,
}

impl RunInfo {
    pub fn new(key: RunKey, run_type: RunType, tags: &[&str]) -> Self {
        RunInfo {
            key,
            run_type,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn parent(&self) -> DateKey {
        self.key.parent()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(default)]
    pub mice: Vec<MouseEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Date the reward contingencies were reversed, if they ever were
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal: Option<u32>,
    #[serde(default)]
    pub dates: Vec<DateEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateEntry {
    pub date: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photometry: Vec<String>,
    #[serde(default)]
    pub runs: Vec<RunEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub run: u32,
    pub run_type: RunType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Flattened row of the catalog, one per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub mouse: String,
    pub mouse_tags: Vec<String>,
    pub date: u32,
    pub date_tags: Vec<String>,
    pub photometry: Vec<String>,
    pub run: u32,
    pub run_type: RunType,
    pub run_tags: Vec<String>,
}

impl MetaRecord {
    /// Union of mouse, date and run tags, sorted and deduplicated
    pub fn tags(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self
            .mouse_tags
            .iter()
            .chain(self.date_tags.iter())
            .chain(self.run_tags.iter())
            .collect();
        all.into_iter().cloned().collect()
    }

    pub fn key(&self) -> RunKey {
        RunKey::new(self.mouse.clone(), self.date, self.run)
    }

    pub fn info(&self) -> RunInfo {
        RunInfo {
            key: self.key(),
            run_type: self.run_type,
            tags: self.tags(),
        }
    }
}

/// How to treat an entry that already exists when adding to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Fail with `AlreadyPresent`
    #[default]
    Insert,
    /// Replace with a fresh, empty entry
    Overwrite,
    /// Keep children, append tags and update fields
    Update,
}
