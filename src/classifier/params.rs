// Classifier parameters
// Typed parameter set with defaults, partial overrides and ms -> frame conversion

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use super::aode::AodeConfig;
use super::error::{ClassifierError, ClassifierResult};
use super::windows::SubsampleStrategy;
use crate::recording::TraceKind;

/// Padding around onsets: one value for both sides or (before, after)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Padding {
    Symmetric(f64),
    Asymmetric(f64, f64),
}

impl Padding {
    pub fn pair(&self) -> (f64, f64) {
        match *self {
            Padding::Symmetric(v) => (v, v),
            Padding::Asymmetric(before, after) => (before, after),
        }
    }
}

/// Every classifier option, keyed on disk by its kebab-case name
/// (`analog-training-multiplier`, `remove-stim`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClassifierParams {
    /// Trace used for training and comparison
    pub trace_type: TraceKind,

    /// Base rate of each class; classes with probability 0 are not trained
    pub probability: BTreeMap<String, f64>,

    /// Extra stimulus classes folded into trained classes (e.g. blank -> other)
    pub training_equivalent: BTreeMap<String, String>,

    /// Length of each training window
    pub stimulus_training_ms: f64,

    /// Shift of each training window relative to its onset
    pub stimulus_training_offset_ms: f64,

    /// Integration window used during comparison
    pub classification_ms: f64,

    /// Time kept clear of stimuli around "other" windows
    pub excluded_time_around_onsets_ms: Padding,

    pub temporal_prior_fwhm_ms: f64,

    /// Modulate class priors by population activity
    pub temporal_dependent_priors: bool,

    /// Scale of the estimated baseline activity
    pub temporal_prior_baseline_activity: f64,

    /// Scale of the estimated activity deviation
    pub temporal_prior_baseline_sigma: f64,

    pub analog_training_multiplier: f64,

    pub analog_comparison_multiplier: f64,

    /// Speed above which the animal counts as running (cm/s)
    pub other_running_speed_threshold_cms: f64,

    /// Fraction of running frames needed to label an "other" window as running
    pub other_running_fraction: f64,

    /// Train only on correct trials
    pub train_only_on_positives: bool,

    /// Drop trials with more licks than this inside `lick-window`
    pub lick_cutoff: Option<usize>,

    /// Lick counting window in seconds relative to onset
    pub lick_window: (f64, f64),

    /// Cap on windows per stimulus class; `None` or 0 disables the cap
    pub maximum_cs_onsets: Option<usize>,

    pub subsample_strategy: SubsampleStrategy,

    pub subsample_seed: u64,

    /// Classification masks out stimulus frames, so stimulus windows of the
    /// classified run itself may be used for training
    pub remove_stim: bool,

    pub classifier: AodeConfig,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        let probability = [
            ("plus", 0.05),
            ("neutral", 0.05),
            ("minus", 0.05),
            ("other", 0.997),
            ("other-running", 0.997),
            ("disengaged1", 0.05),
            ("disengaged2", 0.05),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let training_equivalent = [("blank", "other"), ("pavlovian", "plus")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        ClassifierParams {
            trace_type: TraceKind::Deconvolved,
            probability,
            training_equivalent,
            stimulus_training_ms: 1900.0,
            stimulus_training_offset_ms: 0.0,
            classification_ms: 190.0,
            excluded_time_around_onsets_ms: Padding::Symmetric(2000.0),
            temporal_prior_fwhm_ms: 260.0,
            temporal_dependent_priors: true,
            temporal_prior_baseline_activity: 1.0,
            temporal_prior_baseline_sigma: 3.0,
            analog_training_multiplier: 0.35,
            analog_comparison_multiplier: 2.0,
            other_running_speed_threshold_cms: 4.0,
            other_running_fraction: 0.3,
            train_only_on_positives: false,
            lick_cutoff: None,
            lick_window: (-1.0, 0.0),
            maximum_cs_onsets: None,
            subsample_strategy: SubsampleStrategy::Uniform,
            subsample_seed: 42,
            remove_stim: true,
            classifier: AodeConfig::default(),
        }
    }
}

impl ClassifierParams {
    pub fn validate(&self) -> ClassifierResult<()> {
        for (class, p) in &self.probability {
            if !(0.0..=1.0).contains(p) {
                return Err(ClassifierError::InvalidParameter(format!(
                    "probability of {} must be in [0, 1], got {}",
                    class, p
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.other_running_fraction) {
            return Err(ClassifierError::InvalidParameter(format!(
                "other-running-fraction must be in [0, 1], got {}",
                self.other_running_fraction
            )));
        }
        if !(self.stimulus_training_ms > 0.0) {
            return Err(ClassifierError::InvalidParameter(
                "stimulus-training-ms must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("analog-training-multiplier", self.analog_training_multiplier),
            ("analog-comparison-multiplier", self.analog_comparison_multiplier),
        ] {
            if !value.is_finite() {
                return Err(ClassifierError::InvalidParameter(format!(
                    "{} must be finite",
                    name
                )));
            }
        }
        self.classifier.validate()
    }

    /// Convert every duration to frames at `frame_rate`.
    /// The result belongs to that rate only and must be recomputed for another.
    pub fn frames(&self, frame_rate: f64) -> ClassifierResult<FrameParams> {
        if !(frame_rate > 0.0) {
            return Err(ClassifierError::InvalidParameter(format!(
                "frame rate must be positive, got {}",
                frame_rate
            )));
        }

        let (before, after) = self.excluded_time_around_onsets_ms.pair();
        Ok(FrameParams {
            frame_rate,
            stimulus_frames: ms_to_frames(self.stimulus_training_ms, frame_rate),
            stimulus_offset_frames: (self.stimulus_training_offset_ms / 1000.0 * frame_rate)
                .round() as isize,
            classification_frames: ms_to_frames(self.classification_ms, frame_rate),
            excluded_frames: (
                ms_to_frames(before, frame_rate),
                ms_to_frames(after, frame_rate),
            ),
            temporal_prior_fwhm_frames: ms_to_frames(self.temporal_prior_fwhm_ms, frame_rate),
        })
    }

    /// Stimulus class -> trained class. Identity for every class with a
    /// probability except the disengaged states, plus the training equivalents.
    pub fn class_map(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = self
            .probability
            .keys()
            .filter(|k| !k.contains("disengaged"))
            .map(|k| (k.clone(), k.clone()))
            .collect();
        for (from, to) in &self.training_equivalent {
            map.insert(from.clone(), to.clone());
        }
        map
    }

    /// Classes that take part in comparison
    pub fn participates(&self, class: &str) -> bool {
        self.probability.get(class).map_or(false, |p| *p > 0.0)
    }
}

fn ms_to_frames(ms: f64, frame_rate: f64) -> usize {
    (ms / 1000.0 * frame_rate).round().max(0.0) as usize
}

/// Durations of [`ClassifierParams`] in frames at one frame rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameParams {
    pub frame_rate: f64,
    pub stimulus_frames: usize,
    pub stimulus_offset_frames: isize,
    pub classification_frames: usize,
    pub excluded_frames: (usize, usize),
    pub temporal_prior_fwhm_frames: usize,
}

/// Normalize an option name to its canonical hyphenated form
pub fn canonical_key(key: &str) -> String {
    key.replace('_', "-")
}

/// Partial parameter set merged onto defaults.
///
/// ```ignore
/// let params = ParamOverrides::new()
///     .set("analog_training_multiplier", 1.0)
///     .set("remove-stim", false)
///     .apply(&ClassifierParams::default())?;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamOverrides {
    values: Map<String, Value>,
}

impl ParamOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override one option; underscores in `key` become hyphens
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(canonical_key(key), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Overrides from a JSON object
    pub fn from_json_str(json: &str) -> ClassifierResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(object) = value else {
            return Err(ClassifierError::InvalidParameter(
                "overrides must be a JSON object".to_string(),
            ));
        };

        let mut overrides = ParamOverrides::new();
        for (key, value) in object {
            overrides.insert(&key, value);
        }
        Ok(overrides)
    }

    pub fn from_json_file(path: &Path) -> ClassifierResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Merge onto `base`; unknown names and ill-typed values are rejected
    pub fn apply(&self, base: &ClassifierParams) -> ClassifierResult<ClassifierParams> {
        let mut merged = serde_json::to_value(base)?;
        let Some(object) = merged.as_object_mut() else {
            return Err(ClassifierError::InvalidParameter(
                "parameters did not serialize to an object".to_string(),
            ));
        };

        for (key, value) in &self.values {
            if !object.contains_key(key) {
                return Err(ClassifierError::UnknownParameter(key.clone()));
            }
            object.insert(key.clone(), value.clone());
        }

        serde_json::from_value(merged)
            .map_err(|e| ClassifierError::InvalidParameter(e.to_string()))
    }
}

/// Where a trained model and its parameters came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Provenance {
    pub mouse: String,
    pub comparison_date: u32,
    pub comparison_run: u32,
    pub training_date: u32,
    pub training_runs: Vec<u32>,
    pub training_other_running_runs: Vec<u32>,
}

/// Parameters as used by one training call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub params: ClassifierParams,
    /// Frame counts at the training date's frame rate
    pub frames: FrameParams,
    pub provenance: Provenance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ClassifierParams::default().validate().is_ok());
    }

    #[test]
    fn test_frames_follow_frame_rate() {
        let params = ClassifierParams::default();
        let slow = params.frames(15.49).unwrap();
        assert_eq!(slow.stimulus_frames, 29);
        assert_eq!(slow.classification_frames, 3);
        assert_eq!(slow.excluded_frames, (31, 31));
        assert_eq!(slow.temporal_prior_fwhm_frames, 4);

        let fast = params.frames(30.98).unwrap();
        assert_eq!(fast.stimulus_frames, 59);
        assert_eq!(fast.excluded_frames, (62, 62));

        assert!(params.frames(0.0).is_err());
    }

    #[test]
    fn test_asymmetric_padding() {
        let params = ParamOverrides::new()
            .set("excluded_time_around_onsets_ms", serde_json::json!([1000.0, 3000.0]))
            .apply(&ClassifierParams::default())
            .unwrap();
        assert_eq!(params.frames(10.0).unwrap().excluded_frames, (10, 30));
    }

    #[test]
    fn test_overrides_translate_underscores() {
        let params = ParamOverrides::new()
            .set("analog_training_multiplier", 1.0)
            .set("remove-stim", false)
            .set("maximum_cs_onsets", 20)
            .apply(&ClassifierParams::default())
            .unwrap();

        assert_eq!(params.analog_training_multiplier, 1.0);
        assert!(!params.remove_stim);
        assert_eq!(params.maximum_cs_onsets, Some(20));
        // Untouched options keep their defaults
        assert_eq!(params.classification_ms, 190.0);
    }

    #[test]
    fn test_unknown_override_rejected() {
        let err = ParamOverrides::new()
            .set("not_an_option", 1)
            .apply(&ClassifierParams::default())
            .unwrap_err();
        assert!(matches!(err, ClassifierError::UnknownParameter(k) if k == "not-an-option"));
    }

    #[test]
    fn test_ill_typed_override_rejected() {
        let err = ParamOverrides::new()
            .set("remove_stim", "yes")
            .apply(&ClassifierParams::default())
            .unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidParameter(_)));
    }

    #[test]
    fn test_partial_classifier_override() {
        let params = ParamOverrides::new()
            .set("classifier", serde_json::json!({ "pseudocount": 0.5 }))
            .apply(&ClassifierParams::default())
            .unwrap();
        assert_eq!(params.classifier.pseudocount, 0.5);
        assert_eq!(
            params.classifier.min_parent_support,
            AodeConfig::default().min_parent_support
        );
    }

    #[test]
    fn test_overrides_from_json() {
        let overrides =
            ParamOverrides::from_json_str(r#"{"temporal_prior_fwhm_ms": 500, "lick-cutoff": 3}"#)
                .unwrap();
        let keys: Vec<&String> = overrides.keys().collect();
        assert_eq!(keys, vec!["lick-cutoff", "temporal-prior-fwhm-ms"]);

        let params = overrides.apply(&ClassifierParams::default()).unwrap();
        assert_eq!(params.temporal_prior_fwhm_ms, 500.0);
        assert_eq!(params.lick_cutoff, Some(3));

        assert!(ParamOverrides::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn test_class_map() {
        let map = ClassifierParams::default().class_map();
        assert_eq!(map["plus"], "plus");
        assert_eq!(map["pavlovian"], "plus");
        assert_eq!(map["blank"], "other");
        assert!(!map.contains_key("disengaged1"));
    }

    #[test]
    fn test_invalid_probability() {
        let params = ParamOverrides::new()
            .set("probability", serde_json::json!({ "plus": 1.5 }))
            .apply(&ClassifierParams::default())
            .unwrap();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_overrides_from_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overrides.json");
        std::fs::write(&path, r#"{"remove_stim": false, "classification-ms": 250}"#).unwrap();

        let params = ParamOverrides::from_json_file(&path)
            .unwrap()
            .apply(&ClassifierParams::default())
            .unwrap();
        assert!(!params.remove_stim);
        assert_eq!(params.classification_ms, 250.0);

        assert!(matches!(
            ParamOverrides::from_json_file(&dir.path().join("absent.json")),
            Err(ClassifierError::Io(_))
        ));
    }
}
