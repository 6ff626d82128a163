use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout stored in `test_timestamp_utc`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

// ---------------------------------------------------------------------------
// TrialSpec
// ---------------------------------------------------------------------------

/// One benchmark point: where to hide the needle and what to ask.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSpec {
    pub context_length: usize,
    pub depth_percent: f64,
    pub needle: String,
    pub retrieval_question: String,
    pub further_instruct: Option<String>,
    pub model: String,
    pub results_version: u32,
}

impl TrialSpec {
    pub fn key(&self) -> TrialKey {
        TrialKey::new(
            self.model.clone(),
            self.context_length,
            self.depth_percent,
            self.results_version,
        )
    }
}

// ---------------------------------------------------------------------------
// TrialKey
// ---------------------------------------------------------------------------

/// Identity of a trial in the result store.
#[derive(Debug, Clone)]
pub struct TrialKey {
    pub model: String,
    pub context_length: usize,
    pub depth_percent: f64,
    pub version: u32,
}

impl TrialKey {
    pub fn new(model: String, context_length: usize, depth_percent: f64, version: u32) -> Self {
        Self {
            model,
            context_length,
            depth_percent,
            version,
        }
    }

    /// Deterministic file stem, e.g. `gpt-4_1_len_2000_depth_5000`.
    ///
    /// The depth is scaled by 100 and truncated so that fractional sigmoid
    /// depths still map to distinct names. Versions other than 1 get a
    /// `_v{N}` suffix so every version of a point keeps its own file.
    pub fn file_stem(&self) -> String {
        let stem = format!(
            "{}_len_{}_depth_{}",
            sanitize_model_name(&self.model),
            self.context_length,
            (self.depth_percent * 100.0) as i64
        );
        match self.version {
            1 => stem,
            v => format!("{stem}_v{v}"),
        }
    }

    fn depth_bits(&self) -> u64 {
        // 0.0 and -0.0 must hash the same.
        if self.depth_percent == 0.0 {
            0
        } else {
            self.depth_percent.to_bits()
        }
    }
}

impl PartialEq for TrialKey {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model
            && self.context_length == other.context_length
            && self.depth_percent == other.depth_percent
            && self.version == other.version
    }
}

impl Eq for TrialKey {}

impl Hash for TrialKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.model.hash(state);
        self.context_length.hash(state);
        self.depth_bits().hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for TrialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} len={} depth={}% v{}",
            self.model, self.context_length, self.depth_percent, self.version
        )
    }
}

/// Make a model identifier safe to use in file and directory names.
pub fn sanitize_model_name(model: &str) -> String {
    model.replace(&['.', '/', '\\'][..], "_")
}

// ---------------------------------------------------------------------------
// ResultRecord
// ---------------------------------------------------------------------------

fn default_version() -> u32 {
    1
}

/// Outcome of one completed trial, persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub model: String,
    pub context_length: usize,
    pub depth_percent: f64,
    #[serde(default = "default_version")]
    pub version: u32,
    pub needle: String,
    pub model_response: String,
    pub score: u8,
    pub test_duration_seconds: f64,
    pub test_timestamp_utc: String,
}

impl ResultRecord {
    pub fn new(
        spec: &TrialSpec,
        model_response: String,
        score: u8,
        test_duration_seconds: f64,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            model: spec.model.clone(),
            context_length: spec.context_length,
            depth_percent: spec.depth_percent,
            version: spec.results_version,
            needle: spec.needle.clone(),
            model_response,
            score,
            test_duration_seconds,
            test_timestamp_utc: finished_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn key(&self) -> TrialKey {
        TrialKey::new(
            self.model.clone(),
            self.context_length,
            self.depth_percent,
            self.version,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn spec(depth: f64) -> TrialSpec {
        TrialSpec {
            context_length: 1000,
            depth_percent: depth,
            needle: "The secret code is 42.".into(),
            retrieval_question: "What is the secret code?".into(),
            further_instruct: None,
            model: "gpt-4.1".into(),
            results_version: 1,
        }
    }

    #[test]
    fn test_file_stem_distinct_for_depth_extremes() {
        let a = spec(0.0).key().file_stem();
        let b = spec(100.0).key().file_stem();
        assert_eq!(a, "gpt-4_1_len_1000_depth_0");
        assert_eq!(b, "gpt-4_1_len_1000_depth_10000");
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_stem_carries_version_above_one() {
        let mut later = spec(50.0);
        later.results_version = 2;
        assert_eq!(spec(50.0).key().file_stem(), "gpt-4_1_len_1000_depth_5000");
        assert_eq!(later.key().file_stem(), "gpt-4_1_len_1000_depth_5000_v2");
    }

    #[test]
    fn test_file_stem_fractional_depth() {
        assert_eq!(spec(0.669).key().file_stem(), "gpt-4_1_len_1000_depth_66");
    }

    #[test]
    fn test_key_hash_ignores_zero_sign() {
        let mut set = HashSet::new();
        set.insert(spec(0.0).key());
        assert!(set.contains(&spec(-0.0).key()));
        assert!(!set.contains(&spec(50.0).key()));
    }

    #[test]
    fn test_record_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let record = ResultRecord::new(&spec(50.0), "42".into(), 4, 1.5, at);
        assert_eq!(record.test_timestamp_utc, "2024-03-01 12:30:05+0000");
        assert_eq!(record.key(), spec(50.0).key());
    }

    #[test]
    fn test_record_missing_version_defaults_to_one() {
        let json = r#"{
            "model": "m", "context_length": 10, "depth_percent": 0.0,
            "needle": "n", "model_response": "r", "score": 3,
            "test_duration_seconds": 0.1, "test_timestamp_utc": "x"
        }"#;
        let record: ResultRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.version, 1);
    }

    #[test]
    fn test_record_json_field_names() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let record = ResultRecord::new(&spec(25.0), "r".into(), 10, 2.0, at);
        let value = serde_json::to_value(&record).unwrap();
        for field in [
            "model",
            "context_length",
            "depth_percent",
            "version",
            "needle",
            "model_response",
            "score",
            "test_duration_seconds",
            "test_timestamp_utc",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["depth_percent"], serde_json::json!(25.0));
    }
}
