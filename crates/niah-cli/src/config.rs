//! Run configuration loaded from TOML.
//!
//! Lookup order:
//! 1. `--config <path>`
//! 2. `$NIAH_CONFIG` environment variable
//! 3. `<platform config dir>/niah/config.toml`
//! 4. Built-in defaults (everything is optional)

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use niah_core::{context_lengths, depth_percents, DepthSpacing, Provider, DEFAULT_BUFFER};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub needle: NeedleConfig,
    pub haystack: HaystackConfig,
    pub grid: GridConfig,
    pub model: ModelConfig,
    pub run: RunConfig,
    pub eval: EvalConfig,
    pub output: OutputConfig,
}

/// What to hide and how to ask for it.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NeedleConfig {
    pub text: String,
    pub question: String,
    /// Replaces the default "don't give information outside the document" line.
    pub further_instruct: Option<String>,
}

/// Filler corpus.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HaystackConfig {
    /// Directory of `.txt` files or a JSON-lines file with `content` fields.
    pub path: String,
    /// `tokenizer.json` for the model under test. Default: one token per character.
    pub tokenizer: Option<String>,
}

/// Context-length x depth grid.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub context_lengths_min: usize,
    pub context_lengths_max: usize,
    pub context_lengths_num_intervals: usize,
    /// Explicit lengths; overrides min/max/intervals when non-empty.
    pub context_lengths: Vec<usize>,
    pub depth_percent_min: f64,
    pub depth_percent_max: f64,
    pub depth_percent_intervals: usize,
    /// Explicit depths; overrides min/max/intervals when non-empty.
    pub depth_percents: Vec<f64>,
    /// `linear` or `sigmoid`.
    pub depth_spacing: String,
    /// Tokens reserved for the question and the answer.
    pub buffer: usize,
    /// Run the longest contexts first.
    pub reverse_lengths: bool,
}

/// Model under test.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `openai`, `anthropic` or `qwen`.
    pub provider: String,
    pub name: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Generation endpoints for self-hosted models, one worker each.
    pub endpoints: Vec<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub penalty: f32,
    /// Prompt template file for anthropic-style prompts.
    pub prompt_template: Option<String>,
}

/// Scheduling and prompt options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// `sequential`, `concurrent` or `pool`.
    pub mode: String,
    pub num_concurrent_requests: usize,
    pub pool_multiplier: usize,
    pub seconds_to_sleep_between_completions: Option<f64>,
    pub results_version: u32,
    pub question_at_beginning: bool,
    pub print_ongoing_status: bool,
}

/// Scoring strategy.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// `f1`, `f1_zh` or `judge`.
    pub criterion: String,
    pub judge_model: String,
    pub judge_api_key: Option<String>,
    pub judge_base_url: Option<String>,
}

/// Persistence toggles and locations.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub save_results: bool,
    pub save_contexts: bool,
    /// `json` (one file per trial) or `sqlite`.
    pub backend: String,
    pub results_dir: String,
    pub contexts_dir: String,
    pub sqlite_path: String,
}

// --- Defaults ---

impl Default for NeedleConfig {
    fn default() -> Self {
        Self {
            text: "\nThe best thing to do in San Francisco is eat a sandwich and sit in Dolores Park on a sunny day.\n".into(),
            question: "What is the best thing to do in San Francisco?".into(),
            further_instruct: None,
        }
    }
}

impl Default for HaystackConfig {
    fn default() -> Self {
        Self {
            path: "PaulGrahamEssays".into(),
            tokenizer: None,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            context_lengths_min: 1000,
            context_lengths_max: 200_000,
            context_lengths_num_intervals: 35,
            context_lengths: Vec::new(),
            depth_percent_min: 0.0,
            depth_percent_max: 100.0,
            depth_percent_intervals: 35,
            depth_percents: Vec::new(),
            depth_spacing: "linear".into(),
            buffer: DEFAULT_BUFFER,
            reverse_lengths: true,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "qwen".into(),
            name: String::new(),
            api_key: None,
            base_url: None,
            endpoints: Vec::new(),
            timeout_secs: 600,
            max_tokens: niah_providers::DEFAULT_MAX_TOKENS,
            penalty: 0.0,
            prompt_template: None,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: "sequential".into(),
            num_concurrent_requests: 1,
            pool_multiplier: 1,
            seconds_to_sleep_between_completions: None,
            results_version: 1,
            question_at_beginning: false,
            print_ongoing_status: true,
        }
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            criterion: "f1".into(),
            judge_model: "gpt-4".into(),
            judge_api_key: None,
            judge_base_url: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_results: true,
            save_contexts: true,
            backend: "json".into(),
            results_dir: "results".into(),
            contexts_dir: "contexts".into(),
            sqlite_path: "results/results.db".into(),
        }
    }
}

/// How trials are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Sequential,
    Concurrent,
    Pool,
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" | "async" => Ok(Self::Concurrent),
            "pool" | "mp" => Ok(Self::Pool),
            _ => Err(format!("invalid run mode: {s}")),
        }
    }
}

/// Scoring strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    F1,
    F1Zh,
    Judge,
}

impl std::str::FromStr for Criterion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "f1" => Ok(Self::F1),
            "f1_zh" | "f1-zh" => Ok(Self::F1Zh),
            "judge" | "gpt4" => Ok(Self::Judge),
            _ => Err(format!("invalid evaluation criterion: {s}")),
        }
    }
}

impl Config {
    pub fn provider(&self) -> Result<Provider> {
        self.model.provider.parse::<Provider>().map_err(anyhow::Error::msg)
    }

    pub fn mode(&self) -> Result<RunMode> {
        self.run.mode.parse::<RunMode>().map_err(anyhow::Error::msg)
    }

    pub fn criterion(&self) -> Result<Criterion> {
        self.eval.criterion.parse::<Criterion>().map_err(anyhow::Error::msg)
    }

    pub fn depth_spacing(&self) -> Result<DepthSpacing> {
        self.grid
            .depth_spacing
            .parse::<DepthSpacing>()
            .map_err(anyhow::Error::msg)
    }

    /// Context lengths to test, explicit list first.
    pub fn context_lengths(&self) -> Result<Vec<usize>> {
        let g = &self.grid;
        if !g.context_lengths.is_empty() {
            return Ok(g.context_lengths.clone());
        }
        if g.context_lengths_num_intervals == 0 {
            bail!("grid.context_lengths_num_intervals must be > 0 when no explicit list is given");
        }
        if g.context_lengths_min > g.context_lengths_max {
            bail!(
                "grid.context_lengths_min ({}) exceeds context_lengths_max ({})",
                g.context_lengths_min,
                g.context_lengths_max
            );
        }
        Ok(context_lengths(
            g.context_lengths_min,
            g.context_lengths_max,
            g.context_lengths_num_intervals,
        ))
    }

    /// Depth percentages to test, explicit list first.
    pub fn depth_percents(&self) -> Result<Vec<f64>> {
        let g = &self.grid;
        let spacing = self.depth_spacing()?;
        if !g.depth_percents.is_empty() {
            return Ok(g.depth_percents.clone());
        }
        if g.depth_percent_intervals == 0 {
            bail!("grid.depth_percent_intervals must be > 0 when no explicit list is given");
        }
        Ok(depth_percents(
            g.depth_percent_min,
            g.depth_percent_max,
            g.depth_percent_intervals,
            spacing,
        ))
    }

    /// Checks that must pass before any trial runs.
    pub fn validate(&self) -> Result<()> {
        if self.needle.text.trim().is_empty() {
            bail!("needle.text must be provided");
        }
        if self.needle.question.trim().is_empty() {
            bail!("needle.question must be provided");
        }
        if self.haystack.path.trim().is_empty() {
            bail!("haystack.path must be provided");
        }

        let provider = self.provider()?;
        provider.validate_model_name(&self.model.name)?;
        if provider == Provider::Qwen && self.model.endpoints.is_empty() {
            bail!("qwen provider needs at least one endpoint in model.endpoints");
        }
        self.mode()?;
        self.criterion()?;

        let lengths = self.context_lengths()?;
        if let Some(&bad) = lengths.iter().find(|&&l| l <= self.grid.buffer) {
            bail!(
                "context length {bad} must exceed the buffer of {} tokens",
                self.grid.buffer
            );
        }
        let depths = self.depth_percents()?;
        if let Some(bad) = depths.iter().find(|d| !(0.0..=100.0).contains(*d)) {
            bail!("depth percent {bad} is outside 0..=100");
        }

        if self.run.num_concurrent_requests == 0 {
            bail!("run.num_concurrent_requests must be at least 1");
        }
        if self.run.pool_multiplier == 0 {
            bail!("run.pool_multiplier must be at least 1");
        }
        if !matches!(self.output.backend.as_str(), "json" | "sqlite") {
            bail!(
                "invalid output.backend: {} (expected 'json' or 'sqlite')",
                self.output.backend
            );
        }
        Ok(())
    }
}

/// Load config from disk. Returns defaults if no config file exists.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(p) = explicit {
        return read_config(p);
    }
    if let Some(p) = config_path() {
        if p.exists() {
            return read_config(&p);
        }
    }
    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("NIAH_CONFIG") {
        return Some(PathBuf::from(p));
    }
    directories::ProjectDirs::from("dev", "niah", "niah")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Show the active config path (for `niah config`).
pub fn show_config_path(explicit: Option<&Path>) -> String {
    if let Some(p) = explicit {
        return format!("{} (loaded via --config)", p.display());
    }
    match config_path() {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.model.name = "qwen-72b".into();
        config.model.endpoints = vec!["http://127.0.0.1:7083/".into()];
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.grid.buffer, 200);
        assert_eq!(config.run.results_version, 1);
        assert!(config.output.save_results);
        assert_eq!(config.context_lengths().unwrap().len(), 35);
        assert_eq!(config.depth_percents().unwrap().len(), 35);
    }

    #[test]
    fn test_default_needs_model_name() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[model]
name = "internlm2-chat"
endpoints = ["http://0.0.0.0:7083/"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.endpoints.len(), 1);
        // Other fields should be defaults
        assert_eq!(config.eval.criterion, "f1");
        assert!(config.grid.reverse_lengths);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[needle]
text = "\n王莽是一名勤奋的店员。\n"
question = "王莽在谁的手下工作？"
further_instruct = "仅基于上述文档，不要给出上述文档以外的信息。"

[haystack]
path = "novel.json"

[grid]
context_lengths_min = 1024
context_lengths_max = 360000
context_lengths_num_intervals = 10
depth_percent_intervals = 21
depth_spacing = "sigmoid"
buffer = 200

[model]
provider = "qwen"
name = "32k-v21"
endpoints = ["http://0.0.0.0:7083/", "http://0.0.0.0:7084/"]

[run]
mode = "pool"
pool_multiplier = 2
question_at_beginning = true

[eval]
criterion = "f1_zh"

[output]
save_contexts = false
backend = "sqlite"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.mode().unwrap(), RunMode::Pool);
        assert_eq!(config.criterion().unwrap(), Criterion::F1Zh);
        let lengths = config.context_lengths().unwrap();
        assert_eq!(lengths.first(), Some(&1024));
        assert_eq!(lengths.last(), Some(&360000));
        let depths = config.depth_percents().unwrap();
        assert_eq!(depths.len(), 21);
        assert_eq!(depths[0], 0.0);
        assert_eq!(depths[20], 100.0);
    }

    #[test]
    fn test_explicit_lists_win() {
        let mut config = valid();
        config.grid.context_lengths = vec![4000, 8000];
        config.grid.depth_percents = vec![10.0, 90.0];
        assert_eq!(config.context_lengths().unwrap(), vec![4000, 8000]);
        assert_eq!(config.depth_percents().unwrap(), vec![10.0, 90.0]);
    }

    #[test]
    fn test_invalid_selectors_rejected() {
        let mut config = valid();
        config.grid.depth_spacing = "cubic".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.eval.criterion = "bleu".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.run.mode = "fork".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_anthropic_name_mismatch() {
        let mut config = valid();
        config.model.provider = "anthropic".into();
        config.model.name = "gpt-4".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("claude"));
    }

    #[test]
    fn test_length_must_exceed_buffer() {
        let mut config = valid();
        config.grid.context_lengths = vec![150, 1000];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_qwen_needs_endpoint() {
        let mut config = valid();
        config.model.endpoints.clear();
        assert!(config.validate().is_err());
        config.model.provider = "openai".into();
        config.model.name = "gpt-4".into();
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_needle() {
        let mut config = valid();
        config.needle.text = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_show_explicit_config_path() {
        let shown = show_config_path(Some(Path::new("/tmp/run.toml")));
        assert_eq!(shown, "/tmp/run.toml (loaded via --config)");
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("niah.toml");
        std::fs::write(&path, "[run]\nresults_version = 3\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.run.results_version, 3);
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
