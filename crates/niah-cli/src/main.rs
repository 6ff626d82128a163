mod config;
mod report;
mod sweep;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use niah_core::{
    CharTokenizer, ContextAssembler, F1Scorer, HaystackSource, ModelWorker, PromptBuilder,
    Provider, ResultStore, Scorer, Tokenizer,
};
use niah_providers::{
    build_workers, resolve_api_key, JudgeScorer, OpenAiWorker, WorkerSettings, DEFAULT_OPENAI_URL,
};
use niah_store::{ContextDumper, JsonDirStore, SqliteStore};

use config::{Config, Criterion, RunMode};
use report::ScoreGrid;
use sweep::{grid, Harness, Schedule, TrialTemplate};

#[derive(Parser)]
#[command(
    name = "niah",
    version,
    about = "Needle in a haystack - long-context retrieval benchmark for LLMs"
)]
struct Cli {
    /// Path to the TOML run configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the benchmark sweep
    Run {
        /// Provider family of the model under test
        #[arg(short, long)]
        provider: Option<CliProvider>,

        /// Model name (used for result namespacing)
        #[arg(short, long)]
        model: Option<String>,

        /// Generation endpoint (repeatable, one worker each)
        #[arg(short, long)]
        endpoint: Vec<String>,

        /// Scheduling mode
        #[arg(long)]
        mode: Option<CliMode>,

        /// Maximum in-flight trials in concurrent mode
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Result version tag
        #[arg(long)]
        results_version: Option<u32>,

        /// Run the shortest contexts first
        #[arg(long)]
        shortest_first: bool,

        /// Do not persist results (every point runs)
        #[arg(long)]
        no_save_results: bool,

        /// Do not write assembled contexts
        #[arg(long)]
        no_save_contexts: bool,

        /// Suppress the per-trial summary
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show stored scores as a depth x length table
    Results {
        /// Model name (defaults to model.name from the config)
        #[arg(short, long)]
        model: Option<String>,

        /// Result version to show (defaults to run.results_version)
        #[arg(long)]
        results_version: Option<u32>,

        /// Dump the raw records as JSON instead of the table
        #[arg(long)]
        json: bool,
    },

    /// Print the context lengths and depths the config expands to
    Grid,

    /// Show the active configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliProvider {
    Openai,
    Anthropic,
    Qwen,
}

impl From<CliProvider> for Provider {
    fn from(p: CliProvider) -> Self {
        match p {
            CliProvider::Openai => Provider::OpenAi,
            CliProvider::Anthropic => Provider::Anthropic,
            CliProvider::Qwen => Provider::Qwen,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    Sequential,
    Concurrent,
    Pool,
}

impl CliMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Concurrent => "concurrent",
            Self::Pool => "pool",
        }
    }
}

/// Command-line values that take precedence over the config file.
struct RunOverrides {
    provider: Option<CliProvider>,
    model: Option<String>,
    endpoints: Vec<String>,
    mode: Option<CliMode>,
    concurrency: Option<usize>,
    results_version: Option<u32>,
    shortest_first: bool,
    no_save_results: bool,
    no_save_contexts: bool,
    quiet: bool,
}

impl RunOverrides {
    fn apply(self, cfg: &mut Config) {
        if let Some(p) = self.provider {
            cfg.model.provider = Provider::from(p).to_string();
        }
        if let Some(m) = self.model {
            cfg.model.name = m;
        }
        if !self.endpoints.is_empty() {
            cfg.model.endpoints = self.endpoints;
        }
        if let Some(m) = self.mode {
            cfg.run.mode = m.as_str().into();
        }
        if let Some(n) = self.concurrency {
            cfg.run.num_concurrent_requests = n;
        }
        if let Some(v) = self.results_version {
            cfg.run.results_version = v;
        }
        if self.shortest_first {
            cfg.grid.reverse_lengths = false;
        }
        if self.no_save_results {
            cfg.output.save_results = false;
        }
        if self.no_save_contexts {
            cfg.output.save_contexts = false;
        }
        if self.quiet {
            cfg.run.print_ongoing_status = false;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            provider,
            model,
            endpoint,
            mode,
            concurrency,
            results_version,
            shortest_first,
            no_save_results,
            no_save_contexts,
            quiet,
        } => {
            RunOverrides {
                provider,
                model,
                endpoints: endpoint,
                mode,
                concurrency,
                results_version,
                shortest_first,
                no_save_results,
                no_save_contexts,
                quiet,
            }
            .apply(&mut cfg);
            cmd_run(&cfg)
        }
        Commands::Results {
            model,
            results_version,
            json,
        } => cmd_results(
            &cfg,
            model.as_deref(),
            results_version.unwrap_or(cfg.run.results_version),
            json,
        ),
        Commands::Grid => cmd_grid(&cfg),
        Commands::Config => cmd_config(&cfg, cli.config.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// Run wiring
// ---------------------------------------------------------------------------

fn load_tokenizer(path: Option<&str>) -> Result<Arc<dyn Tokenizer>> {
    match path {
        None => Ok(Arc::new(CharTokenizer)),
        #[cfg(feature = "hf-tokenizer")]
        Some(p) => Ok(Arc::new(niah_core::HfTokenizer::from_file(p)?)),
        #[cfg(not(feature = "hf-tokenizer"))]
        Some(_) => bail!("hf-tokenizer feature not enabled: rebuild with `--features hf-tokenizer`"),
    }
}

fn build_scorer(cfg: &Config) -> Result<Arc<dyn Scorer>> {
    let scorer: Arc<dyn Scorer> = match cfg.criterion()? {
        Criterion::F1 => Arc::new(F1Scorer::whitespace()),
        Criterion::F1Zh => Arc::new(F1Scorer::segmented()),
        Criterion::Judge => {
            let key = resolve_api_key(Provider::OpenAi, cfg.eval.judge_api_key.as_deref())?
                .unwrap_or_default();
            let settings = WorkerSettings {
                model: cfg.eval.judge_model.clone(),
                timeout: Duration::from_secs(cfg.model.timeout_secs),
                ..Default::default()
            };
            let url = cfg
                .eval
                .judge_base_url
                .as_deref()
                .unwrap_or(DEFAULT_OPENAI_URL);
            let judge: Arc<dyn ModelWorker> = Arc::new(OpenAiWorker::new(url, key, &settings));
            Arc::new(JudgeScorer::new(judge))
        }
    };
    Ok(scorer)
}

fn open_store(cfg: &Config) -> Result<Arc<dyn ResultStore>> {
    let store: Arc<dyn ResultStore> = match cfg.output.backend.as_str() {
        "sqlite" => Arc::new(
            SqliteStore::new(Path::new(&cfg.output.sqlite_path))
                .context("failed to open results database")?,
        ),
        _ => Arc::new(JsonDirStore::new(&cfg.output.results_dir)),
    };
    Ok(store)
}

fn build_prompts(cfg: &Config, provider: Provider) -> Result<PromptBuilder> {
    let mut prompts = PromptBuilder::new(provider, cfg.needle.question.clone())
        .with_instruction(cfg.needle.further_instruct.clone())
        .with_question_at_beginning(cfg.run.question_at_beginning);
    if let Some(path) = &cfg.model.prompt_template {
        let template = std::fs::read_to_string(path)
            .with_context(|| format!("reading prompt template {path}"))?;
        prompts = prompts.with_anthropic_template(template);
    }
    Ok(prompts)
}

fn schedule(cfg: &Config) -> Result<Schedule> {
    Ok(match cfg.mode()? {
        RunMode::Sequential => Schedule::Sequential,
        RunMode::Concurrent => Schedule::Concurrent {
            max_in_flight: cfg.run.num_concurrent_requests,
        },
        RunMode::Pool => Schedule::Pool {
            multiplier: cfg.run.pool_multiplier,
        },
    })
}

fn cmd_run(cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let provider = cfg.provider()?;
    let lengths = cfg.context_lengths()?;
    let depths = cfg.depth_percents()?;
    let schedule = schedule(cfg)?;

    let settings = WorkerSettings {
        model: cfg.model.name.clone(),
        api_key: cfg.model.api_key.clone(),
        base_url: cfg.model.base_url.clone(),
        endpoints: cfg.model.endpoints.clone(),
        timeout: Duration::from_secs(cfg.model.timeout_secs),
        max_tokens: cfg.model.max_tokens,
        penalty: cfg.model.penalty,
    };
    let workers = build_workers(provider, &settings)?;
    let scorer = build_scorer(cfg)?;
    let prompts = build_prompts(cfg, provider)?;

    let tokenizer = load_tokenizer(cfg.haystack.tokenizer.as_deref())?;
    let source = HaystackSource::from_path(&cfg.haystack.path);
    let max_length = lengths.iter().copied().max().unwrap_or(0);
    let assembler = ContextAssembler::from_source(
        tokenizer,
        &source,
        max_length,
        &cfg.needle.text,
        cfg.grid.buffer,
    )
    .with_context(|| format!("failed to load haystack from {}", cfg.haystack.path))?;
    if assembler.corpus_len() < max_length {
        tracing::warn!(
            corpus = assembler.corpus_len(),
            max_length,
            "haystack is shorter than the longest context"
        );
    }

    let store = if cfg.output.save_results {
        Some(open_store(cfg)?)
    } else {
        None
    };
    let contexts = cfg
        .output
        .save_contexts
        .then(|| ContextDumper::new(&cfg.output.contexts_dir));
    let pause = cfg
        .run
        .seconds_to_sleep_between_completions
        .filter(|s| *s > 0.0)
        .map(Duration::from_secs_f64);

    let template = TrialTemplate {
        model: cfg.model.name.clone(),
        needle: cfg.needle.text.clone(),
        retrieval_question: cfg.needle.question.clone(),
        further_instruct: cfg.needle.further_instruct.clone(),
        results_version: cfg.run.results_version,
    };
    let harness = Arc::new(
        Harness::new(template, Arc::new(assembler), prompts, scorer)
            .with_store(store.clone())
            .with_context_dump(contexts)
            .with_pause(pause)
            .with_status(cfg.run.print_ongoing_status),
    );

    if cfg.run.print_ongoing_status {
        sweep::print_start_summary(&cfg.model.name, &lengths, &depths, &cfg.needle.text);
    }
    let points = grid(&lengths, &depths, cfg.grid.reverse_lengths);
    let report = harness.run(points, &workers, schedule)?;

    println!(
        "Trials: {}  Completed: {}  Skipped: {}  Failed: {}",
        report.total(),
        report.completed.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (point, error) in &report.failed {
        println!(
            "  len={} depth={}%: {error}",
            point.context_length, point.depth_percent
        );
    }

    let records = match &store {
        Some(store) => store.records(&cfg.model.name)?,
        None => report.completed,
    };
    let records = report::of_version(records, cfg.run.results_version);
    let scores = ScoreGrid::from_records(&records);
    if !scores.is_empty() {
        println!();
        print!("{}", scores.render());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspection commands
// ---------------------------------------------------------------------------

fn cmd_results(cfg: &Config, model: Option<&str>, version: u32, json: bool) -> Result<()> {
    let model = model.unwrap_or(&cfg.model.name);
    if model.trim().is_empty() {
        bail!("no model given: pass --model or set model.name");
    }
    let store = open_store(cfg)?;
    let records = report::of_version(store.records(model)?, version);
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No results for {model} (version {version}).");
        return Ok(());
    }
    println!("Model: {model}  Version: {version}");
    println!();
    print!("{}", ScoreGrid::from_records(&records).render());
    Ok(())
}

fn cmd_grid(cfg: &Config) -> Result<()> {
    let lengths = cfg.context_lengths()?;
    let depths = cfg.depth_percents()?;
    println!("Context lengths ({}):", lengths.len());
    println!(
        "  {}",
        lengths
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Depths ({}, {}):", depths.len(), cfg.grid.depth_spacing);
    println!(
        "  {}",
        depths
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Trials: {}", lengths.len() * depths.len());
    Ok(())
}

fn cmd_config(cfg: &Config, explicit: Option<&Path>) -> Result<()> {
    println!("Config: {}", config::show_config_path(explicit));
    println!();
    println!("[needle]");
    println!("  text = {:?}", cfg.needle.text);
    println!("  question = {:?}", cfg.needle.question);
    if let Some(ref instr) = cfg.needle.further_instruct {
        println!("  further_instruct = {instr:?}");
    }
    println!();
    println!("[haystack]");
    println!("  path = {}", cfg.haystack.path);
    println!(
        "  tokenizer = {}",
        cfg.haystack.tokenizer.as_deref().unwrap_or("(characters)")
    );
    println!();
    println!("[grid]");
    println!(
        "  context_lengths = {}..{} x{}",
        cfg.grid.context_lengths_min,
        cfg.grid.context_lengths_max,
        cfg.grid.context_lengths_num_intervals
    );
    println!(
        "  depth_percent = {}..{} x{} ({})",
        cfg.grid.depth_percent_min,
        cfg.grid.depth_percent_max,
        cfg.grid.depth_percent_intervals,
        cfg.grid.depth_spacing
    );
    println!("  buffer = {}", cfg.grid.buffer);
    println!();
    println!("[model]");
    println!("  provider = {}", cfg.model.provider);
    println!("  name = {}", cfg.model.name);
    for endpoint in &cfg.model.endpoints {
        println!("  endpoint = {endpoint}");
    }
    println!();
    println!("[run]");
    println!("  mode = {}", cfg.run.mode);
    println!("  num_concurrent_requests = {}", cfg.run.num_concurrent_requests);
    println!("  pool_multiplier = {}", cfg.run.pool_multiplier);
    println!("  results_version = {}", cfg.run.results_version);
    println!();
    println!("[eval]");
    println!("  criterion = {}", cfg.eval.criterion);
    println!();
    println!("[output]");
    println!("  save_results = {}", cfg.output.save_results);
    println!("  save_contexts = {}", cfg.output.save_contexts);
    println!("  backend = {}", cfg.output.backend);
    Ok(())
}
