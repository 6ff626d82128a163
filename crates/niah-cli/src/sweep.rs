//! Sweep driver: runs every (context length, depth) point against the model.
//!
//! A point is skipped when the store already holds its result, fails on
//! its own without touching other points, or completes and is persisted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use niah_core::{
    ContextAssembler, ModelWorker, NiahResult, PromptBuilder, ResultRecord, ResultStore, Scorer,
    TrialSpec,
};
use niah_store::ContextDumper;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub context_length: usize,
    pub depth_percent: f64,
}

/// Cartesian product of lengths and depths, optionally longest context first.
pub fn grid(lengths: &[usize], depths: &[f64], longest_first: bool) -> Vec<GridPoint> {
    let mut lengths = lengths.to_vec();
    if longest_first {
        lengths.reverse();
    }
    lengths
        .iter()
        .flat_map(|&context_length| {
            depths.iter().map(move |&depth_percent| GridPoint {
                context_length,
                depth_percent,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// One worker, points in order.
    Sequential,
    /// Async dispatch with at most `max_in_flight` trials running.
    Concurrent { max_in_flight: usize },
    /// `workers x multiplier` threads, points dealt round-robin.
    Pool { multiplier: usize },
}

#[derive(Debug)]
pub enum TrialOutcome {
    Completed(ResultRecord),
    Skipped(GridPoint),
    Failed { point: GridPoint, error: String },
}

/// Everything a sweep produced, handed back to the caller.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub completed: Vec<ResultRecord>,
    pub skipped: Vec<GridPoint>,
    pub failed: Vec<(GridPoint, String)>,
}

impl SweepReport {
    fn push(&mut self, outcome: TrialOutcome) {
        match outcome {
            TrialOutcome::Completed(record) => self.completed.push(record),
            TrialOutcome::Skipped(point) => self.skipped.push(point),
            TrialOutcome::Failed { point, error } => self.failed.push((point, error)),
        }
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.skipped.len() + self.failed.len()
    }
}

/// Fields shared by every trial of a run.
#[derive(Debug, Clone)]
pub struct TrialTemplate {
    pub model: String,
    pub needle: String,
    pub retrieval_question: String,
    pub further_instruct: Option<String>,
    pub results_version: u32,
}

impl TrialTemplate {
    fn spec(&self, point: GridPoint) -> TrialSpec {
        TrialSpec {
            context_length: point.context_length,
            depth_percent: point.depth_percent,
            needle: self.needle.clone(),
            retrieval_question: self.retrieval_question.clone(),
            further_instruct: self.further_instruct.clone(),
            model: self.model.clone(),
            results_version: self.results_version,
        }
    }
}

pub struct Harness {
    template: TrialTemplate,
    assembler: Arc<ContextAssembler>,
    prompts: PromptBuilder,
    scorer: Arc<dyn Scorer>,
    store: Option<Arc<dyn ResultStore>>,
    contexts: Option<ContextDumper>,
    pause: Option<Duration>,
    print_status: bool,
}

impl Harness {
    pub fn new(
        template: TrialTemplate,
        assembler: Arc<ContextAssembler>,
        prompts: PromptBuilder,
        scorer: Arc<dyn Scorer>,
    ) -> Self {
        Self {
            template,
            assembler,
            prompts,
            scorer,
            store: None,
            contexts: None,
            pause: None,
            print_status: false,
        }
    }

    /// Persist results and skip points that already have one.
    pub fn with_store(mut self, store: Option<Arc<dyn ResultStore>>) -> Self {
        self.store = store;
        self
    }

    pub fn with_context_dump(mut self, contexts: Option<ContextDumper>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Sleep after each completion (rate-limited APIs).
    pub fn with_pause(mut self, pause: Option<Duration>) -> Self {
        self.pause = pause.filter(|d| !d.is_zero());
        self
    }

    pub fn with_status(mut self, print_status: bool) -> Self {
        self.print_status = print_status;
        self
    }

    pub fn run(
        self: &Arc<Self>,
        points: Vec<GridPoint>,
        workers: &[Arc<dyn ModelWorker>],
        schedule: Schedule,
    ) -> Result<SweepReport> {
        if workers.is_empty() {
            bail!("no inference workers configured");
        }
        info!(points = points.len(), workers = workers.len(), ?schedule, "sweep started");

        let report = match schedule {
            Schedule::Sequential => {
                let mut report = SweepReport::default();
                for point in points {
                    report.push(self.run_point(point, workers[0].as_ref()));
                }
                report
            }
            Schedule::Concurrent { max_in_flight } => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .context("failed to start async runtime")?;
                runtime.block_on(self.run_concurrent(points, workers, max_in_flight.max(1)))?
            }
            Schedule::Pool { multiplier } => self.run_pool(points, workers, multiplier.max(1))?,
        };

        info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "sweep finished"
        );
        Ok(report)
    }

    async fn run_concurrent(
        self: &Arc<Self>,
        points: Vec<GridPoint>,
        workers: &[Arc<dyn ModelWorker>],
        max_in_flight: usize,
    ) -> Result<SweepReport> {
        let gate = Arc::new(Semaphore::new(max_in_flight));
        let mut tasks = Vec::with_capacity(points.len());

        for (i, point) in points.into_iter().enumerate() {
            let permit = Arc::clone(&gate)
                .acquire_owned()
                .await
                .context("admission gate closed")?;
            let harness = Arc::clone(self);
            let worker = Arc::clone(&workers[i % workers.len()]);
            let task = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                harness.run_point(point, worker.as_ref())
            });
            tasks.push((point, task));
        }

        let mut report = SweepReport::default();
        for (point, task) in tasks {
            let outcome = task.await.unwrap_or_else(|e| TrialOutcome::Failed {
                point,
                error: format!("trial task aborted: {e}"),
            });
            report.push(outcome);
        }
        Ok(report)
    }

    fn run_pool(
        &self,
        points: Vec<GridPoint>,
        workers: &[Arc<dyn ModelWorker>],
        multiplier: usize,
    ) -> Result<SweepReport> {
        let slots = workers.len() * multiplier;
        let mut queues: Vec<Vec<GridPoint>> = vec![Vec::new(); slots];
        for (i, point) in points.into_iter().enumerate() {
            queues[i % slots].push(point);
        }

        let joined: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = queues
                .into_iter()
                .enumerate()
                .map(|(slot, queue)| {
                    let worker = workers[slot % workers.len()].as_ref();
                    scope.spawn(move || {
                        debug!(slot, worker = worker.name(), points = queue.len(), "pool slot started");
                        queue
                            .into_iter()
                            .map(|point| self.run_point(point, worker))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        let mut report = SweepReport::default();
        for (slot, outcomes) in joined.into_iter().enumerate() {
            let outcomes = outcomes.map_err(|_| anyhow!("pool slot {slot} panicked"))?;
            for outcome in outcomes {
                report.push(outcome);
            }
        }
        Ok(report)
    }

    /// Run a single point. Errors are reported in the outcome, never raised.
    pub fn run_point(&self, point: GridPoint, worker: &dyn ModelWorker) -> TrialOutcome {
        let spec = self.template.spec(point);
        match self.try_run(&spec, worker) {
            Ok(Some(record)) => TrialOutcome::Completed(record),
            Ok(None) => TrialOutcome::Skipped(point),
            Err(e) => {
                warn!(
                    context_length = point.context_length,
                    depth_percent = point.depth_percent,
                    worker = worker.name(),
                    "trial failed: {e}"
                );
                TrialOutcome::Failed {
                    point,
                    error: e.to_string(),
                }
            }
        }
    }

    fn try_run(&self, spec: &TrialSpec, worker: &dyn ModelWorker) -> NiahResult<Option<ResultRecord>> {
        let key = spec.key();
        if let Some(store) = &self.store {
            if store.exists(&key)? {
                debug!(%key, "result exists, skipping");
                return Ok(None);
            }
        }

        let context = self
            .assembler
            .assemble(spec.context_length, spec.depth_percent)?;
        let prompt = self.prompts.build(&context.text);

        let started = Instant::now();
        let response = worker.complete(&prompt)?;
        let elapsed = started.elapsed().as_secs_f64();
        if let Some(pause) = self.pause {
            std::thread::sleep(pause);
        }

        let score = self
            .scorer
            .score(&response, &spec.needle, &spec.retrieval_question)?;
        let record = ResultRecord::new(spec, response, score, elapsed, Utc::now());
        info!(
            %key,
            score,
            tokens = context.token_count,
            shift = context.alignment_shift,
            "trial completed"
        );
        if self.print_status {
            print_status(&record);
        }

        if let Some(dumper) = &self.contexts {
            dumper.write(&key, &context.text)?;
        }
        if let Some(store) = &self.store {
            store.put(&record)?;
        }
        Ok(Some(record))
    }
}

fn print_status(record: &ResultRecord) {
    println!("-- Test Summary --");
    println!("Duration: {:.1} seconds", record.test_duration_seconds);
    println!("Context: {} tokens", record.context_length);
    println!("Depth: {}%", record.depth_percent);
    println!("Score: {}", record.score);
    println!("Response: {}\n", snippet(&record.model_response, 200));
}

/// Banner printed before a sweep.
pub fn print_start_summary(model: &str, lengths: &[usize], depths: &[f64], needle: &str) {
    let min_len = lengths.iter().min().copied().unwrap_or(0);
    let max_len = lengths.iter().max().copied().unwrap_or(0);
    let min_depth = depths.iter().copied().fold(f64::INFINITY, f64::min);
    let max_depth = depths.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    println!();
    println!("Starting Needle In A Haystack Testing...");
    println!("- Model: {model}");
    println!(
        "- Context Lengths: {}, Min: {min_len}, Max: {max_len}",
        lengths.len()
    );
    println!(
        "- Document Depths: {}, Min: {min_depth}%, Max: {max_depth}%",
        depths.len()
    );
    println!("- Needle: {}", needle.trim());
    println!("\n");
}

/// First `max_chars` characters on one line.
fn snippet(s: &str, max_chars: usize) -> String {
    let flat = s.trim().replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
