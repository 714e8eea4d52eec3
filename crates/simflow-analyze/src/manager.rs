//! Parallel map/reduce over the outputs of finished simulations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde_json::{Map, Value};
use simflow_core::config::FlowConfig;
use simflow_core::errors::{ErrorInfo, FlowError, Phase};
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;
use simflow_model::Simulation;
use simflow_platform::Platform;
use tracing::{debug, error, info, warn};

use crate::analyzer::{Analyzer, FileData, Mapped};
use crate::cache::ShardedCache;
use crate::parser::{ParsedFile, ParserRegistry};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(1150);

/// Snapshot delivered on every progress tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Simulations whose map step finished.
    pub completed: usize,
    /// Simulations admitted to the run.
    pub total: usize,
    /// Time since the run started.
    pub elapsed: Duration,
}

/// Receiver of progress ticks.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Admission, pool and timing knobs of an analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeOptions {
    /// Pool size.
    pub max_workers: usize,
    /// Proceed with whatever is analyzable.
    pub partial_analyze_ok: bool,
    /// Treat failed simulations as analyzable.
    pub analyze_failed_items: bool,
    /// Cap on analyzed simulations. Implies `partial_analyze_ok`.
    pub max_items: Option<usize>,
    /// Wall-clock ceiling of the map phase.
    pub timeout: Duration,
    /// Period of progress ticks and failure checks.
    pub progress_interval: Duration,
    /// Working directory given to analyzers without their own.
    pub working_directory: PathBuf,
    /// Give every analyzer the manager's working directory.
    pub force_manager_working_directory: bool,
    /// Log the run configuration at `info` instead of `debug`.
    pub verbose: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        AnalyzeOptions::from(&FlowConfig::default())
    }
}

impl From<&FlowConfig> for AnalyzeOptions {
    fn from(config: &FlowConfig) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            partial_analyze_ok: config.partial_analyze_ok,
            analyze_failed_items: config.analyze_failed_items,
            max_items: config.max_items,
            timeout: config.analyze_timeout(),
            progress_interval: PROGRESS_INTERVAL,
            working_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            force_manager_working_directory: false,
            verbose: false,
        }
    }
}

impl AnalyzeOptions {
    /// Whether incomplete groups are admitted.
    pub fn partial(&self) -> bool {
        self.partial_analyze_ok || self.max_items.is_some()
    }
}

/// Results of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeOutcome {
    /// Reduce result per analyzer uid, in analyzer order.
    pub results: IndexMap<String, Value>,
    /// Simulations that entered the map phase.
    pub analyzed: usize,
    /// Flattened simulations left out by admission.
    pub ignored: usize,
    /// Wall-clock of the run.
    pub elapsed: Duration,
}

impl AnalyzeOutcome {
    /// Reduce result of one analyzer.
    pub fn result(&self, uid: &str) -> Option<&Value> {
        self.results.get(uid)
    }
}

/// Runs analyzers over the simulations under a set of root entities.
pub struct AnalyzeManager {
    platform: Arc<dyn Platform>,
    options: AnalyzeOptions,
    roots: Vec<(ItemId, ItemType)>,
    exclude_ids: BTreeSet<ItemId>,
    analyzers: Vec<Box<dyn Analyzer>>,
    declared_uids: Vec<String>,
    parsers: ParserRegistry,
    progress: Option<ProgressCallback>,
    cache: Arc<ShardedCache>,
}

impl fmt::Debug for AnalyzeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyzeManager")
            .field("platform", &self.platform)
            .field("options", &self.options)
            .field("roots", &self.roots)
            .field("exclude_ids", &self.exclude_ids)
            .field("analyzers", &self.analyzer_uids())
            .field("parsers", &self.parsers)
            .finish()
    }
}

impl AnalyzeManager {
    /// Manager reading from `platform`.
    pub fn new(platform: Arc<dyn Platform>, options: AnalyzeOptions) -> Self {
        let cache = Arc::new(ShardedCache::for_workers(options.max_workers));
        Self {
            platform,
            options,
            roots: Vec::new(),
            exclude_ids: BTreeSet::new(),
            analyzers: Vec::new(),
            declared_uids: Vec::new(),
            parsers: ParserRegistry::default(),
            progress: None,
            cache,
        }
    }

    /// Adds a suite, experiment or simulation whose simulations are analyzed.
    pub fn add_item(&mut self, id: ItemId, item_type: ItemType) -> &mut Self {
        self.roots.push((id, item_type));
        self
    }

    /// Leaves a simulation out of the run.
    pub fn exclude(&mut self, id: ItemId) -> &mut Self {
        self.exclude_ids.insert(id);
        self
    }

    /// Adds an analyzer.
    pub fn add_analyzer(&mut self, analyzer: Box<dyn Analyzer>) -> &mut Self {
        self.declared_uids.push(analyzer.uid());
        self.analyzers.push(analyzer);
        self
    }

    /// Replaces the file parsers.
    pub fn set_parsers(&mut self, parsers: ParserRegistry) -> &mut Self {
        self.parsers = parsers;
        self
    }

    /// Sends progress ticks to `callback` instead of the log.
    pub fn on_progress(&mut self, callback: ProgressCallback) -> &mut Self {
        self.progress = Some(callback);
        self
    }

    /// The analyzers, with their final uids once a run started.
    ///
    /// Empty after a run that timed out: the abandoned map workers keep the
    /// analyzers and destroy them once the stuck calls return.
    pub fn analyzers(&self) -> &[Box<dyn Analyzer>] {
        &self.analyzers
    }

    /// Uids of the analyzers, in order.
    pub fn analyzer_uids(&self) -> Vec<String> {
        self.analyzers.iter().map(|analyzer| analyzer.uid()).collect()
    }

    /// Cache of the latest run.
    pub fn cache(&self) -> &ShardedCache {
        &self.cache
    }

    /// Runs every phase: expansion, admission, init, map, reduce and teardown.
    ///
    /// The first failure of any worker cancels the run. Reduce is not called
    /// after a failure, but `destroy` always is. The timeout is a hard ceiling:
    /// past it the run waits one progress interval for the workers to stop,
    /// then returns [`FlowError::AnalyzeTimeout`] and leaves them behind.
    pub fn analyze(&mut self) -> Result<AnalyzeOutcome, FlowError> {
        let started = Instant::now();
        if self.analyzers.is_empty() {
            return Err(FlowError::validation("no_analyzers", "no analyzers were added"));
        }
        let flattened = self.expand()?;
        let (items, ignored) = self.admit(flattened)?;
        self.cache = Arc::new(ShardedCache::for_workers(self.options.max_workers));
        self.initialize_analyzers()?;
        let mut group_failure = None;
        for analyzer in &mut self.analyzers {
            if let Err(err) = analyzer.per_group(&items) {
                group_failure = Some(err.with_analyzer(analyzer.uid()));
                break;
            }
        }
        if let Some(err) = group_failure {
            self.teardown();
            return Err(err);
        }
        self.log_configuration(items.len(), ignored);

        let result = self.map_and_reduce(&items, started);
        self.teardown();
        let results = result?;
        let elapsed = started.elapsed();
        info!(
            analyzed = items.len(),
            analyzers = results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "analysis finished"
        );
        Ok(AnalyzeOutcome {
            results,
            analyzed: items.len(),
            ignored,
            elapsed,
        })
    }

    fn expand(&self) -> Result<Vec<Simulation>, FlowError> {
        let mut seen = BTreeSet::new();
        let mut simulations = Vec::new();
        for (id, item_type) in &self.roots {
            let item = self
                .platform
                .get_item(*id, *item_type, false)
                .map_err(|err| err.with_phase(Phase::Fetch).with_entity(id))?;
            for simulation in self
                .platform
                .flatten_item(&item)
                .map_err(|err| err.with_phase(Phase::Fetch).with_entity(id))?
            {
                if self.exclude_ids.contains(&simulation.uid()) || !seen.insert(simulation.uid()) {
                    continue;
                }
                simulations.push(simulation);
            }
        }
        debug!(roots = self.roots.len(), simulations = simulations.len(), "expanded analysis roots");
        Ok(simulations)
    }

    fn admit(&self, flattened: Vec<Simulation>) -> Result<(Vec<Simulation>, usize), FlowError> {
        let total = flattened.len();
        let (mut ready, waiting): (Vec<Simulation>, Vec<Simulation>) =
            flattened.into_iter().partition(|simulation| match simulation.status() {
                EntityStatus::Succeeded => true,
                EntityStatus::Failed => self.options.analyze_failed_items,
                _ => false,
            });
        if !waiting.is_empty() && !self.options.partial() {
            return Err(FlowError::ItemsNotReady(
                ErrorInfo::new(
                    "items_not_ready",
                    format!("{} of {total} simulations are not ready for analysis", waiting.len()),
                )
                .with_context("not_ready", waiting.len().to_string())
                .with_context("total", total.to_string())
                .with_hint("set partial_analyze_ok or max_items to analyze what is ready"),
            )
            .with_phase(Phase::Filter));
        }
        if let Some(limit) = self.options.max_items {
            ready.truncate(limit);
        }
        if ready.is_empty() {
            return Err(FlowError::validation("no_items", "No items to analyze")
                .with_context("total", total.to_string())
                .with_phase(Phase::Filter));
        }
        let ignored = total - ready.len();
        Ok((ready, ignored))
    }

    fn initialize_analyzers(&mut self) -> Result<(), FlowError> {
        let unique: BTreeSet<&String> = self.declared_uids.iter().collect();
        let renumber = unique.len() < self.declared_uids.len();
        for (index, (analyzer, declared)) in self.analyzers.iter_mut().zip(&self.declared_uids).enumerate() {
            let uid = if renumber {
                format!("{declared}-{index}")
            } else {
                declared.clone()
            };
            if analyzer.uid() != uid {
                debug!(analyzer = %uid, "renamed analyzer to keep uids unique");
                analyzer.set_uid(uid);
            }
        }
        for analyzer in &mut self.analyzers {
            if self.options.force_manager_working_directory || analyzer.working_dir().is_none() {
                analyzer.set_working_dir(self.options.working_directory.clone());
            }
            let uid = analyzer.uid();
            analyzer.initialize().map_err(|err| err.with_analyzer(uid))?;
        }
        Ok(())
    }

    fn log_configuration(&self, items: usize, ignored: usize) {
        let parsing: Vec<String> = self
            .analyzers
            .iter()
            .map(|analyzer| {
                format!("{} (parse {})", analyzer.uid(), if analyzer.parse() { "on" } else { "off" })
            })
            .collect();
        if self.options.verbose {
            info!(
                items,
                ignored,
                partial_analyze_ok = self.options.partial(),
                max_items = ?self.options.max_items,
                analyzers = %parsing.join(", "),
                workers = self.options.max_workers,
                "analyze manager configuration"
            );
        } else {
            debug!(
                items,
                ignored,
                partial_analyze_ok = self.options.partial(),
                max_items = ?self.options.max_items,
                analyzers = %parsing.join(", "),
                workers = self.options.max_workers,
                "analyze manager configuration"
            );
        }
    }

    fn map_and_reduce(
        &mut self,
        items: &[Simulation],
        started: Instant,
    ) -> Result<IndexMap<String, Value>, FlowError> {
        let pool = build_pool(self.options.max_workers)?;
        let worker = MapWorker {
            platform: Arc::clone(&self.platform),
            analyzers: std::mem::take(&mut self.analyzers),
            parsers: self.parsers.clone(),
            cache: Arc::clone(&self.cache),
            completed: Arc::new(AtomicUsize::new(0)),
        };
        let (worker, pool) = match self.map_phase(worker, pool, items, started) {
            Ok(returned) => returned,
            Err(err) => {
                self.declared_uids.clear();
                return Err(err);
            }
        };
        self.analyzers = worker.analyzers;
        if let Some(err) = self.cache.exception()? {
            error!(
                analyzer = err.analyzer().unwrap_or("-"),
                entity = err.entity().unwrap_or("-"),
                error = %err,
                "analysis failed"
            );
            return Err(err);
        }
        self.reduce_phase(&pool, items)
    }

    /// Maps `items` on a detached thread and hands the worker back once every
    /// map returned. Fails without handing it back when the workers are
    /// abandoned past the deadline or panicked.
    fn map_phase(
        &self,
        worker: MapWorker,
        pool: ThreadPool,
        items: &[Simulation],
        started: Instant,
    ) -> Result<(MapWorker, ThreadPool), FlowError> {
        let total = items.len();
        let completed = Arc::clone(&worker.completed);
        let cache = Arc::clone(&self.cache);
        let deadline = started + self.options.timeout;
        let (done_tx, done_rx) = mpsc::channel::<(MapWorker, ThreadPool)>();
        let owned: Vec<Simulation> = items.to_vec();
        let handle = thread::Builder::new()
            .name("simflow-analyze-map".to_string())
            .spawn(move || {
                pool.install(|| worker.map_all(&owned));
                if let Err(mpsc::SendError((mut worker, _))) = done_tx.send((worker, pool)) {
                    worker.destroy_abandoned();
                }
            })
            .map_err(|err| FlowError::io("map_thread", err).with_phase(Phase::Map))?;

        let progress = || Progress {
            completed: completed.load(Ordering::Relaxed),
            total,
            elapsed: started.elapsed(),
        };
        let mut cancelled = false;
        loop {
            let wait = if cancelled {
                self.options.progress_interval
            } else {
                self.options
                    .progress_interval
                    .min(deadline.saturating_duration_since(Instant::now()))
            };
            match done_rx.recv_timeout(wait) {
                Ok(returned) => {
                    self.tick(progress());
                    return Ok(returned);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let _ = handle.join();
                    return Err(FlowError::Analyzer(ErrorInfo::new(
                        "analyzer_panicked",
                        "an analyzer panicked during map",
                    ))
                    .with_phase(Phase::Map));
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.tick(progress());
                    if cancelled {
                        let err = cache.exception()?.unwrap_or_else(|| self.timeout_error(&progress()));
                        warn!(
                            completed = completed.load(Ordering::Relaxed),
                            total,
                            "map workers did not stop after the deadline, abandoning them"
                        );
                        return Err(err);
                    }
                    if Instant::now() >= deadline {
                        cancelled = true;
                        if let Err(post) = cache.post_exception(&self.timeout_error(&progress())) {
                            warn!(error = %post, "could not record analysis timeout");
                        }
                    } else if cache.has_exception() {
                        debug!("failure posted, waiting for workers to stop");
                    }
                }
            }
        }
    }

    fn timeout_error(&self, progress: &Progress) -> FlowError {
        FlowError::AnalyzeTimeout(
            ErrorInfo::new("analyze_timeout", "analysis exceeded its time limit")
                .with_context("timeout_secs", format!("{:.3}", self.options.timeout.as_secs_f64()))
                .with_context("completed", progress.completed.to_string())
                .with_context("total", progress.total.to_string()),
        )
        .with_phase(Phase::Map)
    }

    fn reduce_phase(&self, pool: &ThreadPool, items: &[Simulation]) -> Result<IndexMap<String, Value>, FlowError> {
        let uids = self.analyzer_uids();
        let mappings: Vec<Mapped> = self.cache.transact(|view| {
            uids.iter()
                .map(|uid| {
                    items
                        .iter()
                        .filter_map(|simulation| {
                            view.get(&simulation.uid().to_string())
                                .and_then(|entry| entry.get(uid))
                                .map(|value| (simulation.clone(), value.clone()))
                        })
                        .collect()
                })
                .collect()
        })?;
        let reduced: Vec<Result<Value, FlowError>> = pool.install(|| {
            self.analyzers
                .par_iter()
                .zip(mappings.par_iter())
                .map(|(analyzer, mapped)| {
                    debug!(analyzer = %analyzer.uid(), mapped = mapped.len(), "reducing");
                    analyzer
                        .reduce(mapped)
                        .map_err(|err| err.with_phase(Phase::Reduce).with_analyzer(analyzer.uid()))
                })
                .collect()
        });
        let mut results = IndexMap::new();
        for (uid, result) in uids.into_iter().zip(reduced) {
            results.insert(uid, result?);
        }
        Ok(results)
    }

    fn tick(&self, progress: Progress) {
        match &self.progress {
            Some(callback) => callback(&progress),
            None => info!(
                completed = progress.completed,
                total = progress.total,
                elapsed_ms = progress.elapsed.as_millis() as u64,
                "analysis progress"
            ),
        }
    }

    fn teardown(&mut self) {
        for analyzer in &mut self.analyzers {
            if let Err(err) = analyzer.destroy() {
                warn!(analyzer = %analyzer.uid(), error = %err, "analyzer teardown failed");
            }
        }
    }
}

/// Per-simulation map step shared by every pool worker.
///
/// Owns its state so the map thread can outlive a timed-out run.
struct MapWorker {
    platform: Arc<dyn Platform>,
    analyzers: Vec<Box<dyn Analyzer>>,
    parsers: ParserRegistry,
    cache: Arc<ShardedCache>,
    completed: Arc<AtomicUsize>,
}

impl MapWorker {
    fn map_all(&self, items: &[Simulation]) {
        items.par_iter().for_each(|simulation| {
            if self.cache.has_exception() {
                return;
            }
            if let Err(err) = self.map_simulation(simulation) {
                debug!(entity = %simulation.uid(), error = %err, "map failed");
                if let Err(post) = self.cache.post_exception(&err) {
                    warn!(error = %post, "could not record map failure");
                }
            }
            self.completed.fetch_add(1, Ordering::Relaxed);
        });
    }

    fn destroy_abandoned(&mut self) {
        for analyzer in &mut self.analyzers {
            if let Err(err) = analyzer.destroy() {
                warn!(analyzer = %analyzer.uid(), error = %err, "analyzer teardown failed");
            }
        }
        debug!("abandoned map workers finished");
    }

    fn map_simulation(&self, simulation: &Simulation) -> Result<(), FlowError> {
        let id = simulation.uid();
        let mut selected = Vec::new();
        for analyzer in &self.analyzers {
            let keep = analyzer.filter(simulation).map_err(|err| {
                err.with_phase(Phase::Filter)
                    .with_analyzer(analyzer.uid())
                    .with_entity(id)
            })?;
            if keep {
                selected.push(analyzer);
            }
        }
        if selected.is_empty() {
            return Ok(());
        }

        let filenames: BTreeSet<String> = selected
            .iter()
            .flat_map(|analyzer| analyzer.filenames())
            .map(|name| normalize(&name))
            .collect();
        let raw = if filenames.is_empty() {
            BTreeMap::new()
        } else {
            if self.cache.has_exception() {
                return Ok(());
            }
            let requested: Vec<String> = filenames.into_iter().collect();
            self.platform
                .get_files(simulation, &requested)
                .map_err(|err| err.with_phase(Phase::Fetch).with_entity(id))?
        };

        let mut parsed: BTreeMap<String, ParsedFile> = BTreeMap::new();
        let mut results = Map::new();
        for analyzer in selected {
            if self.cache.has_exception() {
                return Ok(());
            }
            let uid = analyzer.uid();
            let mut data = FileData::new();
            for name in analyzer.filenames().iter().map(|name| normalize(name)) {
                let Some(bytes) = raw.get(&name) else {
                    continue;
                };
                let file = if analyzer.parse() {
                    if !parsed.contains_key(&name) {
                        let file = self.parsers.parse(&name, bytes).map_err(|err| {
                            err.with_phase(Phase::Parse)
                                .with_analyzer(uid.clone())
                                .with_entity(id)
                        })?;
                        parsed.insert(name.clone(), file);
                    }
                    parsed[&name].clone()
                } else {
                    ParsedFile::Raw(bytes.clone())
                };
                data.insert(name, file);
            }
            let value = analyzer.map(&data, simulation).map_err(|err| {
                err.with_phase(Phase::Map)
                    .with_analyzer(uid.clone())
                    .with_entity(id)
            })?;
            results.insert(uid, value);
        }
        if self.cache.has_exception() {
            return Ok(());
        }
        self.cache.set(id.to_string(), Value::Object(results))
    }
}

fn normalize(filename: &str) -> String {
    filename.replace('\\', "/")
}

fn build_pool(workers: usize) -> Result<ThreadPool, FlowError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|err| FlowError::io("thread_pool", err))
}
