use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use simflow_analyze::{
    AnalyzeManager, AnalyzeOptions, Analyzer, CollectingAnalyzer, FileData, Mapped, Progress,
    EXCEPTION_KEY,
};
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;
use simflow_model::{CommandLine, Experiment, Simulation, Task};
use simflow_platform::{MemoryPlatform, Platform};

const RESULTS: &str = "output/results.json";

#[derive(Default)]
struct Recorder {
    uid: String,
    filenames: Vec<String>,
    parse: bool,
    fail_on: Option<ItemId>,
    keep_none: bool,
    map_delay: Option<Duration>,
    working_dir: Option<PathBuf>,
    reduce_calls: Arc<AtomicUsize>,
    lifecycle: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            filenames: vec![RESULTS.to_string()],
            parse: true,
            ..Self::default()
        }
    }
}

impl Analyzer for Recorder {
    fn uid(&self) -> String {
        self.uid.clone()
    }

    fn set_uid(&mut self, uid: String) {
        self.uid = uid;
    }

    fn filenames(&self) -> Vec<String> {
        self.filenames.clone()
    }

    fn parse(&self) -> bool {
        self.parse
    }

    fn filter(&self, _simulation: &Simulation) -> Result<bool, FlowError> {
        Ok(!self.keep_none)
    }

    fn map(&self, data: &FileData, simulation: &Simulation) -> Result<Value, FlowError> {
        if let Some(delay) = self.map_delay {
            thread::sleep(delay);
        }
        if self.fail_on == Some(simulation.uid()) {
            return Err(FlowError::Analyzer(ErrorInfo::new("map_failed", "map raised")));
        }
        let file = data.get(RESULTS).expect("requested file present");
        Ok(match file.as_json() {
            Some(document) => document["value"].clone(),
            None => json!(file.as_bytes().map(<[u8]>::len)),
        })
    }

    fn reduce(&self, mapped: &Mapped) -> Result<Value, FlowError> {
        self.reduce_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Array(mapped.iter().map(|(_, value)| value.clone()).collect()))
    }

    fn initialize(&mut self) -> Result<(), FlowError> {
        self.lifecycle.lock().expect("lock").push(format!("init:{}", self.uid));
        Ok(())
    }

    fn per_group(&mut self, simulations: &[Simulation]) -> Result<(), FlowError> {
        self.lifecycle
            .lock()
            .expect("lock")
            .push(format!("group:{}", simulations.len()));
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), FlowError> {
        self.lifecycle.lock().expect("lock").push(format!("destroy:{}", self.uid));
        Ok(())
    }

    fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    fn set_working_dir(&mut self, dir: PathBuf) {
        self.working_dir = Some(dir);
    }
}

fn populated(platform: &MemoryPlatform, count: usize) -> (Experiment, Vec<ItemId>) {
    let mut experiment = Experiment::new("analysis", Task::new(CommandLine::new("model")));
    let base = experiment.base_simulation();
    for index in 0..count {
        let mut simulation = base.derive();
        simulation.meta.tags.insert("index".to_string(), index.to_string());
        experiment.add_simulation(simulation).expect("add");
    }
    platform.create_experiment(&mut experiment).expect("experiment");
    platform
        .create_simulations(experiment.simulations_mut())
        .expect("simulations");
    platform.run_simulations(&experiment).expect("run");
    let ids = platform.simulation_ids(experiment.uid()).expect("ids");
    for (index, id) in ids.iter().enumerate() {
        platform
            .put_file(*id, RESULTS, format!("{{\"value\": {index}}}"))
            .expect("file");
    }
    (experiment, ids)
}

fn options() -> AnalyzeOptions {
    AnalyzeOptions {
        max_workers: 4,
        timeout: Duration::from_secs(30),
        progress_interval: Duration::from_millis(10),
        ..AnalyzeOptions::default()
    }
}

fn manager(platform: &Arc<MemoryPlatform>, experiment: &Experiment, options: AnalyzeOptions) -> AnalyzeManager {
    let mut manager = AnalyzeManager::new(platform.clone(), options);
    manager.add_item(experiment.uid(), ItemType::Experiment);
    manager
}

#[test]
fn partial_analysis_maps_only_succeeded_simulations() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, ids) = populated(&platform, 10);
    platform.script_status(ids[7], EntityStatus::Failed).expect("script");
    platform.script_status(ids[8], EntityStatus::Failed).expect("script");
    platform.script_status(ids[9], EntityStatus::Running).expect("script");

    let mut manager = manager(
        &platform,
        &experiment,
        AnalyzeOptions {
            partial_analyze_ok: true,
            ..options()
        },
    );
    let recorder = Recorder::new("values");
    let lifecycle = recorder.lifecycle.clone();
    manager.add_analyzer(Box::new(recorder));
    let outcome = manager.analyze().expect("analysis");

    assert_eq!(outcome.analyzed, 7);
    assert_eq!(outcome.ignored, 3);
    assert_eq!(
        outcome.result("values"),
        Some(&json!([0, 1, 2, 3, 4, 5, 6]))
    );
    assert_eq!(
        *lifecycle.lock().expect("lock"),
        vec!["init:values", "group:7", "destroy:values"]
    );
}

#[test]
fn incomplete_groups_are_refused_without_partial_analysis() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, ids) = populated(&platform, 4);
    platform.script_status(ids[1], EntityStatus::Running).expect("script");
    platform.script_status(ids[2], EntityStatus::Failed).expect("script");

    let mut manager = manager(&platform, &experiment, options());
    manager.add_analyzer(Box::new(Recorder::new("values")));
    let err = manager.analyze().expect_err("not ready");
    assert_eq!(err.kind(), "ItemsNotReady");
    assert_eq!(err.info().context.get("not_ready").map(String::as_str), Some("2"));
    assert_eq!(platform.get_files_calls().expect("calls"), 0);

    let mut manager = self::manager(
        &platform,
        &experiment,
        AnalyzeOptions {
            partial_analyze_ok: true,
            analyze_failed_items: true,
            ..options()
        },
    );
    manager.add_analyzer(Box::new(Recorder::new("values")));
    let outcome = manager.analyze().expect("analysis");
    assert_eq!(outcome.result("values"), Some(&json!([0, 2, 3])));
}

#[test]
fn first_map_failure_cancels_the_run() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, ids) = populated(&platform, 100);
    let mut failing = Recorder::new("A");
    failing.fail_on = Some(ids[2]);
    let failing_reduces = failing.reduce_calls.clone();
    let healthy = Recorder::new("B");
    let healthy_reduces = healthy.reduce_calls.clone();
    let lifecycle = healthy.lifecycle.clone();

    let mut manager = manager(&platform, &experiment, options());
    manager.add_analyzer(Box::new(failing)).add_analyzer(Box::new(healthy));
    let err = manager.analyze().expect_err("failure");

    assert_eq!(err.kind(), "AnalyzerError");
    assert_eq!(err.analyzer(), Some("A"));
    assert_eq!(err.entity(), Some(ids[2].to_string().as_str()));
    assert_eq!(err.phase(), Some("map"));
    let posted = manager
        .cache()
        .exception()
        .expect("slot")
        .expect("posted failure");
    assert_eq!(posted.analyzer(), Some("A"));
    assert_eq!(posted.entity(), Some(ids[2].to_string().as_str()));
    assert_eq!(failing_reduces.load(Ordering::SeqCst), 0);
    assert_eq!(healthy_reduces.load(Ordering::SeqCst), 0);
    assert!(lifecycle.lock().expect("lock").contains(&"destroy:B".to_string()));
}

#[test]
fn empty_experiments_have_no_items() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, _) = populated(&platform, 0);
    let mut manager = manager(&platform, &experiment, options());
    manager.add_analyzer(Box::new(Recorder::new("values")));
    let err = manager.analyze().expect_err("no items");
    assert_eq!(err.kind(), "Validation");
    assert_eq!(err.info().code, "no_items");
}

#[test]
fn filtered_out_simulations_reduce_to_an_empty_mapping() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, _) = populated(&platform, 5);
    let mut recorder = Recorder::new("nothing");
    recorder.keep_none = true;
    let reduces = recorder.reduce_calls.clone();
    let mut manager = manager(&platform, &experiment, options());
    manager.add_analyzer(Box::new(recorder));
    let outcome = manager.analyze().expect("analysis");
    assert_eq!(outcome.result("nothing"), Some(&json!([])));
    assert_eq!(reduces.load(Ordering::SeqCst), 1);
    assert_eq!(platform.get_files_calls().expect("calls"), 0);
}

#[test]
fn max_items_keeps_the_first_simulations() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, ids) = populated(&platform, 8);
    platform.script_status(ids[7], EntityStatus::Running).expect("script");
    let mut manager = manager(
        &platform,
        &experiment,
        AnalyzeOptions {
            max_items: Some(4),
            ..options()
        },
    );
    manager.add_analyzer(Box::new(Recorder::new("values")));
    let outcome = manager.analyze().expect("analysis");
    assert_eq!(outcome.analyzed, 4);
    assert_eq!(outcome.result("values"), Some(&json!([0, 1, 2, 3])));
}

#[test]
fn excluded_simulations_are_skipped() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, ids) = populated(&platform, 3);
    let mut manager = manager(&platform, &experiment, options());
    manager.exclude(ids[0]).add_analyzer(Box::new(Recorder::new("values")));
    let outcome = manager.analyze().expect("analysis");
    assert_eq!(outcome.result("values"), Some(&json!([1, 2])));
}

#[test]
fn missing_files_fail_the_fetch() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, ids) = populated(&platform, 3);
    let mut recorder = Recorder::new("values");
    recorder.filenames.push("output/extra.csv".to_string());
    let mut manager = manager(
        &platform,
        &experiment,
        AnalyzeOptions {
            max_workers: 1,
            ..options()
        },
    );
    manager.add_analyzer(Box::new(recorder));
    let err = manager.analyze().expect_err("missing");
    assert_eq!(err.kind(), "FileNotFound");
    assert_eq!(err.phase(), Some("fetch"));
    assert_eq!(err.info().context.get("missing").map(String::as_str), Some("output/extra.csv"));
    assert!(ids.iter().any(|id| err.entity() == Some(id.to_string().as_str())));
}

#[test]
fn malformed_files_fail_parsing() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, ids) = populated(&platform, 2);
    platform.put_file(ids[1], RESULTS, "{not json").expect("file");
    let mut manager = manager(&platform, &experiment, options());
    manager.add_analyzer(Box::new(Recorder::new("values")));
    let err = manager.analyze().expect_err("parse");
    assert_eq!(err.kind(), "ParseError");
    assert_eq!(err.phase(), Some("parse"));
    assert_eq!(err.analyzer(), Some("values"));
    assert_eq!(err.entity(), Some(ids[1].to_string().as_str()));
}

#[test]
fn unparsed_analyzers_receive_raw_bytes() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, ids) = populated(&platform, 2);
    platform.put_file(ids[1], RESULTS, "{not json").expect("file");
    let mut recorder = Recorder::new("sizes");
    recorder.parse = false;
    let mut manager = manager(&platform, &experiment, options());
    manager.add_analyzer(Box::new(recorder));
    let outcome = manager.analyze().expect("analysis");
    assert_eq!(outcome.result("sizes"), Some(&json!([12, 9])));
}

#[test]
fn duplicate_uids_get_indexed() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, _) = populated(&platform, 2);
    let mut manager = manager(&platform, &experiment, options());
    manager
        .add_analyzer(Box::new(Recorder::new("recorder")))
        .add_analyzer(Box::new(Recorder::new("recorder")))
        .add_analyzer(Box::new(Recorder::new("other")));
    let outcome = manager.analyze().expect("analysis");
    assert_eq!(manager.analyzer_uids(), vec!["recorder-0", "recorder-1", "other-2"]);
    assert_eq!(
        outcome.results.keys().cloned().collect::<Vec<_>>(),
        vec!["recorder-0", "recorder-1", "other-2"]
    );

    let again = manager.analyze().expect("second analysis");
    assert_eq!(manager.analyzer_uids(), vec!["recorder-0", "recorder-1", "other-2"]);
    assert_eq!(again.results.len(), 3);
}

#[test]
fn working_directories_default_to_the_manager() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, _) = populated(&platform, 1);
    let shared = PathBuf::from("/tmp/analysis");
    let mut own = Recorder::new("own");
    own.working_dir = Some(PathBuf::from("/tmp/own"));
    let mut manager = manager(
        &platform,
        &experiment,
        AnalyzeOptions {
            working_directory: shared.clone(),
            ..options()
        },
    );
    manager
        .add_analyzer(Box::new(own))
        .add_analyzer(Box::new(Recorder::new("default")));
    manager.analyze().expect("analysis");
    assert_eq!(manager.analyzers()[0].working_dir(), Some(Path::new("/tmp/own")));
    assert_eq!(manager.analyzers()[1].working_dir(), Some(shared.as_path()));

    let mut own = Recorder::new("own");
    own.working_dir = Some(PathBuf::from("/tmp/own"));
    let mut forced = self::manager(
        &platform,
        &experiment,
        AnalyzeOptions {
            working_directory: shared.clone(),
            force_manager_working_directory: true,
            ..options()
        },
    );
    forced.add_analyzer(Box::new(own));
    forced.analyze().expect("analysis");
    assert_eq!(forced.analyzers()[0].working_dir(), Some(shared.as_path()));
}

#[test]
fn slow_maps_hit_the_timeout() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, _) = populated(&platform, 6);
    let mut recorder = Recorder::new("slow");
    recorder.map_delay = Some(Duration::from_millis(100));
    let reduces = recorder.reduce_calls.clone();
    let mut manager = manager(
        &platform,
        &experiment,
        AnalyzeOptions {
            max_workers: 1,
            timeout: Duration::from_millis(30),
            progress_interval: Duration::from_millis(5),
            ..options()
        },
    );
    manager.add_analyzer(Box::new(recorder));
    let err = manager.analyze().expect_err("timeout");
    assert_eq!(err.kind(), "AnalyzeTimeout");
    assert_eq!(reduces.load(Ordering::SeqCst), 0);
}

#[test]
fn stuck_maps_are_abandoned_at_the_deadline() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, _) = populated(&platform, 1);
    let mut recorder = Recorder::new("stuck");
    recorder.map_delay = Some(Duration::from_secs(1));
    let reduces = recorder.reduce_calls.clone();
    let lifecycle = recorder.lifecycle.clone();
    let mut manager = manager(
        &platform,
        &experiment,
        AnalyzeOptions {
            max_workers: 1,
            timeout: Duration::from_millis(50),
            progress_interval: Duration::from_millis(5),
            ..options()
        },
    );
    manager.add_analyzer(Box::new(recorder));

    let started = Instant::now();
    let err = manager.analyze().expect_err("timeout");
    assert!(started.elapsed() < Duration::from_millis(500), "took {:?}", started.elapsed());
    assert_eq!(err.kind(), "AnalyzeTimeout");
    assert!(manager.analyzers().is_empty());
    assert_eq!(manager.cache().keys().expect("keys"), vec![EXCEPTION_KEY]);

    let waited = Instant::now();
    while !lifecycle.lock().expect("lock").contains(&"destroy:stuck".to_string()) {
        assert!(waited.elapsed() < Duration::from_secs(5), "abandoned analyzer never destroyed");
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(reduces.load(Ordering::SeqCst), 0);
    assert_eq!(manager.cache().keys().expect("keys"), vec![EXCEPTION_KEY]);
}

#[test]
fn progress_ticks_reach_the_callback() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, _) = populated(&platform, 5);
    let ticks: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = ticks.clone();
    let mut manager = manager(&platform, &experiment, options());
    manager
        .add_analyzer(Box::new(Recorder::new("values")))
        .on_progress(Arc::new(move |progress: &Progress| {
            sink.lock().expect("lock").push(*progress);
        }));
    manager.analyze().expect("analysis");
    let ticks = ticks.lock().expect("lock");
    let last = ticks.last().expect("final tick");
    assert_eq!(last.completed, 5);
    assert_eq!(last.total, 5);
}

#[test]
fn collecting_analyzer_gathers_files_and_tags() {
    let platform = Arc::new(MemoryPlatform::new());
    let (experiment, ids) = populated(&platform, 2);
    platform.put_file(ids[0], "summary.csv", "a, b\n1, 2\n").expect("file");
    platform.put_file(ids[1], "summary.csv", "a, b\n3, 4\n").expect("file");
    let mut manager = manager(&platform, &experiment, options());
    manager.add_analyzer(Box::new(CollectingAnalyzer::new([RESULTS, "summary.csv"])));
    let outcome = manager.analyze().expect("analysis");
    let collected = outcome.result("collect").expect("collected");
    let first = &collected[ids[0].to_string()];
    assert_eq!(first["tags"]["index"], json!("0"));
    assert_eq!(first["files"][RESULTS], json!({"value": 0}));
    assert_eq!(collected[ids[1].to_string()]["files"]["summary.csv"], json!([{"a": "3", "b": "4"}]));
}

#[test]
fn suites_expand_to_their_simulations() {
    let platform = Arc::new(MemoryPlatform::new());
    let mut suite = simflow_model::Suite::new("campaign");
    let mut experiment = Experiment::new("grouped", Task::new(CommandLine::new("model")));
    suite.add_experiment(&mut experiment);
    platform.create_suite(&mut suite).expect("suite");
    let base = experiment.base_simulation();
    for _ in 0..3 {
        experiment.add_simulation(base.derive()).expect("add");
    }
    platform.create_experiment(&mut experiment).expect("experiment");
    platform
        .create_simulations(experiment.simulations_mut())
        .expect("simulations");
    platform.run_simulations(&experiment).expect("run");
    for simulation in experiment.simulations() {
        platform
            .put_file(simulation.uid(), RESULTS, "{\"value\": 1}")
            .expect("file");
    }
    let mut manager = AnalyzeManager::new(platform.clone(), options());
    manager
        .add_item(suite.uid(), ItemType::Suite)
        .add_item(experiment.uid(), ItemType::Experiment)
        .add_analyzer(Box::new(Recorder::new("values")));
    let outcome = manager.analyze().expect("analysis");
    assert_eq!(outcome.analyzed, 3);
    assert_eq!(outcome.result("values"), Some(&json!([1, 1, 1])));
}
