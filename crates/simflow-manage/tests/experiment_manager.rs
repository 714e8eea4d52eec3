use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use simflow_assets::Asset;
use simflow_core::config::FlowConfig;
use simflow_core::ids::ItemType;
use simflow_core::status::EntityStatus;
use simflow_model::{CommandLine, Experiment, SimulationBuilder, Suite, Task};
use simflow_manage::{ExperimentManager, ManagerOptions, PollPolicy};
use simflow_platform::{Capabilities, MemoryPlatform, Platform, RetryPolicy};
use simflow_sweep::SimpleBuilder;

fn fast_options() -> ManagerOptions {
    ManagerOptions {
        batch_size: 2,
        max_workers: 4,
        fail_fast: false,
        retry: RetryPolicy::immediate(3),
        poll: PollPolicy {
            initial: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        },
    }
}

fn swept(name: &str, task: Task, values: usize) -> Experiment {
    let mut builder = SimpleBuilder::new();
    builder.add_parameter("a", (0..values).map(|value| json!(value)));
    let builder: Arc<dyn SimulationBuilder> = Arc::new(builder);
    Experiment::from_builder(name, task, builder)
}

fn task() -> Task {
    Task::new(CommandLine::new("model").option("--a", "{a}"))
}

#[test]
fn shared_content_is_written_once_for_fifty_simulations() {
    let platform = Arc::new(MemoryPlatform::new());
    let mut base = task();
    let payload = vec![42u8; 2 * 1024 * 1024];
    let asset = Asset::from_content("weights.bin", payload);
    let checksum = asset.checksum().expect("checksum");
    base.transient_assets.add(asset, true).expect("asset");

    let experiment = swept("dedup", base, 50);
    let options = ManagerOptions {
        batch_size: 10,
        max_workers: 8,
        ..fast_options()
    };
    let mut manager = ExperimentManager::new(experiment, platform.clone(), options);
    let report = manager.run(true).expect("run");

    assert_eq!(report.expected, 50);
    assert_eq!(report.created, 50);
    assert_eq!(report.unique_assets, 1);
    assert_eq!(platform.asset_writes(&checksum).expect("writes"), 1);
    assert_eq!(platform.total_asset_writes().expect("total"), 1);
    assert_eq!(manager.ledger().uploads(), 1);
    for simulation in manager.experiment().simulations() {
        let stored = simulation.assets.iter().next().expect("asset");
        assert_eq!(stored.platform_id(), Some(checksum.as_str()));
    }
    assert!(report.success());
}

#[test]
fn provisioned_assets_are_persisted_and_frozen() {
    let platform = Arc::new(MemoryPlatform::new());
    let mut experiment = swept("frozen", task().with_config_file("config.json"), 2);
    experiment
        .common_assets
        .add(Asset::from_content("shared.txt", b"shared".to_vec()), true)
        .expect("common asset");
    let mut manager = ExperimentManager::new(experiment, platform.clone(), fast_options());
    manager.run(true).expect("run");

    let experiment = manager.experiment();
    assert!(experiment.common_assets.is_frozen());
    let mut provisioned: Vec<Asset> = experiment.common_assets.iter().cloned().collect();
    for simulation in experiment.simulations() {
        assert!(simulation.assets.is_frozen());
        provisioned.extend(simulation.assets.iter().cloned());
    }
    assert!(provisioned.len() >= 3);
    for mut asset in provisioned {
        assert!(asset.is_persisted(), "{} not persisted", asset.short_remote_path());
        assert!(asset.platform_id().is_some());
        let err = asset.set_content(b"rewritten".to_vec()).expect_err("frozen content");
        assert_eq!(err.kind(), "Frozen");
    }
}

#[test]
fn simulations_are_realized_in_order_and_succeed() {
    let platform = Arc::new(MemoryPlatform::new());
    let mut manager = ExperimentManager::new(swept("order", task(), 5), platform.clone(), fast_options());
    let report = manager.run(true).expect("run");

    let experiment = manager.experiment();
    let values: Vec<_> = experiment
        .simulations()
        .iter()
        .map(|simulation| simulation.task.parameter("a").cloned().expect("parameter"))
        .collect();
    assert_eq!(values, (0..5).map(|value| json!(value)).collect::<Vec<_>>());
    assert_eq!(
        platform.simulation_ids(experiment.uid()).expect("ids"),
        experiment.simulations().iter().map(|sim| sim.uid()).collect::<Vec<_>>()
    );
    assert_eq!(experiment.simulations()[3].meta.tags.get("a").map(String::as_str), Some("3"));
    assert_eq!(experiment.simulations()[3].meta.tags.get("type").map(String::as_str), Some("simulation"));
    assert_eq!(report.status, EntityStatus::Succeeded);
    assert_eq!(report.status_counts.get(&EntityStatus::Succeeded), Some(&5));
}

#[test]
fn rejected_batches_are_reported_and_others_continue() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.reject_tagged("a", "2").expect("reject");
    let mut manager = ExperimentManager::new(swept("continue", task(), 6), platform.clone(), fast_options());
    let report = manager.run(true).expect("run");

    assert_eq!(report.created, 4);
    assert_eq!(report.failed_batches.len(), 1);
    let failure = &report.failed_batches[0];
    assert_eq!(failure.batch, 1);
    assert_eq!(failure.simulations.len(), 2);
    assert_eq!(failure.error.kind(), "CreationFailure");
    assert_eq!(failure.error.phase(), Some("creation"));
    assert_eq!(report.status_counts.get(&EntityStatus::Failed), Some(&2));
    assert_eq!(report.status_counts.get(&EntityStatus::Succeeded), Some(&4));
    assert_eq!(report.status, EntityStatus::Succeeded);
    assert!(!report.success());
    assert_eq!(manager.experiment().simulations().len(), 6);
}

#[test]
fn fail_fast_stops_at_the_first_rejected_batch() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.reject_tagged("a", "2").expect("reject");
    let options = ManagerOptions {
        fail_fast: true,
        ..fast_options()
    };
    let mut manager = ExperimentManager::new(swept("fast", task(), 6), platform.clone(), options);
    let err = manager.run(true).expect_err("fail fast");

    assert_eq!(err.kind(), "CreationFailure");
    assert_eq!(err.phase(), Some("creation"));
    assert_eq!(err.info().context.get("batch").map(String::as_str), Some("1"));
    let uid = manager.experiment().uid();
    assert_eq!(err.entity(), Some(uid.to_string().as_str()));
    assert_eq!(platform.simulation_ids(uid).expect("ids").len(), 2);
}

#[test]
fn polling_times_out_with_the_status_distribution() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.set_default_outcome(EntityStatus::Running).expect("outcome");
    let options = ManagerOptions {
        poll: PollPolicy {
            initial: Duration::from_millis(2),
            cap: Duration::from_millis(4),
            timeout: Duration::from_millis(30),
        },
        ..fast_options()
    };
    let mut manager = ExperimentManager::new(swept("slow", task(), 3), platform, options);
    let report = manager.run(false).expect("submit");
    assert_eq!(report.created, 3);

    let err = manager.wait_till_done().expect_err("timeout");
    assert_eq!(err.kind(), "PollTimeout");
    assert_eq!(err.phase(), Some("polling"));
    assert_eq!(
        err.info().context.get("distribution").map(String::as_str),
        Some("running=3")
    );
    assert_eq!(manager.report().status, EntityStatus::Running);
}

#[test]
fn aggregate_status_reflects_outcomes() {
    let platform = Arc::new(MemoryPlatform::new());
    let mut experiment = Experiment::new("mixed", task());
    let base = experiment.base_simulation();
    let simulations: Vec<_> = (0..3).map(|_| base.derive()).collect();
    let failing = simulations[1].uid();
    for simulation in simulations {
        experiment.add_simulation(simulation).expect("add");
    }
    platform.script_status(failing, EntityStatus::Failed).expect("script");
    let mut manager = ExperimentManager::new(experiment, platform.clone(), fast_options());
    let report = manager.run(true).expect("run");
    assert_eq!(report.status, EntityStatus::Succeeded);
    assert_eq!(report.status_counts.get(&EntityStatus::Failed), Some(&1));
    assert!(!report.success());

    let all_failed = Arc::new(MemoryPlatform::new());
    all_failed.set_default_outcome(EntityStatus::Failed).expect("outcome");
    let mut manager = ExperimentManager::new(swept("doomed", task(), 4), all_failed, fast_options());
    let report = manager.run(true).expect("run");
    assert_eq!(report.status, EntityStatus::Failed);
    assert_eq!(report.distribution(), "failed=4");
}

#[test]
fn constraint_violations_fail_before_any_creation() {
    let platform = Arc::new(MemoryPlatform::with_capabilities(Capabilities {
        max_name_length: Some(4),
        ..Capabilities::default()
    }));
    let mut manager =
        ExperimentManager::new(swept("far too long", task(), 2), platform.clone(), fast_options());
    let err = manager.run(true).expect_err("violation");
    assert_eq!(err.kind(), "Validation");
    assert_eq!(err.info().code, "platform_constraints");
    assert_eq!(err.phase(), Some("creation"));
    let uid = manager.experiment().uid();
    assert!(platform.get_item(uid, ItemType::Experiment, false).is_err());
}

#[test]
fn transient_outages_are_retried() {
    let platform = Arc::new(MemoryPlatform::new());
    platform.inject_outages(2).expect("outages");
    let mut manager = ExperimentManager::new(swept("flaky", task(), 3), platform, fast_options());
    let report = manager.run(true).expect("run");
    assert_eq!(report.created, 3);
    assert!(report.success());
}

#[test]
fn backend_batch_ceiling_bounds_batches() {
    let platform = Arc::new(MemoryPlatform::with_capabilities(Capabilities {
        max_batch_size: Some(1),
        ..Capabilities::default()
    }));
    platform.reject_tagged("a", "1").expect("reject");
    let options = ManagerOptions {
        batch_size: 10,
        ..fast_options()
    };
    let mut manager = ExperimentManager::new(swept("single", task(), 3), platform, options);
    let report = manager.run(true).expect("run");
    assert_eq!(report.created, 2);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].batch, 1);
}

#[test]
fn suites_are_created_and_linked() {
    let platform = Arc::new(MemoryPlatform::new());
    let manager = ExperimentManager::new(swept("grouped", task(), 2), platform.clone(), fast_options());
    let mut manager = manager.with_suite(Suite::new("campaign"));
    manager.run(true).expect("run");
    let suite = manager.suite().expect("suite");
    assert_eq!(manager.experiment().meta.parent_id, Some(suite.uid()));
    assert_eq!(suite.meta.status(), EntityStatus::Succeeded);
    let stored = platform
        .get_item(suite.uid(), ItemType::Suite, false)
        .expect("stored suite");
    let leaves = platform.flatten_item(&stored).expect("leaves");
    assert_eq!(leaves.len(), 2);
}

#[test]
fn empty_sweeps_create_an_empty_experiment() {
    let platform = Arc::new(MemoryPlatform::new());
    let builder: Arc<dyn SimulationBuilder> = Arc::new(SimpleBuilder::new());
    let experiment = Experiment::from_builder("empty", task(), builder);
    let mut manager = ExperimentManager::new(experiment, platform, fast_options());
    let report = manager.run(true).expect("run");
    assert_eq!(report.expected, 0);
    assert_eq!(report.created, 0);
    assert!(manager.experiment().simulations().is_empty());
    assert!(!report.success());
}

#[test]
fn options_follow_configuration() {
    let config = FlowConfig {
        batch_size: 25,
        max_workers: 3,
        fail_fast: true,
        max_retries: 5,
        poll_initial_secs: 2.0,
        poll_cap_secs: 8.0,
        ..FlowConfig::default()
    };
    let options = ManagerOptions::from(&config);
    assert_eq!(options.batch_size, 25);
    assert_eq!(options.max_workers, 3);
    assert!(options.fail_fast);
    assert_eq!(options.retry.max_attempts, 5);
    assert_eq!(options.poll.initial, Duration::from_secs(2));
    assert_eq!(options.poll.next_delay(Duration::from_secs(2)), Duration::from_secs(4));
    assert_eq!(options.poll.next_delay(Duration::from_secs(6)), Duration::from_secs(8));
}
