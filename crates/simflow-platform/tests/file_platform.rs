use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use simflow_assets::Asset;
use simflow_core::ids::ItemType;
use simflow_core::status::EntityStatus;
use simflow_model::{CommandLine, Experiment, Simulation, Suite, Task, IMPLICIT_SUITE_NAME};
use simflow_platform::runner::{parse_job_status, JOB_STATUS_FILE};
use simflow_platform::{FilePlatform, FilePlatformOptions, Item, Platform, COMMON_ASSETS_DIR, METADATA_FILENAME};

fn options() -> FilePlatformOptions {
    FilePlatformOptions {
        sym_link: true,
        name_directory: true,
        sim_name_directory: false,
        max_path_length: None,
        max_running_jobs: 2,
    }
}

fn experiment_with(command: CommandLine, count: usize) -> Experiment {
    let mut experiment = Experiment::new("demo run", Task::new(command));
    experiment
        .common_assets
        .add(Asset::from_content("shared.txt", b"shared".to_vec()), true)
        .expect("common asset");
    experiment.pre_creation().expect("pre-creation");
    let base = experiment.base_simulation();
    for index in 0..count {
        let mut simulation = base.derive();
        simulation.task.set_parameter("index", json!(index));
        simulation
            .assets
            .add(Asset::from_content("input.txt", format!("{index}").into_bytes()), true)
            .expect("transient asset");
        experiment.add_simulation(simulation).expect("add simulation");
    }
    experiment
}

fn create_all(platform: &FilePlatform, experiment: &mut Experiment) {
    platform.create_experiment(experiment).expect("create experiment");
    platform
        .create_simulations(experiment.simulations_mut())
        .expect("create simulations");
}

fn wait_until_done(platform: &FilePlatform, experiment: &mut Experiment) -> EntityStatus {
    let deadline = Instant::now() + Duration::from_secs(30);
    let mut item = Item::Experiment(experiment.clone());
    loop {
        let status = platform.refresh_status(&mut item).expect("refresh");
        if status.is_terminal() || Instant::now() > deadline {
            *experiment = item.into_experiment().expect("experiment");
            return status;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn experiments_without_suite_get_an_implicit_one() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let platform = FilePlatform::new(dir.path(), options()).expect("platform");
    let mut experiment = experiment_with(CommandLine::new("true"), 3);
    create_all(&platform, &mut experiment);

    let suite_id = experiment.meta.parent_id.expect("implicit suite");
    let suite = platform
        .get_item(suite_id, ItemType::Suite, false)
        .expect("suite")
        .into_suite()
        .expect("suite type");
    assert_eq!(suite.meta.name, IMPLICIT_SUITE_NAME);
    assert_eq!(suite.experiment_ids(), &[experiment.uid()]);

    let suite_dir = platform.get_directory_by_id(suite_id, ItemType::Suite).expect("suite dir");
    assert_eq!(
        suite_dir.file_name().and_then(|name| name.to_str()),
        Some(format!("s_Suite_{suite_id}").as_str())
    );
    let experiment_dir = platform.get_directory(&Item::Experiment(experiment.clone())).expect("dir");
    assert_eq!(experiment_dir.parent(), Some(suite_dir.as_path()));
    assert_eq!(
        experiment_dir.file_name().and_then(|name| name.to_str()),
        Some(format!("e_demo_run_{}", experiment.uid()).as_str())
    );
    assert!(experiment_dir.join(METADATA_FILENAME).is_file());
    assert_eq!(
        std::fs::read(experiment_dir.join(COMMON_ASSETS_DIR).join("shared.txt")).expect("shared"),
        b"shared"
    );

    for simulation in experiment.simulations() {
        let sim_dir = platform
            .get_directory_by_id(simulation.uid(), ItemType::Simulation)
            .expect("sim dir");
        assert_eq!(sim_dir.parent(), Some(experiment_dir.as_path()));
        assert_eq!(sim_dir.file_name().and_then(|n| n.to_str()), Some(simulation.uid().to_string().as_str()));
        assert!(sim_dir.join(METADATA_FILENAME).is_file());
        assert!(sim_dir.join("input.txt").is_file());
        assert_eq!(
            std::fs::read(sim_dir.join(COMMON_ASSETS_DIR).join("shared.txt")).expect("linked"),
            b"shared"
        );
        assert!(!sim_dir.join(JOB_STATUS_FILE).exists());
        assert_eq!(
            platform.simulation_status(simulation.uid()).expect("status"),
            EntityStatus::Created
        );
    }
}

#[test]
fn creation_is_idempotent() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let platform = FilePlatform::new(dir.path(), options()).expect("platform");
    let mut suite = Suite::new("grouped");
    let mut experiment = experiment_with(CommandLine::new("true"), 1);
    suite.add_experiment(&mut experiment);
    let first = platform.create_suite(&mut suite).expect("suite");
    assert_eq!(platform.create_suite(&mut suite).expect("suite again"), first);

    create_all(&platform, &mut experiment);
    let again = platform.create_experiment(&mut experiment).expect("again");
    assert_eq!(again, experiment.uid());
    let mut item = Item::Simulation(experiment.simulations()[0].clone());
    assert_eq!(platform.create(&mut item).expect("create sim again"), item.uid());
    assert_eq!(
        platform
            .get_children(&Item::Experiment(experiment.clone()))
            .expect("children")
            .len(),
        1
    );
}

#[test]
fn children_and_flattening_come_from_disk() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut experiment = experiment_with(CommandLine::new("true"), 4);
    {
        let platform = FilePlatform::new(dir.path(), options()).expect("platform");
        create_all(&platform, &mut experiment);
    }
    let reopened = FilePlatform::new(dir.path(), options()).expect("reopen");
    let suite_id = experiment.meta.parent_id.expect("suite");
    let suite = reopened.get_item(suite_id, ItemType::Suite, true).expect("suite");
    let leaves = reopened.flatten_item(&suite).expect("flatten suite");
    assert_eq!(leaves.len(), 4);
    let mut expected: Vec<_> = experiment.simulations().iter().map(Simulation::uid).collect();
    let mut found: Vec<_> = leaves.iter().map(Simulation::uid).collect();
    expected.sort();
    found.sort();
    assert_eq!(found, expected);
    assert!(leaves
        .iter()
        .all(|sim| sim.task.parameter("index").is_some() && sim.experiment_id() == Some(experiment.uid())));

    let parent = reopened
        .get_parent(&Item::Simulation(leaves[0].clone()))
        .expect("parent")
        .expect("has parent");
    assert_eq!(parent.uid(), experiment.uid());
}

#[test]
fn missing_files_are_all_named() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let platform = FilePlatform::new(dir.path(), options()).expect("platform");
    let mut experiment = experiment_with(CommandLine::new("true"), 1);
    create_all(&platform, &mut experiment);
    let simulation = &experiment.simulations()[0];

    let files = platform
        .get_files(simulation, &["input.txt".to_string()])
        .expect("existing file");
    assert_eq!(files["input.txt"], b"0");

    let err = platform
        .get_files(
            simulation,
            &["input.txt".to_string(), "output/a.json".to_string(), "b.csv".to_string()],
        )
        .expect_err("missing");
    assert_eq!(err.kind(), "FileNotFound");
    assert_eq!(
        err.info().context.get("missing").map(String::as_str),
        Some("output/a.json,b.csv")
    );
}

#[test]
fn output_names_cannot_leave_the_simulation_directory() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let platform = FilePlatform::new(dir.path().join("jobs"), options()).expect("platform");
    let mut experiment = experiment_with(CommandLine::new("true"), 1);
    create_all(&platform, &mut experiment);
    let simulation = &experiment.simulations()[0];
    let secret = dir.path().join("secret.txt");
    std::fs::write(&secret, "outside").expect("secret");

    for name in [
        "../secret.txt".to_string(),
        "output/../../../../secret.txt".to_string(),
        secret.display().to_string(),
        String::new(),
    ] {
        let err = platform
            .get_files(simulation, &[name.clone()])
            .expect_err("escaping name");
        assert_eq!(err.kind(), "Validation", "{name}");
        assert_eq!(err.info().context.get("filename"), Some(&name));
    }
    assert!(platform
        .get_files(simulation, &["./input.txt".to_string()])
        .is_ok());
}

#[test]
fn job_status_codes_map_to_statuses() {
    assert_eq!(parse_job_status(None), EntityStatus::Created);
    assert_eq!(parse_job_status(Some("0\n")), EntityStatus::Succeeded);
    assert_eq!(parse_job_status(Some("-1")), EntityStatus::Failed);
    assert_eq!(parse_job_status(Some("100")), EntityStatus::Running);
    assert_eq!(parse_job_status(Some("garbled")), EntityStatus::Running);
}

#[cfg(unix)]
#[test]
fn local_jobs_run_and_report_through_status_files() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let platform = FilePlatform::new(dir.path(), options()).expect("platform");
    let command = CommandLine::new("sh")
        .arg("-c")
        .arg("mkdir -p output && echo '{\"index\": {index}}' > output/result.json");
    let mut experiment = experiment_with(command, 3);
    create_all(&platform, &mut experiment);
    platform.run_simulations(&experiment).expect("run");

    let status = wait_until_done(&platform, &mut experiment);
    platform.cleanup().expect("cleanup");
    assert_eq!(status, EntityStatus::Succeeded);
    for simulation in experiment.simulations() {
        assert_eq!(simulation.status(), EntityStatus::Succeeded);
        let files = platform
            .get_files(simulation, &["output/result.json".to_string(), "stdout.txt".to_string()])
            .expect("outputs");
        let parsed: serde_json::Value =
            serde_json::from_slice(&files["output/result.json"]).expect("json output");
        assert_eq!(Some(&parsed["index"]), simulation.task.parameter("index"));
    }
}

#[cfg(unix)]
#[test]
fn failing_jobs_are_reported_and_stay_failed() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let platform = FilePlatform::new(dir.path(), options()).expect("platform");
    let mut experiment = experiment_with(CommandLine::new("sh").arg("-c").arg("exit 3"), 2);
    create_all(&platform, &mut experiment);
    platform.run_simulations(&experiment).expect("run");
    let status = wait_until_done(&platform, &mut experiment);
    platform.cleanup().expect("cleanup");
    assert_eq!(status, EntityStatus::Failed);

    let simulation = experiment.simulations()[0].clone();
    let sim_dir = platform
        .get_directory_by_id(simulation.uid(), ItemType::Simulation)
        .expect("dir");
    std::fs::write(sim_dir.join(JOB_STATUS_FILE), "0").expect("overwrite status");
    let mut item = Item::Simulation(simulation);
    assert_eq!(platform.refresh_status(&mut item).expect("refresh"), EntityStatus::Failed);
}

#[test]
fn records_are_persisted_with_final_status() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let platform = FilePlatform::new(dir.path(), options()).expect("platform");
    let mut experiment = experiment_with(CommandLine::new("true"), 1);
    create_all(&platform, &mut experiment);
    let created_at = platform
        .metadata()
        .load(&platform.get_directory(&Item::Experiment(experiment.clone())).expect("dir"))
        .expect("record")
        .created_at;
    assert!(created_at.is_some());

    experiment.simulations_mut()[0].meta.set_status(EntityStatus::Succeeded);
    experiment.refresh_aggregate_status();
    platform
        .persist_record(&Item::Experiment(experiment.clone()))
        .expect("persist");
    let record = platform
        .metadata()
        .load(&platform.get_directory(&Item::Experiment(experiment.clone())).expect("dir"))
        .expect("record");
    assert_eq!(record.status, EntityStatus::Succeeded);
    assert_eq!(record.created_at, created_at);
    assert_eq!(record.simulations, Some(vec![experiment.simulations()[0].uid()]));
}
