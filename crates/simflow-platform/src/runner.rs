//! Local process runner behind the filesystem platform.
//!
//! Each job runs its command inside the simulation directory and reports
//! progress through `job_status.txt`: `100` while running, `0` on success and
//! `-1` on failure. A missing file means the job was never started.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use rayon::prelude::*;
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::ids::ItemId;
use simflow_core::status::EntityStatus;
use tracing::{debug, error, warn};

/// Status file written by the runner.
pub const JOB_STATUS_FILE: &str = "job_status.txt";
/// Process id of the running command.
pub const JOB_ID_FILE: &str = "job_id.txt";
/// Captured standard output.
pub const STDOUT_FILE: &str = "stdout.txt";
/// Captured standard error.
pub const STDERR_FILE: &str = "stderr.txt";

const STATUS_RUNNING: &str = "100";
const STATUS_SUCCEEDED: &str = "0";
const STATUS_FAILED: &str = "-1";

/// Maps the content of `job_status.txt` to a status. Unknown codes read as running.
pub fn parse_job_status(content: Option<&str>) -> EntityStatus {
    match content.map(str::trim) {
        None => EntityStatus::Created,
        Some(STATUS_SUCCEEDED) => EntityStatus::Succeeded,
        Some(STATUS_FAILED) => EntityStatus::Failed,
        Some(_) => EntityStatus::Running,
    }
}

/// Reads the status of the job living in `dir`.
pub fn read_job_status(dir: &Path) -> Result<EntityStatus, FlowError> {
    let path = dir.join(JOB_STATUS_FILE);
    if !path.exists() {
        return Ok(EntityStatus::Created);
    }
    let content = fs::read_to_string(&path).map_err(|err| {
        FlowError::io("job_status_read", err).with_context("path", path.display().to_string())
    })?;
    Ok(parse_job_status(Some(&content)))
}

/// One command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerJob {
    /// Simulation the job belongs to.
    pub simulation: ItemId,
    /// Working directory.
    pub directory: PathBuf,
    /// Executable followed by its arguments.
    pub argv: Vec<String>,
}

/// Runs jobs in the background with at most `max_jobs` processes at once.
#[derive(Debug)]
pub struct LocalRunner {
    max_jobs: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalRunner {
    /// Runner bounded to `max_jobs` concurrent processes.
    pub fn new(max_jobs: usize) -> Self {
        Self {
            max_jobs: max_jobs.max(1),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Starts `jobs` in the background and returns immediately.
    pub fn submit(&self, jobs: Vec<RunnerJob>) -> Result<(), FlowError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_jobs)
            .build()
            .map_err(|err| FlowError::io("runner_pool", err))?;
        debug!(jobs = jobs.len(), max_jobs = self.max_jobs, "submitting local jobs");
        let handle = thread::Builder::new()
            .name("simflow-runner".to_string())
            .spawn(move || {
                pool.install(|| jobs.par_iter().for_each(run_job));
            })
            .map_err(|err| FlowError::io("runner_spawn", err))?;
        self.lock_handles()?.push(handle);
        Ok(())
    }

    /// Blocks until every submitted job finished.
    pub fn wait(&self) -> Result<(), FlowError> {
        let handles: Vec<JoinHandle<()>> = self.lock_handles()?.drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("runner thread panicked");
            }
        }
        Ok(())
    }

    fn lock_handles(&self) -> Result<std::sync::MutexGuard<'_, Vec<JoinHandle<()>>>, FlowError> {
        self.handles.lock().map_err(|_| {
            FlowError::Io(ErrorInfo::new("runner_lock", "runner handle list poisoned"))
        })
    }
}

fn run_job(job: &RunnerJob) {
    let outcome = execute(job);
    let code = match &outcome {
        Ok(true) => STATUS_SUCCEEDED,
        Ok(false) => STATUS_FAILED,
        Err(err) => {
            error!(simulation = %job.simulation, error = %err, "local job failed to start");
            STATUS_FAILED
        }
    };
    if let Err(err) = write_status(&job.directory, code) {
        error!(simulation = %job.simulation, error = %err, "could not record job status");
    }
}

fn execute(job: &RunnerJob) -> Result<bool, FlowError> {
    let (program, args) = job.argv.split_first().ok_or_else(|| {
        FlowError::Validation(
            ErrorInfo::new("empty_command", "simulation has no command to run")
                .with_context("entity", job.simulation.to_string()),
        )
    })?;
    write_status(&job.directory, STATUS_RUNNING)?;
    let stdout = create_log(&job.directory.join(STDOUT_FILE))?;
    let stderr = create_log(&job.directory.join(STDERR_FILE))?;
    let mut child = Command::new(program)
        .args(args)
        .current_dir(&job.directory)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .map_err(|err| FlowError::io("job_spawn", err).with_context("program", program.clone()))?;
    fs::write(job.directory.join(JOB_ID_FILE), child.id().to_string())
        .map_err(|err| FlowError::io("job_id_write", err))?;
    let status = child.wait().map_err(|err| FlowError::io("job_wait", err))?;
    debug!(simulation = %job.simulation, success = status.success(), "local job finished");
    Ok(status.success())
}

fn create_log(path: &Path) -> Result<File, FlowError> {
    File::create(path).map_err(|err| {
        FlowError::io("job_log_create", err).with_context("path", path.display().to_string())
    })
}

fn write_status(dir: &Path, code: &str) -> Result<(), FlowError> {
    let staging = dir.join(format!("{JOB_STATUS_FILE}.tmp"));
    fs::write(&staging, code).map_err(|err| FlowError::io("job_status_write", err))?;
    fs::rename(&staging, dir.join(JOB_STATUS_FILE)).map_err(|err| FlowError::io("job_status_write", err))
}
