//! Drives one experiment from its in-memory description to a terminal status.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPool;
use simflow_assets::AssetCollection;
use simflow_core::errors::{ErrorInfo, FlowError, Phase};
use simflow_core::ids::ItemId;
use simflow_core::status::EntityStatus;
use simflow_model::{Experiment, Simulation, Suite};
use simflow_platform::{violations_error, with_retries, Item, Platform, RetryPolicy};
use tracing::{debug, error, info, warn};

use crate::ledger::AssetLedger;
use crate::options::ManagerOptions;
use crate::report::{render_distribution, BatchFailure, ExperimentReport};

/// Owns an experiment for the duration of a run against one platform.
#[derive(Debug)]
pub struct ExperimentManager {
    platform: Arc<dyn Platform>,
    experiment: Experiment,
    suite: Option<Suite>,
    options: ManagerOptions,
    ledger: AssetLedger,
    report: ExperimentReport,
}

impl ExperimentManager {
    /// Manager for `experiment` on `platform`.
    pub fn new(experiment: Experiment, platform: Arc<dyn Platform>, options: ManagerOptions) -> Self {
        let report = ExperimentReport::new(experiment.uid());
        Self {
            platform,
            experiment,
            suite: None,
            options,
            ledger: AssetLedger::new(),
            report,
        }
    }

    /// Places the experiment in `suite`, which is created before it.
    pub fn with_suite(mut self, mut suite: Suite) -> Self {
        suite.add_experiment(&mut self.experiment);
        self.suite = Some(suite);
        self
    }

    /// The managed experiment.
    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    /// The suite, when one was attached.
    pub fn suite(&self) -> Option<&Suite> {
        self.suite.as_ref()
    }

    /// Gives the experiment back.
    pub fn into_experiment(self) -> Experiment {
        self.experiment
    }

    /// Latest report.
    pub fn report(&self) -> &ExperimentReport {
        &self.report
    }

    /// Content provisioned so far.
    pub fn ledger(&self) -> &AssetLedger {
        &self.ledger
    }

    /// Pre-creates, provisions, realizes and submits the experiment.
    ///
    /// With `wait` the call also polls until every simulation is terminal
    /// and persists the final records.
    pub fn run(&mut self, wait: bool) -> Result<ExperimentReport, FlowError> {
        let pool = build_pool(self.options.max_workers)?;
        let started = Instant::now();
        self.report.expected = self.experiment.expected_count();
        info!(
            experiment = %self.experiment.uid(),
            expected = self.report.expected,
            batch_size = self.options.batch_size,
            "starting experiment"
        );
        self.pre_create()?;
        self.provision_common(&pool)?;
        self.submit(&pool)?;
        info!(
            experiment = %self.experiment.uid(),
            created = self.report.created,
            failed_batches = self.report.failed_batches.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "experiment submitted"
        );
        if wait {
            self.poll(&pool)?;
            self.finalize()?;
        }
        Ok(self.report.clone())
    }

    /// Polls until every simulation is terminal, then persists the final records.
    pub fn wait_till_done(&mut self) -> Result<ExperimentReport, FlowError> {
        let pool = build_pool(self.options.max_workers)?;
        self.poll(&pool)?;
        self.finalize()?;
        Ok(self.report.clone())
    }

    fn pre_create(&mut self) -> Result<(), FlowError> {
        let uid = self.experiment.uid();
        self.experiment
            .pre_creation()
            .map_err(|err| err.with_phase(Phase::Creation).with_entity(uid))?;
        let mut violations = self.platform.validate(&Item::Experiment(self.experiment.clone()));
        if let Some(suite) = &self.suite {
            violations.extend(self.platform.validate(&Item::Suite(suite.clone())));
        }
        if !violations.is_empty() {
            let err = violations_error(&violations).with_phase(Phase::Creation).with_entity(uid);
            error!(experiment = %uid, error = %err, "experiment rejected by platform constraints");
            return Err(err);
        }
        Ok(())
    }

    fn provision_common(&mut self, pool: &ThreadPool) -> Result<(), FlowError> {
        let uid = self.experiment.uid();
        provision_collection(
            pool,
            self.platform.as_ref(),
            &self.ledger,
            &self.options.retry,
            &mut self.experiment.common_assets,
        )
        .map_err(|err| err.with_entity(uid))?;
        debug!(experiment = %uid, unique_assets = self.ledger.len(), "common assets provisioned");
        self.report.unique_assets = self.ledger.len();
        Ok(())
    }

    fn submit(&mut self, pool: &ThreadPool) -> Result<(), FlowError> {
        let uid = self.experiment.uid();
        let platform = self.platform.as_ref();
        let retry = self.options.retry;
        if let Some(suite) = self.suite.as_mut() {
            with_retries(&retry, "create_suite", |_| platform.create_suite(suite))
                .map_err(|err| err.with_phase(Phase::Creation).with_entity(suite.uid()))?;
        }
        let experiment = &mut self.experiment;
        with_retries(&retry, "create_experiment", |_| platform.create_experiment(experiment))
            .map_err(|err| err.with_phase(Phase::Creation).with_entity(uid))?;

        let batches = BatchCreator {
            platform,
            ledger: &self.ledger,
            retry,
            fail_fast: self.options.fail_fast,
            pool,
            experiment: uid,
        };
        let batch_size = platform
            .capabilities()
            .effective_batch_size(self.options.batch_size);
        let report = &mut self.report;
        match self.experiment.builder().cloned() {
            Some(builder) => {
                let base = self.experiment.base_simulation();
                let mut stream = builder.simulations(&base);
                for index in 0.. {
                    let mut batch = Vec::with_capacity(batch_size);
                    for realized in stream.by_ref().take(batch_size) {
                        batch.push(realized.map_err(|err| {
                            err.with_phase(Phase::Realization).with_entity(uid)
                        })?);
                    }
                    if batch.is_empty() {
                        break;
                    }
                    batches.create(index, &mut batch, report)?;
                    self.experiment.adopt_realized(batch);
                }
            }
            None => {
                let simulations = self.experiment.simulations_mut();
                for (index, batch) in simulations.chunks_mut(batch_size).enumerate() {
                    batches.create(index, batch, report)?;
                }
            }
        }
        self.report.unique_assets = self.ledger.len();

        let experiment = &self.experiment;
        with_retries(&retry, "run_simulations", |_| platform.run_simulations(experiment))
            .map_err(|err| err.with_phase(Phase::Creation).with_entity(uid))?;
        self.refresh_report();
        Ok(())
    }

    fn poll(&mut self, pool: &ThreadPool) -> Result<(), FlowError> {
        let uid = self.experiment.uid();
        let policy = self.options.poll;
        let deadline = Instant::now() + policy.timeout;
        let mut delay = policy.initial;
        loop {
            self.refresh_simulations(pool)?;
            let status = self.refresh_report();
            debug!(
                experiment = %uid,
                status = %status,
                distribution = %self.report.distribution(),
                "polled experiment"
            );
            if self.experiment.done() {
                info!(experiment = %uid, status = %status, "experiment finished");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                let err = FlowError::PollTimeout(
                    ErrorInfo::new("poll_timeout", "simulations did not finish before the polling deadline")
                        .with_context("distribution", render_distribution(&self.report.status_counts))
                        .with_context("timeout_secs", format!("{:.3}", policy.timeout.as_secs_f64())),
                )
                .with_phase(Phase::Polling)
                .with_entity(uid);
                error!(experiment = %uid, error = %err, "polling timed out");
                return Err(err);
            }
            thread::sleep(delay.min(deadline - now));
            delay = policy.next_delay(delay);
        }
    }

    fn refresh_simulations(&mut self, pool: &ThreadPool) -> Result<(), FlowError> {
        let platform = self.platform.as_ref();
        let retry = self.options.retry;
        let simulations = self.experiment.simulations_mut();
        pool.install(|| {
            simulations
                .par_iter_mut()
                .filter(|simulation| !simulation.status().is_terminal())
                .try_for_each(|simulation| {
                    let id = simulation.uid();
                    let observed =
                        with_retries(&retry, "simulation_status", |_| platform.simulation_status(id))
                            .map_err(|err| err.with_phase(Phase::Polling).with_entity(id))?;
                    simulation.meta.set_status(observed);
                    Ok(())
                })
        })
    }

    fn refresh_report(&mut self) -> EntityStatus {
        let status = self.experiment.refresh_aggregate_status();
        self.report.status = status;
        self.report.status_counts = self.experiment.status_counts();
        status
    }

    fn finalize(&mut self) -> Result<(), FlowError> {
        if let Some(suite) = self.suite.as_mut() {
            if let Some(status) = EntityStatus::aggregate([self.experiment.meta.status()]) {
                suite.meta.set_status(status);
            }
        }
        if !self.platform.capabilities().filesystem {
            return Ok(());
        }
        let platform = self.platform.as_ref();
        let retry = self.options.retry;
        let rejected: BTreeSet<ItemId> = self
            .report
            .failed_batches
            .iter()
            .flat_map(|failure| failure.simulations.iter().copied())
            .collect();
        for simulation in self.experiment.simulations() {
            if rejected.contains(&simulation.uid()) {
                continue;
            }
            persist(platform, &retry, Item::Simulation(simulation.clone()))?;
        }
        persist(platform, &retry, Item::Experiment(self.experiment.clone()))?;
        if let Some(suite) = &self.suite {
            persist(platform, &retry, Item::Suite(suite.clone()))?;
        }
        debug!(experiment = %self.experiment.uid(), "final records persisted");
        Ok(())
    }
}

/// Borrowed state needed to prepare and create one batch.
struct BatchCreator<'a> {
    platform: &'a dyn Platform,
    ledger: &'a AssetLedger,
    retry: RetryPolicy,
    fail_fast: bool,
    pool: &'a ThreadPool,
    experiment: ItemId,
}

impl BatchCreator<'_> {
    fn create(
        &self,
        index: usize,
        batch: &mut [Simulation],
        report: &mut ExperimentReport,
    ) -> Result<(), FlowError> {
        self.pool
            .install(|| batch.par_iter_mut().try_for_each(|simulation| self.prepare(simulation)))?;
        report.unique_assets = self.ledger.len();
        match with_retries(&self.retry, "create_simulations", |_| {
            self.platform.create_simulations(batch)
        }) {
            Ok(ids) => {
                debug!(experiment = %self.experiment, batch = index, created = ids.len(), "batch created");
                report.created += ids.len();
                Ok(())
            }
            Err(err) => {
                let err = err
                    .with_phase(Phase::Creation)
                    .with_entity(self.experiment)
                    .with_context("batch", index.to_string());
                if self.fail_fast {
                    error!(experiment = %self.experiment, batch = index, error = %err, "batch rejected, aborting");
                    return Err(err);
                }
                warn!(experiment = %self.experiment, batch = index, error = %err, "batch rejected, continuing");
                for simulation in batch.iter_mut() {
                    simulation.meta.set_status(EntityStatus::Failed);
                }
                report.failed_batches.push(BatchFailure {
                    batch: index,
                    simulations: batch.iter().map(Simulation::uid).collect(),
                    error: err,
                });
                Ok(())
            }
        }
    }

    fn prepare(&self, simulation: &mut Simulation) -> Result<(), FlowError> {
        let uid = simulation.uid();
        simulation
            .pre_creation()
            .map_err(|err| err.with_phase(Phase::Creation).with_entity(uid))?;
        let violations = self.platform.validate(&Item::Simulation(simulation.clone()));
        if !violations.is_empty() {
            return Err(violations_error(&violations)
                .with_phase(Phase::Creation)
                .with_entity(uid));
        }
        let assets = simulation
            .assets
            .persisted_mut()
            .map_err(|err| err.with_phase(Phase::Provisioning).with_entity(uid))?;
        for asset in assets {
            let id = self
                .ledger
                .provision(self.platform, asset, &self.retry)
                .map_err(|err| err.with_entity(uid))?;
            asset.set_platform_id(id);
        }
        Ok(())
    }
}

fn provision_collection(
    pool: &ThreadPool,
    platform: &dyn Platform,
    ledger: &AssetLedger,
    retry: &RetryPolicy,
    collection: &mut AssetCollection,
) -> Result<(), FlowError> {
    let assets = collection
        .persisted_mut()
        .map_err(|err| err.with_phase(Phase::Provisioning))?;
    pool.install(|| {
        assets.par_bridge().try_for_each(|asset| {
            let id = ledger.provision(platform, asset, retry)?;
            asset.set_platform_id(id);
            Ok(())
        })
    })
}

fn persist(platform: &dyn Platform, retry: &RetryPolicy, item: Item) -> Result<(), FlowError> {
    let uid = item.uid();
    with_retries(retry, "persist_record", |_| platform.persist_record(&item))
        .map_err(|err| err.with_phase(Phase::Metadata).with_entity(uid))
}

fn build_pool(workers: usize) -> Result<ThreadPool, FlowError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|err| FlowError::io("thread_pool", err))
}
