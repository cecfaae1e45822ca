use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use ht_types::{validation_error, HtError, HtResult, TrackingError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::TrackingConfig;
use crate::store::{open_store, TrackingStore};
use crate::types::{Experiment, Run, RunQuery, RunStatus};

/// Handle to a tracking store, configured explicitly at construction.
#[derive(Debug, Clone)]
pub struct TrackingClient {
    config: TrackingConfig,
    store: Arc<dyn TrackingStore>,
}

impl TrackingClient {
    /// Open the store named by `config.endpoint` and check it responds.
    pub async fn connect(config: TrackingConfig) -> HtResult<Self> {
        let store = open_store(&config)?;
        store.ping().await.map_err(|e| match e {
            HtError::Tracking(TrackingError::Unavailable { .. }) => e,
            other => TrackingError::Unavailable {
                endpoint: config.endpoint.clone(),
                message: other.to_string(),
            }
            .into(),
        })?;
        info!("Connected to {} tracking store at {}", store.name(), config.endpoint);
        Ok(Self { config, store })
    }

    pub fn with_store(config: TrackingConfig, store: Arc<dyn TrackingStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    /// Look the experiment up by name, creating it on first use.
    ///
    /// Safe against a concurrent creator: losing the race re-reads the
    /// winner's experiment.
    pub async fn get_or_create_experiment(&self, name: &str) -> HtResult<Experiment> {
        if let Some(experiment) = self.store.get_experiment_by_name(name).await? {
            debug!("Reusing experiment {} ({})", name, experiment.experiment_id);
            return Ok(experiment);
        }

        match self.store.create_experiment(name).await {
            Ok(experiment) => Ok(experiment),
            Err(HtError::Tracking(TrackingError::ExperimentAlreadyExists { .. })) => self
                .store
                .get_experiment_by_name(name)
                .await?
                .ok_or_else(|| {
                    TrackingError::ExperimentNotFound {
                        experiment: name.to_string(),
                    }
                    .into()
                }),
            Err(e) => Err(e),
        }
    }

    pub async fn start_run(
        &self,
        experiment_id: &str,
        parent_run_id: Option<&str>,
    ) -> HtResult<ActiveRun> {
        let run = self.store.create_run(experiment_id, parent_run_id).await?;
        debug!("Started run {} in experiment {}", run.run_id, experiment_id);
        Ok(ActiveRun {
            run_id: run.run_id,
            experiment_id: run.experiment_id,
            parent_run_id: run.parent_run_id,
            store: Arc::clone(&self.store),
            state: Mutex::new(RunState::default()),
        })
    }

    /// Run `f` inside a fresh run, finalizing it completed when `f` succeeds
    /// and failed when it errors.
    pub async fn with_run<T, F, Fut>(
        &self,
        experiment_id: &str,
        parent_run_id: Option<&str>,
        f: F,
    ) -> HtResult<T>
    where
        F: FnOnce(Arc<ActiveRun>) -> Fut,
        Fut: Future<Output = HtResult<T>>,
    {
        let run = Arc::new(self.start_run(experiment_id, parent_run_id).await?);
        let outcome = f(Arc::clone(&run)).await;
        let status = if outcome.is_ok() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        run.finish(status).await?;
        outcome
    }

    pub async fn search_runs(&self, query: &RunQuery) -> HtResult<Vec<Run>> {
        self.store.search_runs(query).await
    }

    pub async fn get_run(&self, run_id: &str) -> HtResult<Run> {
        self.store.get_run(run_id).await
    }
}

#[derive(Debug, Default)]
struct RunState {
    params: HashSet<String>,
    metrics: HashSet<String>,
    finalized: bool,
}

/// An open run. Writes are append-only and stop once the run is finished.
///
/// Dropping an unfinished run marks it failed in the background so no run
/// is left dangling in the running state.
#[derive(Debug)]
pub struct ActiveRun {
    run_id: String,
    experiment_id: String,
    parent_run_id: Option<String>,
    store: Arc<dyn TrackingStore>,
    state: Mutex<RunState>,
}

impl ActiveRun {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn parent_run_id(&self) -> Option<&str> {
        self.parent_run_id.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finalized
    }

    /// Reserve `keys` in one of the key sets, failing on the first repeat.
    fn reserve<'a>(
        &self,
        keys: impl Iterator<Item = &'a String> + Clone,
        pick: fn(&mut RunState) -> &mut HashSet<String>,
    ) -> HtResult<()> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(TrackingError::RunFinalized {
                run_id: self.run_id.clone(),
            }
            .into());
        }
        let taken = pick(&mut *state);
        if let Some(key) = keys.clone().find(|k| taken.contains(*k)) {
            return Err(TrackingError::DuplicateKey {
                run_id: self.run_id.clone(),
                key: key.clone(),
            }
            .into());
        }
        taken.extend(keys.cloned());
        Ok(())
    }

    fn release<'a>(
        &self,
        keys: impl Iterator<Item = &'a String>,
        pick: fn(&mut RunState) -> &mut HashSet<String>,
    ) {
        let mut state = self.state.lock();
        let taken = pick(&mut *state);
        for key in keys {
            taken.remove(key);
        }
    }

    pub async fn log_params<I, K, V>(&self, params: I) -> HtResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let params: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
        self.reserve(params.keys(), |s| &mut s.params)?;
        if let Err(e) = self.store.log_params(&self.run_id, &params).await {
            self.release(params.keys(), |s| &mut s.params);
            return Err(e);
        }
        Ok(())
    }

    pub async fn log_metrics(&self, metrics: BTreeMap<String, f64>) -> HtResult<()> {
        if let Some((key, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(validation_error!("metric {} is not finite: {}", key, value));
        }
        self.reserve(metrics.keys(), |s| &mut s.metrics)?;
        if let Err(e) = self.store.log_metrics(&self.run_id, &metrics).await {
            self.release(metrics.keys(), |s| &mut s.metrics);
            return Err(e);
        }
        Ok(())
    }

    pub async fn log_metric(&self, key: impl Into<String>, value: f64) -> HtResult<()> {
        self.log_metrics(BTreeMap::from([(key.into(), value)])).await
    }

    /// Finalize the run with a terminal status. A run finishes once.
    pub async fn finish(&self, status: RunStatus) -> HtResult<()> {
        if !status.is_terminal() {
            return Err(validation_error!("cannot finish run {} as {}", self.run_id, status));
        }
        {
            let mut state = self.state.lock();
            if state.finalized {
                return Err(TrackingError::RunFinalized {
                    run_id: self.run_id.clone(),
                }
                .into());
            }
            state.finalized = true;
        }
        if let Err(e) = self.store.finalize_run(&self.run_id, status).await {
            self.state.lock().finalized = false;
            return Err(e);
        }
        debug!("Run {} finished as {}", self.run_id, status);
        Ok(())
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if self.state.get_mut().finalized {
            return;
        }
        warn!("Run {} dropped while open; marking it failed", self.run_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                let run_id = std::mem::take(&mut self.run_id);
                handle.spawn(async move {
                    if let Err(e) = store.finalize_run(&run_id, RunStatus::Failed).await {
                        warn!("Failed to finalize abandoned run {}: {}", run_id, e);
                    }
                });
            }
            Err(_) => warn!("No runtime available to finalize run {}", self.run_id),
        }
    }
}
