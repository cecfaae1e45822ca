use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ht_types::HtResult;

use crate::config::{Backend, TrackingConfig};
use crate::memory::MemoryStore;
use crate::mlflow::MlflowStore;
use crate::types::{Experiment, Run, RunQuery, RunStatus};

/// Backend that persists experiments and runs.
///
/// Params and metrics are append-only: logging a key a run already holds
/// fails with `DuplicateKey`, and finalized runs reject further writes.
#[async_trait]
pub trait TrackingStore: Send + Sync + std::fmt::Debug {
    /// Cheap round trip proving the store is reachable.
    async fn ping(&self) -> HtResult<()>;

    async fn get_experiment_by_name(&self, name: &str) -> HtResult<Option<Experiment>>;

    /// Fails with `ExperimentAlreadyExists` when the name is taken.
    async fn create_experiment(&self, name: &str) -> HtResult<Experiment>;

    async fn create_run(&self, experiment_id: &str, parent_run_id: Option<&str>) -> HtResult<Run>;

    async fn get_run(&self, run_id: &str) -> HtResult<Run>;

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> HtResult<()>;

    async fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> HtResult<()>;

    async fn finalize_run(&self, run_id: &str, status: RunStatus) -> HtResult<()>;

    async fn search_runs(&self, query: &RunQuery) -> HtResult<Vec<Run>>;

    fn name(&self) -> &str;
}

/// Build the store selected by the endpoint scheme.
pub fn open_store(config: &TrackingConfig) -> HtResult<Arc<dyn TrackingStore>> {
    config.check()?;
    let store: Arc<dyn TrackingStore> = match config.backend()? {
        Backend::Rest => Arc::new(MlflowStore::new(config)?),
        Backend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}
