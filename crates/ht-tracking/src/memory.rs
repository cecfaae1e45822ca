//! In-process tracking store for tests and offline searches.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ht_types::{validation_error, HtResult, TrackingError};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::store::TrackingStore;
use crate::types::{Experiment, Run, RunQuery, RunStatus};

#[derive(Debug, Clone)]
struct StoredRun {
    sequence: u64,
    run: Run,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    // Guarded as a whole so lookup-then-create cannot race.
    experiments: Mutex<Vec<Experiment>>,
    runs: DashMap<String, StoredRun>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn experiment_count(&self) -> usize {
        self.experiments.lock().len()
    }

    fn experiment_exists(&self, experiment_id: &str) -> bool {
        self.experiments
            .lock()
            .iter()
            .any(|e| e.experiment_id == experiment_id)
    }

    /// Apply `f` to an open run.
    fn with_open_run<F>(&self, run_id: &str, f: F) -> HtResult<()>
    where
        F: FnOnce(&mut Run) -> HtResult<()>,
    {
        let mut entry = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| TrackingError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        if entry.run.status.is_terminal() {
            return Err(TrackingError::RunFinalized {
                run_id: run_id.to_string(),
            }
            .into());
        }
        f(&mut entry.run)
    }
}

fn ensure_new_keys<'a, V>(
    run: &Run,
    existing: &BTreeMap<String, V>,
    keys: impl Iterator<Item = &'a String>,
) -> HtResult<()> {
    for key in keys {
        if existing.contains_key(key) {
            return Err(TrackingError::DuplicateKey {
                run_id: run.run_id.clone(),
                key: key.clone(),
            }
            .into());
        }
    }
    Ok(())
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn ping(&self) -> HtResult<()> {
        Ok(())
    }

    async fn get_experiment_by_name(&self, name: &str) -> HtResult<Option<Experiment>> {
        Ok(self.experiments.lock().iter().find(|e| e.name == name).cloned())
    }

    async fn create_experiment(&self, name: &str) -> HtResult<Experiment> {
        let mut experiments = self.experiments.lock();
        if experiments.iter().any(|e| e.name == name) {
            return Err(TrackingError::ExperimentAlreadyExists {
                name: name.to_string(),
            }
            .into());
        }
        let experiment = Experiment {
            experiment_id: experiments.len().to_string(),
            name: name.to_string(),
        };
        experiments.push(experiment.clone());
        tracing::debug!("created experiment {} ({})", experiment.name, experiment.experiment_id);
        Ok(experiment)
    }

    async fn create_run(&self, experiment_id: &str, parent_run_id: Option<&str>) -> HtResult<Run> {
        if !self.experiment_exists(experiment_id) {
            return Err(TrackingError::ExperimentNotFound {
                experiment: experiment_id.to_string(),
            }
            .into());
        }
        if let Some(parent) = parent_run_id {
            if !self.runs.contains_key(parent) {
                return Err(TrackingError::RunNotFound {
                    run_id: parent.to_string(),
                }
                .into());
            }
        }

        let run = Run::new(
            Uuid::new_v4().simple().to_string(),
            experiment_id,
            parent_run_id.map(str::to_string),
        );
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.runs.insert(
            run.run_id.clone(),
            StoredRun {
                sequence,
                run: run.clone(),
            },
        );
        Ok(run)
    }

    async fn get_run(&self, run_id: &str) -> HtResult<Run> {
        self.runs
            .get(run_id)
            .map(|entry| entry.run.clone())
            .ok_or_else(|| {
                TrackingError::RunNotFound {
                    run_id: run_id.to_string(),
                }
                .into()
            })
    }

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> HtResult<()> {
        self.with_open_run(run_id, |run| {
            ensure_new_keys(run, &run.params, params.keys())?;
            run.params
                .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(())
        })
    }

    async fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> HtResult<()> {
        self.with_open_run(run_id, |run| {
            if let Some((key, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
                return Err(validation_error!("metric {} is not finite: {}", key, value));
            }
            ensure_new_keys(run, &run.metrics, metrics.keys())?;
            run.metrics.extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
            Ok(())
        })
    }

    async fn finalize_run(&self, run_id: &str, status: RunStatus) -> HtResult<()> {
        if !status.is_terminal() {
            return Err(validation_error!("cannot finalize run {} as {}", run_id, status));
        }
        self.with_open_run(run_id, |run| {
            run.status = status;
            run.finished_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn search_runs(&self, query: &RunQuery) -> HtResult<Vec<Run>> {
        let mut stored: Vec<StoredRun> = self
            .runs
            .iter()
            .filter(|entry| query.admits(&entry.run))
            .map(|entry| entry.value().clone())
            .collect();
        stored.sort_by_key(|s| s.sequence);
        Ok(query.apply(stored.into_iter().map(|s| s.run).collect()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
