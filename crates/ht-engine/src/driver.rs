//! The sequential propose / evaluate / record loop.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ht_optimizer::{ParameterSet, SearchStrategy, TrialResult};
use ht_tracking::{Experiment, Run, RunStatus, TrackingClient};
use ht_types::{config_error, internal_error, HtResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::evaluator::ObjectiveEvaluator;
use crate::selector::BestRunSelector;

/// Param key holding the zero-based trial index on every trial run.
pub const TRIAL_NUMBER_PARAM: &str = "trial_number";
/// Param key holding the failure message on failed trial runs.
pub const ERROR_PARAM: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Idle,
    Proposing,
    Evaluating,
    Recording,
    Selecting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Trials to run; the loop never stops early.
    pub num_trials: usize,
    /// Metric logged per trial and minimized at selection.
    pub loss_metric: String,
    /// Upper bound on a single evaluation.
    pub trial_timeout: Option<Duration>,
    /// Wrap the trial runs in a parent run.
    pub parent_run: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_trials: 15,
            loss_metric: "rmse".to_string(),
            trial_timeout: None,
            parent_run: false,
        }
    }
}

impl SearchConfig {
    pub fn with_num_trials(mut self, n: usize) -> Self {
        self.num_trials = n;
        self
    }

    pub fn with_trial_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.trial_timeout = timeout;
        self
    }

    pub fn with_parent_run(mut self, enabled: bool) -> Self {
        self.parent_run = enabled;
        self
    }

    pub fn check(&self) -> HtResult<()> {
        if self.num_trials == 0 {
            return Err(config_error!("num_trials must be at least 1"));
        }
        if self.loss_metric.trim().is_empty() {
            return Err(config_error!("loss metric name must not be empty"));
        }
        if self.trial_timeout.map_or(false, |t| t.is_zero()) {
            return Err(config_error!("trial timeout must be positive"));
        }
        Ok(())
    }
}

/// Outcome of a whole search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchSummary {
    pub experiment: Experiment,
    pub trials: Vec<TrialResult>,
    pub best_run: Option<Run>,
    pub parent_run_id: Option<String>,
    pub completed: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SearchSummary {
    pub fn best_loss(&self, metric: &str) -> Option<f64> {
        self.best_run.as_ref().and_then(|run| run.metric(metric))
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Drives one search: `Idle -> (Proposing -> Evaluating -> Recording)*
/// -> Selecting -> Done`.
///
/// Configuration and tracking errors abort the search; evaluation errors,
/// panics and timeouts only fail the trial at hand.
pub struct SearchDriver {
    config: SearchConfig,
    strategy: Box<dyn SearchStrategy>,
    evaluator: ObjectiveEvaluator,
    client: TrackingClient,
    state: DriverState,
}

impl std::fmt::Debug for SearchDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchDriver")
            .field("config", &self.config)
            .field("strategy", &self.strategy.name())
            .field("evaluator", &self.evaluator)
            .field("state", &self.state)
            .finish()
    }
}

impl SearchDriver {
    pub fn new(
        config: SearchConfig,
        strategy: Box<dyn SearchStrategy>,
        evaluator: ObjectiveEvaluator,
        client: TrackingClient,
    ) -> HtResult<Self> {
        config.check()?;
        strategy.space().check()?;
        for reserved in [TRIAL_NUMBER_PARAM, ERROR_PARAM] {
            if strategy.space().get(reserved).is_some() {
                return Err(config_error!("parameter name {:?} is reserved", reserved));
            }
        }
        Ok(Self {
            config,
            strategy,
            evaluator,
            client,
            state: DriverState::Idle,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn strategy(&self) -> &dyn SearchStrategy {
        self.strategy.as_ref()
    }

    pub fn client(&self) -> &TrackingClient {
        &self.client
    }

    fn transition(&mut self, next: DriverState) {
        debug!("driver {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run every trial, then select the best run. A driver runs once.
    pub async fn run(&mut self) -> HtResult<SearchSummary> {
        if self.state != DriverState::Idle {
            return Err(internal_error!("search driver already ran (state {:?})", self.state));
        }
        let started_at = Utc::now();
        let client = self.client.clone();

        let experiment_name = client.config().experiment_name.clone();
        let experiment = client.get_or_create_experiment(&experiment_name).await?;
        info!(
            "Starting {} search: {} trials in experiment {} ({})",
            self.strategy.name(),
            self.config.num_trials,
            experiment.name,
            experiment.experiment_id
        );

        let parent = if self.config.parent_run {
            Some(client.start_run(&experiment.experiment_id, None).await?)
        } else {
            None
        };
        let parent_run_id = parent.as_ref().map(|p| p.run_id().to_string());

        let trials = match self.run_trials(&experiment, parent_run_id.as_deref()).await {
            Ok(trials) => trials,
            Err(e) => {
                if let Some(parent) = &parent {
                    if let Err(finish_err) = parent.finish(RunStatus::Failed).await {
                        warn!("Failed to close parent run {}: {}", parent.run_id(), finish_err);
                    }
                }
                self.transition(DriverState::Done);
                return Err(e);
            }
        };

        self.transition(DriverState::Selecting);
        let best_run = BestRunSelector::new(self.config.loss_metric.clone())
            .select(&client, &experiment.experiment_id)
            .await?;

        if let Some(parent) = parent {
            let mut metrics = BTreeMap::from([("num_trials".to_string(), trials.len() as f64)]);
            if let Some(best) = best_run.as_ref().and_then(|r| r.metric(&self.config.loss_metric)) {
                metrics.insert(format!("best_{}", self.config.loss_metric), best);
            }
            parent.log_metrics(metrics).await?;
            parent.finish(RunStatus::Completed).await?;
        }

        self.transition(DriverState::Done);
        let completed = trials.iter().filter(|t| t.is_ok()).count();
        let summary = SearchSummary {
            experiment,
            failed: trials.len() - completed,
            completed,
            trials,
            best_run,
            parent_run_id,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "Search finished: {} completed, {} failed in {} ms",
            summary.completed,
            summary.failed,
            summary.elapsed().num_milliseconds()
        );
        Ok(summary)
    }

    async fn run_trials(
        &mut self,
        experiment: &Experiment,
        parent_run_id: Option<&str>,
    ) -> HtResult<Vec<TrialResult>> {
        let mut trials = Vec::with_capacity(self.config.num_trials);

        for trial_number in 0..self.config.num_trials {
            self.transition(DriverState::Proposing);
            let proposal = match self.strategy.suggest() {
                Ok(params) => {
                    debug!("Trial {} proposal: {:?}", trial_number, params);
                    let space = self.strategy.space();
                    match space.check_parameters(&params) {
                        Ok(()) => Ok(space.normalize(&params)),
                        Err(e) => {
                            warn!("Trial {} proposal rejected: {}", trial_number, e);
                            Err(TrialResult::failed(trial_number, params, e.to_string()))
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Trial {} proposal failed: {}", trial_number, e);
                    Err(TrialResult::failed(trial_number, ParameterSet::new(), e.to_string()))
                }
            };

            self.transition(DriverState::Evaluating);
            let result = match proposal {
                Ok(params) => self.evaluate(trial_number, params).await,
                Err(failed) => failed,
            };

            self.transition(DriverState::Recording);
            let run_id = self.record(experiment, parent_run_id, &result).await?;
            if result.is_ok() {
                info!(
                    "Trial {}/{} run {}: {} = {:.6}",
                    trial_number + 1,
                    self.config.num_trials,
                    run_id,
                    self.config.loss_metric,
                    result.loss
                );
            } else {
                warn!(
                    "Trial {}/{} run {} failed: {}",
                    trial_number + 1,
                    self.config.num_trials,
                    run_id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }

            self.strategy.observe(result.clone());
            trials.push(result);
        }
        Ok(trials)
    }

    /// Evaluate on the blocking pool so a timeout or panic fails only this trial.
    async fn evaluate(&self, trial_number: usize, params: ParameterSet) -> TrialResult {
        let evaluator = self.evaluator.clone();
        let task_params = params.clone();
        let started = Instant::now();
        let handle =
            tokio::task::spawn_blocking(move || evaluator.evaluate(trial_number, &task_params));

        let joined = match self.config.trial_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // The worker keeps running detached; its result is discarded.
                    return TrialResult::failed(
                        trial_number,
                        params,
                        format!("evaluation timed out after {} ms", limit.as_millis()),
                    )
                    .with_duration_ms(started.elapsed().as_millis() as u64);
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) => TrialResult::failed(trial_number, params, format!("evaluation panicked: {}", e))
                .with_duration_ms(started.elapsed().as_millis() as u64),
        }
    }

    async fn record(
        &self,
        experiment: &Experiment,
        parent_run_id: Option<&str>,
        result: &TrialResult,
    ) -> HtResult<String> {
        let run = self
            .client
            .start_run(&experiment.experiment_id, parent_run_id)
            .await?;

        let mut params: BTreeMap<String, String> = result
            .parameters
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        params.insert(TRIAL_NUMBER_PARAM.to_string(), result.trial_number.to_string());
        if let Some(error) = &result.error {
            params.insert(ERROR_PARAM.to_string(), error.clone());
        }
        run.log_params(params).await?;

        let status = if result.is_ok() {
            run.log_metric(self.config.loss_metric.clone(), result.loss).await?;
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        run.finish(status).await?;
        Ok(run.run_id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EstimatorFactory, RandomForestFactory, Regressor};
    use crate::test_support::synthetic_split;
    use ht_optimizer::{ParameterValue, RandomSearch, SearchSpace, TpeConfig, TpeSearch};
    use ht_tracking::{RunQuery, RunView, TrackingConfig};
    use ht_types::HtError;
    use ndarray::{Array1, Array2};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn scenario_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("max_depth", 1, 20)
            .add_quantized("n_estimators", 10, 50, 1)
    }

    async fn memory_client(experiment: &str) -> TrackingClient {
        let config = TrackingConfig::new("memory://").with_experiment_name(experiment);
        TrackingClient::connect(config).await.unwrap()
    }

    fn tpe(seed: u64) -> Box<dyn SearchStrategy> {
        let config = TpeConfig {
            n_startup: 5,
            ..TpeConfig::default()
        };
        Box::new(TpeSearch::with_config(scenario_space(), config, Some(seed)).unwrap())
    }

    async fn all_runs(client: &TrackingClient, experiment_id: &str) -> Vec<Run> {
        client
            .search_runs(&RunQuery::new(experiment_id).view(RunView::All))
            .await
            .unwrap()
    }

    /// Delegates to the forest but fails the nth build (zero-based).
    struct FailNth {
        inner: RandomForestFactory,
        fail_on: usize,
        calls: AtomicUsize,
    }

    impl EstimatorFactory for FailNth {
        fn build(&self, params: &ParameterSet) -> HtResult<Box<dyn Regressor>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(HtError::Trial("estimator rejected parameters".into()));
            }
            self.inner.build(params)
        }

        fn name(&self) -> &str {
            "fail-nth"
        }
    }

    struct Misbehaving {
        panic: bool,
        sleep: Duration,
    }

    impl Regressor for Misbehaving {
        fn fit(&mut self, _: &Array2<f64>, _: &Array1<f64>) -> HtResult<()> {
            std::thread::sleep(self.sleep);
            if self.panic {
                panic!("fit blew up");
            }
            Ok(())
        }

        fn predict(&self, x: &Array2<f64>) -> HtResult<Array1<f64>> {
            Ok(Array1::zeros(x.nrows()))
        }
    }

    struct MisbehavingFactory {
        panic: bool,
        sleep: Duration,
    }

    impl EstimatorFactory for MisbehavingFactory {
        fn build(&self, _: &ParameterSet) -> HtResult<Box<dyn Regressor>> {
            Ok(Box::new(Misbehaving {
                panic: self.panic,
                sleep: self.sleep,
            }))
        }

        fn name(&self) -> &str {
            "misbehaving"
        }
    }

    /// Replays canned proposals, then falls back to uniform sampling.
    struct Scripted {
        proposals: std::collections::VecDeque<HtResult<ParameterSet>>,
        inner: RandomSearch,
    }

    impl Scripted {
        fn new(proposals: Vec<HtResult<ParameterSet>>) -> Self {
            Self {
                proposals: proposals.into(),
                inner: RandomSearch::new(scenario_space(), Some(11)).unwrap(),
            }
        }
    }

    impl SearchStrategy for Scripted {
        fn suggest(&mut self) -> HtResult<ParameterSet> {
            self.proposals.pop_front().unwrap_or_else(|| self.inner.suggest())
        }

        fn observe(&mut self, result: TrialResult) {
            self.inner.observe(result);
        }

        fn history(&self) -> &ht_optimizer::TrialHistory {
            self.inner.history()
        }

        fn space(&self) -> &SearchSpace {
            self.inner.space()
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn float_proposal(depth: f64, trees: f64) -> ParameterSet {
        ParameterSet::from([
            ("max_depth".to_string(), ParameterValue::Float(depth)),
            ("n_estimators".to_string(), ParameterValue::Float(trees)),
        ])
    }

    #[tokio::test]
    async fn admitted_float_proposals_are_logged_as_integers() {
        let client = memory_client("normalize").await;
        let evaluator = ObjectiveEvaluator::random_forest(synthetic_split());
        let strategy = Box::new(Scripted::new(vec![Ok(float_proposal(3.0, 12.4))]));
        let config = SearchConfig::default().with_num_trials(1);
        let mut driver = SearchDriver::new(config, strategy, evaluator, client.clone()).unwrap();

        let summary = driver.run().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.trials[0].parameters["n_estimators"], ParameterValue::Int(12));
        assert_eq!(summary.trials[0].parameters["max_depth"], ParameterValue::Int(3));

        let runs = all_runs(&client, &summary.experiment.experiment_id).await;
        assert_eq!(runs[0].param("n_estimators"), Some("12"));
        assert_eq!(runs[0].param("max_depth"), Some("3"));
    }

    #[tokio::test]
    async fn proposal_errors_fail_the_trial_unless_fatal() {
        let client = memory_client("proposals").await;
        let evaluator = ObjectiveEvaluator::random_forest(synthetic_split());
        let strategy = Box::new(Scripted::new(vec![
            Err(internal_error!("density collapsed")),
            Ok(float_proposal(2.5, 20.0)),
        ]));
        let config = SearchConfig::default().with_num_trials(3);
        let mut driver = SearchDriver::new(config, strategy, evaluator.clone(), client.clone()).unwrap();

        let summary = driver.run().await.unwrap();
        assert_eq!(summary.trials.len(), 3);
        assert_eq!(summary.failed, 2);
        assert!(summary.trials[0].error.as_deref().unwrap().contains("density collapsed"));
        assert!(summary.trials[1].error.as_deref().unwrap().contains("max_depth"));
        assert!(summary.trials[2].is_ok());
        assert_eq!(driver.strategy().history().len(), 3);

        let strategy = Box::new(Scripted::new(vec![Err(config_error!("space changed"))]));
        let config = SearchConfig::default().with_num_trials(3);
        let mut driver = SearchDriver::new(config, strategy, evaluator, client).unwrap();
        assert!(matches!(driver.run().await, Err(HtError::Config(_))));
        assert_eq!(driver.state(), DriverState::Done);
    }

    #[tokio::test]
    async fn end_to_end_fifteen_trials() {
        let client = memory_client("e2e").await;
        let evaluator = ObjectiveEvaluator::random_forest(synthetic_split());
        let mut driver =
            SearchDriver::new(SearchConfig::default(), tpe(42), evaluator, client.clone()).unwrap();

        let summary = driver.run().await.unwrap();
        assert_eq!(driver.state(), DriverState::Done);
        assert_eq!(summary.trials.len(), 15);
        assert_eq!(summary.completed, 15);

        let runs = all_runs(&client, &summary.experiment.experiment_id).await;
        assert_eq!(runs.len(), 15);
        assert!(runs.iter().all(|r| r.status == RunStatus::Completed));

        let min_rmse = runs
            .iter()
            .filter_map(|r| r.metric("rmse"))
            .fold(f64::INFINITY, f64::min);
        let best = summary.best_run.unwrap();
        assert_eq!(best.metric("rmse"), Some(min_rmse));

        for run in &runs {
            let depth: f64 = run.param("max_depth").unwrap().parse().unwrap();
            assert!(depth.fract() == 0.0 && (1.0..=20.0).contains(&depth));
            let trees: f64 = run.param("n_estimators").unwrap().parse().unwrap();
            assert!(trees.fract() == 0.0 && (10.0..=50.0).contains(&trees));
        }
    }

    #[tokio::test]
    async fn same_seed_reproduces_the_search() {
        let mut proposals = Vec::new();
        for _ in 0..2 {
            let client = memory_client("repro").await;
            let evaluator = ObjectiveEvaluator::random_forest(synthetic_split());
            let config = SearchConfig::default().with_num_trials(8);
            let mut driver = SearchDriver::new(config, tpe(7), evaluator, client).unwrap();
            let summary = driver.run().await.unwrap();
            proposals.push(
                summary
                    .trials
                    .into_iter()
                    .map(|t| (t.parameters, t.loss))
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(proposals[0], proposals[1]);
    }

    #[tokio::test]
    async fn failed_trial_is_recorded_and_search_continues() {
        let client = memory_client("isolation").await;
        let factory = FailNth {
            inner: RandomForestFactory::default(),
            fail_on: 2,
            calls: AtomicUsize::new(0),
        };
        let evaluator = ObjectiveEvaluator::new(Arc::new(synthetic_split()), Arc::new(factory));
        let strategy = Box::new(RandomSearch::new(scenario_space(), Some(3)).unwrap());
        let config = SearchConfig::default().with_num_trials(5);
        let mut driver = SearchDriver::new(config, strategy, evaluator, client.clone()).unwrap();

        let summary = driver.run().await.unwrap();
        assert_eq!(summary.trials.len(), 5);
        assert_eq!(summary.failed, 1);
        assert!(summary.trials[2].loss.is_infinite());

        let runs = all_runs(&client, &summary.experiment.experiment_id).await;
        let statuses: Vec<RunStatus> = runs.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                RunStatus::Completed,
                RunStatus::Completed,
                RunStatus::Failed,
                RunStatus::Completed,
                RunStatus::Completed
            ]
        );
        assert_eq!(runs[2].param(ERROR_PARAM), Some("Trial evaluation failed: estimator rejected parameters"));
        assert_eq!(runs[2].param(TRIAL_NUMBER_PARAM), Some("2"));
        assert!(runs[2].metric("rmse").is_none());

        let best = summary.best_run.unwrap();
        assert_ne!(best.run_id, runs[2].run_id);
        assert_eq!(strategy_history_len(&driver), 5);
    }

    fn strategy_history_len(driver: &SearchDriver) -> usize {
        driver.strategy().history().len()
    }

    #[tokio::test]
    async fn panics_and_timeouts_fail_only_the_trial() {
        let client = memory_client("misbehaving").await;
        let panicking = ObjectiveEvaluator::new(
            Arc::new(synthetic_split()),
            Arc::new(MisbehavingFactory {
                panic: true,
                sleep: Duration::ZERO,
            }),
        );
        let strategy = Box::new(RandomSearch::new(scenario_space(), Some(1)).unwrap());
        let config = SearchConfig::default().with_num_trials(2);
        let mut driver = SearchDriver::new(config, strategy, panicking, client.clone()).unwrap();
        let summary = driver.run().await.unwrap();
        assert_eq!(summary.failed, 2);
        assert!(summary.best_run.is_none());
        assert!(summary.trials[0].error.as_deref().unwrap().contains("panicked"));

        let slow = ObjectiveEvaluator::new(
            Arc::new(synthetic_split()),
            Arc::new(MisbehavingFactory {
                panic: false,
                sleep: Duration::from_millis(300),
            }),
        );
        let strategy = Box::new(RandomSearch::new(scenario_space(), Some(1)).unwrap());
        let config = SearchConfig::default()
            .with_num_trials(1)
            .with_trial_timeout(Some(Duration::from_millis(20)));
        let client = memory_client("slow").await;
        let mut driver = SearchDriver::new(config, strategy, slow, client).unwrap();
        let summary = driver.run().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(summary.trials[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn parent_run_wraps_trials() {
        let client = memory_client("nested").await;
        let evaluator = ObjectiveEvaluator::random_forest(synthetic_split());
        let strategy = Box::new(RandomSearch::new(scenario_space(), Some(5)).unwrap());
        let config = SearchConfig::default().with_num_trials(3).with_parent_run(true);
        let mut driver = SearchDriver::new(config, strategy, evaluator, client.clone()).unwrap();

        let summary = driver.run().await.unwrap();
        let parent_id = summary.parent_run_id.clone().unwrap();
        let parent = client.get_run(&parent_id).await.unwrap();
        assert_eq!(parent.status, RunStatus::Completed);
        assert_eq!(parent.metric("num_trials"), Some(3.0));
        assert_eq!(parent.metric("best_rmse"), summary.best_loss("rmse"));

        let runs = all_runs(&client, &summary.experiment.experiment_id).await;
        assert_eq!(runs.len(), 4);
        let children = runs.iter().filter(|r| r.parent_run_id.as_deref() == Some(parent_id.as_str()));
        assert_eq!(children.count(), 3);
        assert_ne!(summary.best_run.unwrap().run_id, parent_id);
    }

    #[tokio::test]
    async fn invalid_configuration_fails_before_any_trial() {
        let client = memory_client("config").await;
        let evaluator = ObjectiveEvaluator::random_forest(synthetic_split());
        let strategy = Box::new(RandomSearch::new(scenario_space(), Some(1)).unwrap());
        let zero = SearchConfig::default().with_num_trials(0);
        assert!(matches!(
            SearchDriver::new(zero, strategy, evaluator.clone(), client.clone()),
            Err(HtError::Config(_))
        ));

        let reserved = SearchSpace::new().add_int(TRIAL_NUMBER_PARAM, 1, 3);
        let strategy = Box::new(RandomSearch::new(reserved, Some(1)).unwrap());
        assert!(SearchDriver::new(SearchConfig::default(), strategy, evaluator, client).is_err());
    }

    #[tokio::test]
    async fn driver_runs_once_and_reuses_experiment() {
        let client = memory_client("reuse").await;
        let evaluator = ObjectiveEvaluator::random_forest(synthetic_split());
        let config = SearchConfig::default().with_num_trials(2);

        let mut first = SearchDriver::new(config.clone(), tpe(1), evaluator.clone(), client.clone()).unwrap();
        let a = first.run().await.unwrap();
        assert!(first.run().await.is_err());

        let mut second = SearchDriver::new(config, tpe(2), evaluator, client.clone()).unwrap();
        let b = second.run().await.unwrap();
        assert_eq!(a.experiment.experiment_id, b.experiment.experiment_id);
        assert_eq!(all_runs(&client, &a.experiment.experiment_id).await.len(), 4);
    }
}
