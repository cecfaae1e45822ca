use std::sync::Arc;
use std::time::Instant;

use ht_optimizer::{ParameterSet, TrialResult};
use ht_types::{DataSplit, HtError, HtResult};
use tracing::debug;

use crate::model::{rmse, EstimatorFactory, RandomForestFactory};

/// Scores a parameter set by validation RMSE.
///
/// The split is fixed at construction and shared read-only by every trial;
/// evaluation has no side effects beyond the returned result.
#[derive(Clone)]
pub struct ObjectiveEvaluator {
    data: Arc<DataSplit>,
    factory: Arc<dyn EstimatorFactory>,
}

impl std::fmt::Debug for ObjectiveEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectiveEvaluator")
            .field("estimator", &self.factory.name())
            .field("train_rows", &self.data.train.n_samples())
            .field("valid_rows", &self.data.valid.n_samples())
            .finish()
    }
}

impl ObjectiveEvaluator {
    pub fn new(data: Arc<DataSplit>, factory: Arc<dyn EstimatorFactory>) -> Self {
        Self { data, factory }
    }

    pub fn random_forest(data: DataSplit) -> Self {
        Self::new(Arc::new(data), Arc::new(RandomForestFactory::default()))
    }

    pub fn data(&self) -> &DataSplit {
        &self.data
    }

    pub fn estimator_name(&self) -> &str {
        self.factory.name()
    }

    /// Fit on the training set and return the validation RMSE.
    pub fn score(&self, params: &ParameterSet) -> HtResult<f64> {
        let mut model = self.factory.build(params)?;
        model.fit(&self.data.train.features, &self.data.train.targets)?;
        let predictions = model.predict(&self.data.valid.features)?;
        let loss = rmse(&predictions, &self.data.valid.targets)?;
        if !loss.is_finite() {
            return Err(HtError::Trial(format!("validation loss is not finite: {}", loss)));
        }
        Ok(loss)
    }

    /// Evaluate one trial. Any failure yields a failed result with infinite loss.
    pub fn evaluate(&self, trial_number: usize, params: &ParameterSet) -> TrialResult {
        let started = Instant::now();
        let result = match self.score(params) {
            Ok(loss) => TrialResult::ok(trial_number, params.clone(), loss),
            Err(e) => {
                debug!("Trial {} failed during evaluation: {}", trial_number, e);
                TrialResult::failed(trial_number, params.clone(), e.to_string())
            }
        };
        result.with_duration_ms(started.elapsed().as_millis() as u64)
    }
}
