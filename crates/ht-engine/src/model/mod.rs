//! Estimators scored by the objective.

pub mod forest;
pub mod tree;

pub use forest::{ForestParams, MaxFeatures, RandomForestFactory, RandomForestRegressor};
pub use tree::RegressionTree;

use ht_optimizer::ParameterSet;
use ht_types::{HtError, HtResult};
use ndarray::{Array1, Array2};

/// A trainable regression model.
pub trait Regressor: Send {
    fn fit(&mut self, features: &Array2<f64>, targets: &Array1<f64>) -> HtResult<()>;

    fn predict(&self, features: &Array2<f64>) -> HtResult<Array1<f64>>;
}

/// Turns a trial's parameter set into an unfitted model.
///
/// Rejecting a parameter combination here fails only that trial.
pub trait EstimatorFactory: Send + Sync {
    fn build(&self, params: &ParameterSet) -> HtResult<Box<dyn Regressor>>;

    fn name(&self) -> &str;
}

/// Root-mean-squared error between predictions and targets.
pub fn rmse(predictions: &Array1<f64>, targets: &Array1<f64>) -> HtResult<f64> {
    if predictions.len() != targets.len() {
        return Err(HtError::Trial(format!(
            "{} predictions for {} targets",
            predictions.len(),
            targets.len()
        )));
    }
    if targets.is_empty() {
        return Err(HtError::Trial("cannot score an empty validation set".to_string()));
    }
    let sse: f64 = predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - t).powi(2))
        .sum();
    Ok((sse / targets.len() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rmse_matches_hand_computation() {
        let value = rmse(&array![1.0, 2.0, 3.0], &array![1.0, 4.0, 3.0]).unwrap();
        assert!((value - (4.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(rmse(&array![5.0], &array![5.0]).unwrap(), 0.0);
    }

    #[test]
    fn rmse_rejects_length_mismatch() {
        assert!(rmse(&array![1.0], &array![1.0, 2.0]).is_err());
    }
}
