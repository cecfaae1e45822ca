//! # ht-engine
//!
//! Ties the search together: the objective scores proposals by validation
//! RMSE, the driver runs the sequential propose / evaluate / record loop, and
//! the selector reads the winning run back from the tracking store.

pub mod driver;
pub mod evaluator;
pub mod model;
pub mod selector;

pub use driver::{DriverState, SearchConfig, SearchDriver, SearchSummary, ERROR_PARAM, TRIAL_NUMBER_PARAM};
pub use evaluator::ObjectiveEvaluator;
pub use model::{rmse, EstimatorFactory, ForestParams, RandomForestFactory, RandomForestRegressor, Regressor};
pub use selector::BestRunSelector;

#[cfg(test)]
pub(crate) mod test_support {
    use ht_types::{DataSplit, Dataset};
    use ndarray::{Array1, Array2};

    fn linear_rows(n: usize, offset: usize) -> Dataset {
        let mut features = Array2::<f64>::zeros((n, 2));
        let mut targets = Array1::<f64>::zeros(n);
        for i in 0..n {
            let a = ((i + offset) % 17) as f64;
            let b = ((i * 7 + offset) % 11) as f64;
            features[[i, 0]] = a;
            features[[i, 1]] = b;
            targets[i] = 3.0 * a - 2.0 * b + 1.0;
        }
        Dataset::new(vec!["a".to_string(), "b".to_string()], "y", features, targets).unwrap()
    }

    /// Small noiseless linear problem: 80 training rows, 20 validation rows.
    pub fn synthetic_split() -> DataSplit {
        DataSplit::new(linear_rows(80, 0), linear_rows(20, 5)).unwrap()
    }
}
