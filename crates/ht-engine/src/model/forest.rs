//! Bagged regression forest.

use ht_optimizer::{ParameterSet, ParameterValue};
use ht_types::{HtError, HtResult};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde_json::Value;

use super::tree::RegressionTree;
use super::{EstimatorFactory, Regressor};

/// How many features each split may consider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    /// Fraction of the feature count, in (0, 1].
    Fraction(f64),
    Fixed(usize),
}

impl MaxFeatures {
    fn parse(value: &ParameterValue) -> HtResult<Self> {
        let parsed = match value {
            ParameterValue::Json(Value::String(s)) => match s.as_str() {
                "sqrt" => Some(MaxFeatures::Sqrt),
                "log2" => Some(MaxFeatures::Log2),
                "all" | "auto" => Some(MaxFeatures::All),
                _ => None,
            },
            ParameterValue::Json(Value::Null) => Some(MaxFeatures::All),
            ParameterValue::Int(n) if *n > 0 => Some(MaxFeatures::Fixed(*n as usize)),
            ParameterValue::Float(f) => Some(MaxFeatures::Fraction(*f)),
            ParameterValue::Json(Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
                (Some(k), _) if k > 0 => Some(MaxFeatures::Fixed(k as usize)),
                (None, Some(f)) => Some(MaxFeatures::Fraction(f)),
                _ => None,
            },
            _ => None,
        };
        parsed.ok_or_else(|| HtError::Trial(format!("invalid max_features: {}", value)))
    }

    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log2 => n.log2().floor() as usize,
            MaxFeatures::Fraction(f) => (n * f).floor() as usize,
            MaxFeatures::Fixed(k) => k,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Estimator settings, keyed the same way as the search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: Option<u64>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            random_state: None,
        }
    }
}

fn is_null(value: &ParameterValue) -> bool {
    matches!(value, ParameterValue::Json(Value::Null))
}

fn as_count(name: &str, value: &ParameterValue) -> HtResult<usize> {
    value
        .as_i64()
        .filter(|v| *v >= 0)
        .map(|v| v as usize)
        .ok_or_else(|| HtError::Trial(format!("{} must be a non-negative integer, got {}", name, value)))
}

impl ForestParams {
    /// Overlay `params` on the defaults; unknown names are rejected.
    pub fn from_parameters(params: &ParameterSet) -> HtResult<Self> {
        let mut forest = Self::default();
        for (name, value) in params {
            match name.as_str() {
                "n_estimators" => forest.n_estimators = as_count(name, value)?,
                "max_depth" if is_null(value) => forest.max_depth = None,
                "max_depth" => forest.max_depth = Some(as_count(name, value)?),
                "min_samples_split" => forest.min_samples_split = as_count(name, value)?,
                "min_samples_leaf" => forest.min_samples_leaf = as_count(name, value)?,
                "max_features" => forest.max_features = MaxFeatures::parse(value)?,
                "bootstrap" => match value {
                    ParameterValue::Json(Value::Bool(b)) => forest.bootstrap = *b,
                    other => {
                        return Err(HtError::Trial(format!("bootstrap must be a boolean, got {}", other)))
                    }
                },
                "random_state" if is_null(value) => forest.random_state = None,
                "random_state" => forest.random_state = Some(as_count(name, value)? as u64),
                other => {
                    return Err(HtError::Trial(format!(
                        "unsupported random forest parameter: {}",
                        other
                    )))
                }
            }
        }
        Ok(forest)
    }

    pub fn check(&self) -> HtResult<()> {
        if self.n_estimators == 0 {
            return Err(HtError::Trial("n_estimators must be at least 1".to_string()));
        }
        if self.max_depth == Some(0) {
            return Err(HtError::Trial("max_depth must be at least 1".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(HtError::Trial(format!(
                "min_samples_split must be at least 2, got {}",
                self.min_samples_split
            )));
        }
        if self.min_samples_leaf == 0 {
            return Err(HtError::Trial("min_samples_leaf must be at least 1".to_string()));
        }
        if let MaxFeatures::Fraction(f) = self.max_features {
            if !(f > 0.0 && f <= 1.0) {
                return Err(HtError::Trial(format!("max_features fraction must lie in (0, 1], got {}", f)));
            }
        }
        Ok(())
    }
}

/// Random forest regressor: bootstrap-sampled trees averaged at prediction.
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    params: ForestParams,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> HtResult<()> {
        self.params.check()?;
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(HtError::Trial(format!(
                "feature rows ({}) and targets ({}) differ",
                n_samples,
                y.len()
            )));
        }
        if n_samples == 0 {
            return Err(HtError::Trial("cannot fit on an empty training set".to_string()));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(HtError::Trial("training data contains non-finite values".to_string()));
        }

        let params = &self.params;
        let max_features = params.max_features.resolve(x.ncols());
        let base_seed = params.random_state.unwrap_or_else(|| rand::rng().random());

        // Per-tree seeds keep the forest independent of thread scheduling.
        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|tree_idx| -> HtResult<RegressionTree> {
                let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64));
                let rows: Vec<usize> = if params.bootstrap {
                    (0..n_samples).map(|_| rng.random_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };

                let mut tree = RegressionTree::new()
                    .with_max_depth(params.max_depth)
                    .with_min_samples_split(params.min_samples_split)
                    .with_min_samples_leaf(params.min_samples_leaf)
                    .with_max_features(Some(max_features));
                tree.fit_rows(x, y, &rows, &mut rng)?;
                Ok(tree)
            })
            .collect::<HtResult<Vec<RegressionTree>>>()?;

        self.trees = trees;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> HtResult<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(HtError::Trial("forest is not fitted".to_string()));
        }

        let per_tree = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<HtResult<Vec<Array1<f64>>>>()?;

        let mut total = Array1::<f64>::zeros(x.nrows());
        for predictions in &per_tree {
            total += predictions;
        }
        let n_trees = per_tree.len() as f64;
        total.mapv_inplace(|v| v / n_trees);
        Ok(total)
    }
}

/// Builds a [`RandomForestRegressor`] per trial.
#[derive(Debug, Clone)]
pub struct RandomForestFactory {
    /// Seed used when a parameter set carries no `random_state`.
    pub default_random_state: Option<u64>,
}

impl Default for RandomForestFactory {
    fn default() -> Self {
        Self {
            default_random_state: Some(0),
        }
    }
}

impl RandomForestFactory {
    pub fn new(default_random_state: Option<u64>) -> Self {
        Self {
            default_random_state,
        }
    }
}

impl EstimatorFactory for RandomForestFactory {
    fn build(&self, params: &ParameterSet) -> HtResult<Box<dyn Regressor>> {
        let mut forest = ForestParams::from_parameters(params)?;
        if !params.contains_key("random_state") {
            forest.random_state = self.default_random_state;
        }
        forest.check()?;
        Ok(Box::new(RandomForestRegressor::new(forest)))
    }

    fn name(&self) -> &str {
        "random_forest"
    }
}
