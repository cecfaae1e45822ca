use ndarray::{Array1, Array2};

use crate::errors::{DataError, HtResult};

/// A numeric feature matrix paired with its regression targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub target_name: String,
    pub features: Array2<f64>,
    pub targets: Array1<f64>,
}

impl Dataset {
    pub fn new(
        feature_names: Vec<String>,
        target_name: impl Into<String>,
        features: Array2<f64>,
        targets: Array1<f64>,
    ) -> HtResult<Self> {
        if features.nrows() != targets.len() {
            return Err(DataError::ShapeMismatch {
                expected: format!("{} targets", features.nrows()),
                actual: format!("{} targets", targets.len()),
            }
            .into());
        }
        if features.ncols() != feature_names.len() {
            return Err(DataError::ShapeMismatch {
                expected: format!("{} feature names", features.ncols()),
                actual: format!("{} feature names", feature_names.len()),
            }
            .into());
        }
        if features.nrows() == 0 {
            return Err(DataError::InsufficientData {
                message: "dataset has no rows".to_string(),
            }
            .into());
        }

        Ok(Self {
            feature_names,
            target_name: target_name.into(),
            features,
            targets,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }
}

/// The fixed training/validation pair every trial is scored against.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplit {
    pub train: Dataset,
    pub valid: Dataset,
}

impl DataSplit {
    pub fn new(train: Dataset, valid: Dataset) -> HtResult<Self> {
        if train.feature_names != valid.feature_names {
            return Err(DataError::InvalidFormat {
                message: format!(
                    "training features {:?} do not match validation features {:?}",
                    train.feature_names, valid.feature_names
                ),
            }
            .into());
        }
        Ok(Self { train, valid })
    }
}
