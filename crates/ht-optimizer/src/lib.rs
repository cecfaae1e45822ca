//! # ht-optimizer
//!
//! Hyperparameter search for Hypertrack.
//!
//! Provides search space definitions with domain validation, the append-only
//! trial history, and the proposal strategies (uniform random and
//! tree-structured Parzen estimator) that condition on it.

mod search;
mod tpe;
mod trial;

pub use search::{
    seeded_rng, ParameterKind, ParameterSet, ParameterSpec, ParameterValue, RandomSearch,
    SearchSpace, SearchStrategy,
};
pub use tpe::{TpeConfig, TpeSearch};
pub use trial::{TrialHistory, TrialResult, TrialStatus};
