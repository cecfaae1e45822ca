//! Trial outcomes and the append-only history strategies condition on.

use serde::{Deserialize, Serialize};

use crate::search::ParameterSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Ok,
    Failed,
}

/// Result of a single trial. Failed trials carry an infinite loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Zero-based position of the trial within the search.
    pub trial_number: usize,
    pub parameters: ParameterSet,
    pub loss: f64,
    pub status: TrialStatus,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl TrialResult {
    pub fn ok(trial_number: usize, parameters: ParameterSet, loss: f64) -> Self {
        Self {
            trial_number,
            parameters,
            loss,
            status: TrialStatus::Ok,
            error: None,
            duration_ms: None,
        }
    }

    pub fn failed(trial_number: usize, parameters: ParameterSet, error: impl Into<String>) -> Self {
        Self {
            trial_number,
            parameters,
            loss: f64::INFINITY,
            status: TrialStatus::Failed,
            error: Some(error.into()),
            duration_ms: None,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == TrialStatus::Ok
    }
}

/// Ordered, append-only record of evaluated trials.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialHistory {
    trials: Vec<TrialResult>,
}

impl TrialHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: TrialResult) {
        self.trials.push(result);
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrialResult> {
        self.trials.iter()
    }

    pub fn as_slice(&self) -> &[TrialResult] {
        &self.trials
    }

    pub fn completed(&self) -> impl Iterator<Item = &TrialResult> {
        self.trials.iter().filter(|t| t.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TrialResult> {
        self.trials.iter().filter(|t| !t.is_ok())
    }

    pub fn completed_count(&self) -> usize {
        self.completed().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    /// Lowest-loss successful trial; the earliest wins a tie.
    pub fn best(&self) -> Option<&TrialResult> {
        self.completed().fold(None, |best: Option<&TrialResult>, trial| match best {
            Some(current) if current.loss <= trial.loss => Some(current),
            _ => Some(trial),
        })
    }

    /// Successful trials ordered by loss, stable in evaluation order.
    pub fn ranked(&self) -> Vec<&TrialResult> {
        let mut ranked: Vec<&TrialResult> = self.completed().collect();
        ranked.sort_by(|a, b| a.loss.total_cmp(&b.loss));
        ranked
    }
}
