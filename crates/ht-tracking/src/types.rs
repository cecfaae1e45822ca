use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named grouping of runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Status string used on the MLflow wire.
    pub fn as_mlflow(self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn from_mlflow(status: &str) -> Option<Self> {
        match status {
            "RUNNING" | "SCHEDULED" => Some(RunStatus::Running),
            "FINISHED" => Some(RunStatus::Completed),
            "FAILED" | "KILLED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A single recorded execution: its params, metrics and lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub experiment_id: String,
    pub parent_run_id: Option<String>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        run_id: impl Into<String>,
        experiment_id: impl Into<String>,
        parent_run_id: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            experiment_id: experiment_id.into(),
            parent_run_id,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            status: RunStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Which run statuses a query considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunView {
    /// Successfully finished runs only.
    #[default]
    CompletedOnly,
    /// Every run regardless of status.
    All,
}

/// Filter, order and limit for [`crate::TrackingStore::search_runs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQuery {
    pub experiment_id: String,
    /// Metric to order by; `None` keeps creation order.
    pub order_by: Option<String>,
    pub ascending: bool,
    pub limit: Option<usize>,
    pub view: RunView,
}

impl RunQuery {
    pub fn new(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            order_by: None,
            ascending: true,
            limit: None,
            view: RunView::default(),
        }
    }

    pub fn order_by(mut self, metric: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some(metric.into());
        self.ascending = ascending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn view(mut self, view: RunView) -> Self {
        self.view = view;
        self
    }

    pub fn admits(&self, run: &Run) -> bool {
        run.experiment_id == self.experiment_id
            && match self.view {
                RunView::CompletedOnly => run.status == RunStatus::Completed,
                RunView::All => true,
            }
    }

    /// Filter, order and truncate `runs`, which must arrive in creation order.
    ///
    /// Runs missing the order metric sort last; equal metrics keep creation
    /// order.
    pub fn apply(&self, runs: Vec<Run>) -> Vec<Run> {
        let mut selected: Vec<Run> = runs.into_iter().filter(|r| self.admits(r)).collect();

        if let Some(metric) = &self.order_by {
            selected.sort_by(|a, b| match (a.metric(metric), b.metric(metric)) {
                (Some(x), Some(y)) if self.ascending => x.total_cmp(&y),
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}
