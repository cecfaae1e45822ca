use ht_tracking::{Run, RunQuery, TrackingClient};
use ht_types::HtResult;
use tracing::info;

/// Picks the best completed run of an experiment by one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestRunSelector {
    pub metric: String,
    pub ascending: bool,
}

impl BestRunSelector {
    /// Lower is better.
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            ascending: true,
        }
    }

    /// Higher is better.
    pub fn maximizing(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            ascending: false,
        }
    }

    pub fn query(&self, experiment_id: &str) -> RunQuery {
        RunQuery::new(experiment_id)
            .order_by(self.metric.clone(), self.ascending)
            .limit(1)
    }

    /// `Ok(None)` when no completed run carries the metric.
    pub async fn select(&self, client: &TrackingClient, experiment_id: &str) -> HtResult<Option<Run>> {
        let best = client
            .search_runs(&self.query(experiment_id))
            .await?
            .into_iter()
            .next()
            .filter(|run| run.metric(&self.metric).is_some());

        match &best {
            Some(run) => info!(
                "Best run {}: {} = {}",
                run.run_id,
                self.metric,
                run.metric(&self.metric).unwrap_or(f64::NAN)
            ),
            None => info!("No completed run in experiment {} logged {}", experiment_id, self.metric),
        }
        Ok(best)
    }
}
