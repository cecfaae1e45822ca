//! MLflow-compatible REST store (`/api/2.0/mlflow/...`).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ht_types::{validation_error, HtResult, TrackingError};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::TrackingConfig;
use crate::store::TrackingStore;
use crate::types::{Experiment, Run, RunQuery, RunStatus, RunView};

const PARENT_RUN_TAG: &str = "mlflow.parentRunId";

#[derive(Debug, Clone)]
pub struct MlflowStore {
    client: Client,
    endpoint: String,
}

/// Outcome of one API call before it is mapped onto the error taxonomy.
#[derive(Debug)]
enum Reply {
    Body(Value),
    Rejected {
        status: StatusCode,
        error_code: String,
        message: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiExperiment {
    experiment_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiRun {
    info: ApiRunInfo,
    #[serde(default)]
    data: ApiRunData,
}

#[derive(Debug, Deserialize)]
struct ApiRunInfo {
    run_id: String,
    experiment_id: String,
    status: String,
    start_time: Option<i64>,
    end_time: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiRunData {
    #[serde(default)]
    metrics: Vec<ApiMetric>,
    #[serde(default)]
    params: Vec<ApiTag>,
    #[serde(default)]
    tags: Vec<ApiTag>,
}

#[derive(Debug, Deserialize)]
struct ApiMetric {
    key: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct ApiTag {
    key: String,
    value: String,
}

fn millis_to_utc(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::<Utc>::from_timestamp_millis)
}

impl From<ApiRun> for Run {
    fn from(api: ApiRun) -> Self {
        let parent_run_id = api
            .data
            .tags
            .iter()
            .find(|t| t.key == PARENT_RUN_TAG)
            .map(|t| t.value.clone());
        Run {
            run_id: api.info.run_id,
            experiment_id: api.info.experiment_id,
            parent_run_id,
            params: api.data.params.into_iter().map(|p| (p.key, p.value)).collect(),
            // MLflow keeps a metric history; the last entry wins.
            metrics: api.data.metrics.into_iter().map(|m| (m.key, m.value)).collect(),
            status: RunStatus::from_mlflow(&api.info.status).unwrap_or(RunStatus::Running),
            created_at: millis_to_utc(api.info.start_time).unwrap_or_else(Utc::now),
            finished_at: millis_to_utc(api.info.end_time),
        }
    }
}

fn parse_run(body: Value) -> HtResult<Run> {
    let envelope = body.get("run").cloned().unwrap_or(Value::Null);
    let run: ApiRun = serde_json::from_value(envelope)?;
    Ok(run.into())
}

fn log_batch_body(
    run_id: &str,
    params: &BTreeMap<String, String>,
    metrics: &BTreeMap<String, f64>,
    timestamp_ms: i64,
) -> Value {
    json!({
        "run_id": run_id,
        "params": params
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect::<Vec<_>>(),
        "metrics": metrics
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v, "timestamp": timestamp_ms, "step": 0 }))
            .collect::<Vec<_>>(),
    })
}

fn create_run_body(experiment_id: &str, parent_run_id: Option<&str>, start_ms: i64) -> Value {
    let tags: Vec<Value> = parent_run_id
        .map(|parent| json!({ "key": PARENT_RUN_TAG, "value": parent }))
        .into_iter()
        .collect();
    json!({
        "experiment_id": experiment_id,
        "start_time": start_ms,
        "tags": tags,
    })
}

fn search_body(query: &RunQuery) -> Value {
    let mut order_by = Vec::new();
    if let Some(metric) = &query.order_by {
        let direction = if query.ascending { "ASC" } else { "DESC" };
        order_by.push(format!("metrics.`{}` {}", metric, direction));
    }
    order_by.push("attributes.start_time ASC".to_string());

    let mut body = json!({
        "experiment_ids": [query.experiment_id],
        "order_by": order_by,
        "run_view_type": "ACTIVE_ONLY",
    });
    if query.view == RunView::CompletedOnly {
        body["filter"] = json!("attributes.status = 'FINISHED'");
    }
    if let Some(limit) = query.limit {
        body["max_results"] = json!(limit);
    }
    body
}

impl MlflowStore {
    pub fn new(config: &TrackingConfig) -> HtResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TrackingError::Request {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.endpoint, path)
    }

    async fn send(&self, request: RequestBuilder) -> HtResult<Reply> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                TrackingError::Unavailable {
                    endpoint: self.endpoint.clone(),
                    message: e.to_string(),
                }
            } else {
                TrackingError::Request {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| TrackingError::Request {
            message: format!("failed to read response body: {}", e),
        })?;

        if status.is_success() {
            let body = if text.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&text)?
            };
            return Ok(Reply::Body(body));
        }

        let api: ApiError = serde_json::from_str(&text).unwrap_or_default();
        Ok(Reply::Rejected {
            status,
            error_code: api.error_code,
            message: if api.message.is_empty() { text } else { api.message },
        })
    }

    async fn post(&self, path: &str, body: &Value) -> HtResult<Value> {
        let reply = self.send(self.client.post(self.url(path)).json(body)).await?;
        expect_body(path, reply)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> HtResult<Reply> {
        self.send(self.client.get(self.url(path)).query(query)).await
    }
}

fn expect_body(path: &str, reply: Reply) -> HtResult<Value> {
    match reply {
        Reply::Body(body) => Ok(body),
        Reply::Rejected {
            status,
            error_code,
            message,
        } => Err(TrackingError::Request {
            message: format!("{} returned {} {}: {}", path, status, error_code, message),
        }
        .into()),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl TrackingStore for MlflowStore {
    async fn ping(&self) -> HtResult<()> {
        self.post("experiments/search", &json!({ "max_results": 1 }))
            .await
            .map(|_| ())
    }

    async fn get_experiment_by_name(&self, name: &str) -> HtResult<Option<Experiment>> {
        let reply = self
            .get("experiments/get-by-name", &[("experiment_name", name)])
            .await?;
        if let Reply::Rejected { error_code, .. } = &reply {
            if error_code == "RESOURCE_DOES_NOT_EXIST" {
                return Ok(None);
            }
        }

        let body = expect_body("experiments/get-by-name", reply)?;
        let experiment: ApiExperiment =
            serde_json::from_value(body.get("experiment").cloned().unwrap_or(Value::Null))?;
        Ok(Some(Experiment {
            experiment_id: experiment.experiment_id,
            name: experiment.name,
        }))
    }

    async fn create_experiment(&self, name: &str) -> HtResult<Experiment> {
        let reply = self
            .send(
                self.client
                    .post(self.url("experiments/create"))
                    .json(&json!({ "name": name })),
            )
            .await?;
        if let Reply::Rejected { error_code, .. } = &reply {
            if error_code == "RESOURCE_ALREADY_EXISTS" {
                return Err(TrackingError::ExperimentAlreadyExists {
                    name: name.to_string(),
                }
                .into());
            }
        }

        let body = expect_body("experiments/create", reply)?;
        let experiment_id = body
            .get("experiment_id")
            .and_then(Value::as_str)
            .ok_or_else(|| TrackingError::Request {
                message: "experiments/create response lacks experiment_id".to_string(),
            })?;
        tracing::info!("Created experiment {} ({})", name, experiment_id);
        Ok(Experiment {
            experiment_id: experiment_id.to_string(),
            name: name.to_string(),
        })
    }

    async fn create_run(&self, experiment_id: &str, parent_run_id: Option<&str>) -> HtResult<Run> {
        let body = self
            .post("runs/create", &create_run_body(experiment_id, parent_run_id, now_ms()))
            .await?;
        let mut run = parse_run(body)?;
        // Older servers do not echo tags back.
        if run.parent_run_id.is_none() {
            run.parent_run_id = parent_run_id.map(str::to_string);
        }
        Ok(run)
    }

    async fn get_run(&self, run_id: &str) -> HtResult<Run> {
        let reply = self.get("runs/get", &[("run_id", run_id)]).await?;
        if let Reply::Rejected { error_code, .. } = &reply {
            if error_code == "RESOURCE_DOES_NOT_EXIST" {
                return Err(TrackingError::RunNotFound {
                    run_id: run_id.to_string(),
                }
                .into());
            }
        }
        parse_run(expect_body("runs/get", reply)?)
    }

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> HtResult<()> {
        if params.is_empty() {
            return Ok(());
        }
        let body = log_batch_body(run_id, params, &BTreeMap::new(), now_ms());
        self.post("runs/log-batch", &body).await.map(|_| ())
    }

    async fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> HtResult<()> {
        if let Some((key, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(validation_error!("metric {} is not finite: {}", key, value));
        }
        if metrics.is_empty() {
            return Ok(());
        }
        let body = log_batch_body(run_id, &BTreeMap::new(), metrics, now_ms());
        self.post("runs/log-batch", &body).await.map(|_| ())
    }

    async fn finalize_run(&self, run_id: &str, status: RunStatus) -> HtResult<()> {
        if !status.is_terminal() {
            return Err(validation_error!("cannot finalize run {} as {}", run_id, status));
        }
        let body = json!({
            "run_id": run_id,
            "status": status.as_mlflow(),
            "end_time": now_ms(),
        });
        self.post("runs/update", &body).await.map(|_| ())
    }

    async fn search_runs(&self, query: &RunQuery) -> HtResult<Vec<Run>> {
        let body = self.post("runs/search", &search_body(query)).await?;
        let runs: Vec<ApiRun> =
            serde_json::from_value(body.get("runs").cloned().unwrap_or_else(|| json!([])))?;

        // Re-rank locally so ties and missing metrics match the other stores.
        let mut runs: Vec<Run> = runs.into_iter().map(Run::from).collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(query.apply(runs))
    }

    fn name(&self) -> &str {
        "mlflow"
    }
}
