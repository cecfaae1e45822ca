use std::time::Duration;

use ht_types::{config_error, HtResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5050";
pub const DEFAULT_EXPERIMENT_NAME: &str = "random-forest-hyperopt";
pub const ENV_TRACKING_URI: &str = "HT_TRACKING_URI";
pub const ENV_EXPERIMENT_NAME: &str = "HT_EXPERIMENT_NAME";

/// Which store implementation an endpoint resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// MLflow-compatible REST API over http(s).
    Rest,
    /// In-process store, lost on exit.
    Memory,
}

/// Connection settings for the tracking store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Store address, e.g. `http://127.0.0.1:5050` or `memory://`.
    pub endpoint: String,
    /// Experiment that groups every run of a search.
    pub experiment_name: String,
    pub request_timeout: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            experiment_name: DEFAULT_EXPERIMENT_NAME.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl TrackingConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_experiment_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = name.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Defaults overridden by `HT_TRACKING_URI` / `HT_EXPERIMENT_NAME`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut config = Self::default();
        if let Some(endpoint) = lookup(ENV_TRACKING_URI).filter(|v| !v.trim().is_empty()) {
            config.endpoint = endpoint;
        }
        if let Some(name) = lookup(ENV_EXPERIMENT_NAME).filter(|v| !v.trim().is_empty()) {
            config.experiment_name = name;
        }
        config
    }

    pub fn backend(&self) -> HtResult<Backend> {
        let endpoint = self.endpoint.trim();
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Ok(Backend::Rest)
        } else if endpoint.starts_with("memory://") {
            Ok(Backend::Memory)
        } else {
            Err(config_error!(
                "unsupported tracking endpoint {:?}: expected http://, https:// or memory://",
                self.endpoint
            ))
        }
    }

    pub fn check(&self) -> HtResult<()> {
        self.backend()?;
        if self.experiment_name.trim().is_empty() {
            return Err(config_error!("experiment name must not be empty"));
        }
        if self.request_timeout.is_zero() {
            return Err(config_error!("request timeout must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = TrackingConfig::default();
        assert_eq!(config.endpoint, "http://127.0.0.1:5050");
        assert_eq!(config.experiment_name, "random-forest-hyperopt");
        assert_eq!(config.backend().unwrap(), Backend::Rest);
        assert!(config.check().is_ok());
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            (ENV_TRACKING_URI, "memory://"),
            (ENV_EXPERIMENT_NAME, "nightly"),
        ]
        .into_iter()
        .collect();
        let config = TrackingConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.backend().unwrap(), Backend::Memory);
        assert_eq!(config.experiment_name, "nightly");

        let blank = TrackingConfig::from_lookup(|_| Some("  ".to_string()));
        assert_eq!(blank, TrackingConfig::default());
    }

    #[test]
    fn unknown_scheme_is_a_config_error() {
        let err = TrackingConfig::new("ftp://tracking").backend().unwrap_err();
        assert!(matches!(err, ht_types::HtError::Config(_)));
        assert!(TrackingConfig::new("memory://").with_experiment_name("").check().is_err());
    }
}
