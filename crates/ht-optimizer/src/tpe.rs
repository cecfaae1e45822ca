//! Tree-structured Parzen estimator search.
//!
//! Successful trials are split at the `gamma` quantile of their loss into a
//! "good" and a "bad" group; failed trials always land in the bad group. Each
//! parameter gets one density per group, candidates are drawn from the good
//! density, and the candidate with the highest good/bad likelihood ratio wins.

use ht_types::{config_error, HtResult};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::search::{
    quantized_bounds, seeded_rng, ParameterKind, ParameterSet, ParameterSpec, ParameterValue,
    SearchSpace, SearchStrategy,
};
use crate::trial::{TrialHistory, TrialResult};

/// Tunable constants of the estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpeConfig {
    /// Fraction of successful trials treated as "good".
    pub gamma: f64,
    /// Trials sampled uniformly before the densities take over.
    pub n_startup: usize,
    /// Draws from the good density scored per parameter.
    pub n_candidates: usize,
    /// Multiplier on each kernel's neighbour-distance bandwidth.
    pub bandwidth: f64,
    /// Weight of the uniform prior mixed into both densities.
    pub prior_weight: f64,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            gamma: 0.25,
            n_startup: 10,
            n_candidates: 24,
            bandwidth: 1.0,
            prior_weight: 1.0,
        }
    }
}

impl TpeConfig {
    pub fn check(&self) -> HtResult<()> {
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(config_error!("gamma must lie in (0, 1), got {}", self.gamma));
        }
        if self.n_candidates == 0 {
            return Err(config_error!("n_candidates must be at least 1"));
        }
        if !(self.bandwidth > 0.0) || !self.bandwidth.is_finite() {
            return Err(config_error!("bandwidth must be positive, got {}", self.bandwidth));
        }
        if !(self.prior_weight > 0.0) || !self.prior_weight.is_finite() {
            return Err(config_error!("prior_weight must be positive, got {}", self.prior_weight));
        }
        Ok(())
    }
}

/// Sequential model-based search over a [`SearchSpace`].
#[derive(Debug, Clone)]
pub struct TpeSearch {
    space: SearchSpace,
    config: TpeConfig,
    rng: ChaCha8Rng,
    history: TrialHistory,
}

impl TpeSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> HtResult<Self> {
        Self::with_config(space, TpeConfig::default(), seed)
    }

    pub fn with_config(space: SearchSpace, config: TpeConfig, seed: Option<u64>) -> HtResult<Self> {
        space.check()?;
        config.check()?;
        Ok(Self {
            space,
            config,
            rng: seeded_rng(seed),
            history: TrialHistory::new(),
        })
    }

    pub fn config(&self) -> &TpeConfig {
        &self.config
    }
}

impl SearchStrategy for TpeSearch {
    fn suggest(&mut self) -> HtResult<ParameterSet> {
        let Self {
            space,
            config,
            rng,
            history,
        } = self;

        if history.len() < config.n_startup {
            debug!("warm-up trial {} of {}: sampling uniformly", history.len() + 1, config.n_startup);
            return Ok(space.sample_uniform(rng));
        }

        let Some((good, bad)) = split_trials(history, config.gamma) else {
            debug!("no successful trials to condition on: sampling uniformly");
            return Ok(space.sample_uniform(rng));
        };

        debug!("conditioning on {} good / {} bad trials", good.len(), bad.len());
        Ok(space
            .parameters
            .iter()
            .map(|spec| (spec.name.clone(), sample_parameter(spec, &good, &bad, config, rng)))
            .collect())
    }

    fn observe(&mut self, result: TrialResult) {
        self.history.push(result);
    }

    fn history(&self) -> &TrialHistory {
        &self.history
    }

    fn space(&self) -> &SearchSpace {
        &self.space
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

/// Split at the gamma quantile; `None` when no trial succeeded.
fn split_trials(
    history: &TrialHistory,
    gamma: f64,
) -> Option<(Vec<&TrialResult>, Vec<&TrialResult>)> {
    let ranked = history.ranked();
    if ranked.is_empty() {
        return None;
    }

    let n_good = ((ranked.len() as f64) * gamma).ceil() as usize;
    let n_good = n_good.clamp(1, ranked.len());

    let good = ranked[..n_good].to_vec();
    let mut bad = ranked[n_good..].to_vec();
    bad.extend(history.failed());
    Some((good, bad))
}

fn observed<'a>(
    trials: &'a [&'a TrialResult],
    name: &'a str,
) -> impl Iterator<Item = &'a ParameterValue> + 'a {
    trials.iter().filter_map(move |t| t.parameters.get(name))
}

fn sample_parameter<R: Rng>(
    spec: &ParameterSpec,
    good: &[&TrialResult],
    bad: &[&TrialResult],
    config: &TpeConfig,
    rng: &mut R,
) -> ParameterValue {
    match &spec.kind {
        ParameterKind::Fixed { value } => value.clone(),
        ParameterKind::Categorical { choices } => {
            sample_categorical(&spec.name, choices, good, bad, config, rng)
        }
        ParameterKind::IntUniform { low, high } => {
            ParameterValue::Int(sample_ordinal(&spec.name, *low, *high, 1, good, bad, config, rng))
        }
        ParameterKind::IntQuantized { low, high, step } => {
            match quantized_bounds(*low, *high, *step) {
                Some((k_min, k_max)) => ParameterValue::Int(
                    sample_ordinal(&spec.name, k_min, k_max, *step, good, bad, config, rng) * step,
                ),
                None => spec.sample_uniform(rng),
            }
        }
        ParameterKind::Uniform { low, high } => ParameterValue::Float(sample_continuous(
            &spec.name, *low, *high, false, good, bad, config, rng,
        )),
        ParameterKind::LogUniform { low, high } => ParameterValue::Float(sample_continuous(
            &spec.name, *low, *high, true, good, bad, config, rng,
        )),
    }
}

/// Returns the multiplier `k` in `[k_min, k_max]`; the value is `k * step`.
#[allow(clippy::too_many_arguments)]
fn sample_ordinal<R: Rng>(
    name: &str,
    k_min: i64,
    k_max: i64,
    step: i64,
    good: &[&TrialResult],
    bad: &[&TrialResult],
    config: &TpeConfig,
    rng: &mut R,
) -> i64 {
    let to_index = |v: &ParameterValue| {
        v.as_f64()
            .filter(|x| x.is_finite())
            .map(|x| (x / step as f64).round().clamp(k_min as f64, k_max as f64))
    };
    let good_obs: Vec<f64> = observed(good, name).filter_map(to_index).collect();
    let bad_obs: Vec<f64> = observed(bad, name).filter_map(to_index).collect();

    let low = k_min as f64 - 0.5;
    let high = k_max as f64 + 0.5;
    let l = Parzen::fit(&good_obs, low, high, config);
    let g = Parzen::fit(&bad_obs, low, high, config);

    let mut best = (f64::NEG_INFINITY, k_min);
    for _ in 0..config.n_candidates {
        let k = l.sample(rng).round().clamp(k_min as f64, k_max as f64);
        let score = l.pdf(k).ln() - g.pdf(k).ln();
        if score > best.0 {
            best = (score, k as i64);
        }
    }
    best.1
}

#[allow(clippy::too_many_arguments)]
fn sample_continuous<R: Rng>(
    name: &str,
    low: f64,
    high: f64,
    log_scale: bool,
    good: &[&TrialResult],
    bad: &[&TrialResult],
    config: &TpeConfig,
    rng: &mut R,
) -> f64 {
    let forward = |x: f64| if log_scale { x.max(f64::MIN_POSITIVE).ln() } else { x };
    let (t_low, t_high) = (forward(low), forward(high));
    let to_space = |v: &ParameterValue| {
        v.as_f64()
            .filter(|x| x.is_finite())
            .map(|x| forward(x).clamp(t_low, t_high))
    };
    let good_obs: Vec<f64> = observed(good, name).filter_map(to_space).collect();
    let bad_obs: Vec<f64> = observed(bad, name).filter_map(to_space).collect();

    let l = Parzen::fit(&good_obs, t_low, t_high, config);
    let g = Parzen::fit(&bad_obs, t_low, t_high, config);

    let mut best = (f64::NEG_INFINITY, t_low);
    for _ in 0..config.n_candidates {
        let x = l.sample(rng);
        let score = l.pdf(x).ln() - g.pdf(x).ln();
        if score > best.0 {
            best = (score, x);
        }
    }

    let value = if log_scale { best.1.exp() } else { best.1 };
    value.clamp(low, high)
}

fn sample_categorical<R: Rng>(
    name: &str,
    choices: &[serde_json::Value],
    good: &[&TrialResult],
    bad: &[&TrialResult],
    config: &TpeConfig,
    rng: &mut R,
) -> ParameterValue {
    let weights = |trials: &[&TrialResult]| -> Vec<f64> {
        choices
            .iter()
            .map(|choice| {
                let hits = observed(trials, name)
                    .filter(|v| matches!(v, ParameterValue::Json(j) if j == choice))
                    .count();
                config.prior_weight + hits as f64
            })
            .collect()
    };
    let l = weights(good);
    let g = weights(bad);
    let l_total: f64 = l.iter().sum();
    let g_total: f64 = g.iter().sum();

    let mut best = (f64::NEG_INFINITY, 0usize);
    for _ in 0..config.n_candidates {
        let mut r = rng.random::<f64>() * l_total;
        let mut idx = choices.len() - 1;
        for (i, w) in l.iter().enumerate() {
            if r < *w {
                idx = i;
                break;
            }
            r -= w;
        }
        let score = (l[idx] / l_total).ln() - (g[idx] / g_total).ln();
        if score > best.0 {
            best = (score, idx);
        }
    }
    ParameterValue::Json(choices[best.1].clone())
}

fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // Box-Muller transform
    let u1: f64 = rng.random::<f64>().max(1e-12);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Adaptive Parzen window: one Gaussian per observation plus a uniform prior,
/// truncated to `[low, high]`.
#[derive(Debug, Clone)]
struct Parzen {
    low: f64,
    high: f64,
    components: Vec<(f64, f64)>,
    prior_weight: f64,
}

impl Parzen {
    fn fit(observations: &[f64], low: f64, high: f64, config: &TpeConfig) -> Self {
        let width = high - low;
        let mut mus = observations.to_vec();
        mus.sort_by(|a, b| a.total_cmp(b));

        let n = mus.len();
        let max_sigma = width.max(0.0);
        let min_sigma = max_sigma / ((n + 1).min(100) as f64);

        // Each kernel is as wide as the larger gap to its neighbours.
        let components = mus
            .iter()
            .enumerate()
            .map(|(i, &mu)| {
                let left = if i == 0 { mu - low } else { mu - mus[i - 1] };
                let right = if i + 1 == n { high - mu } else { mus[i + 1] - mu };
                let sigma = (left.max(right) * config.bandwidth).clamp(min_sigma, max_sigma);
                (mu, sigma)
            })
            .collect();

        Self {
            low,
            high,
            components,
            prior_weight: config.prior_weight,
        }
    }

    fn width(&self) -> f64 {
        self.high - self.low
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let width = self.width();
        if width <= 0.0 {
            return self.low;
        }

        let total = self.components.len() as f64 + self.prior_weight;
        let r = rng.random::<f64>() * total;
        if r < self.prior_weight || self.components.is_empty() {
            return self.low + rng.random::<f64>() * width;
        }

        let idx = ((r - self.prior_weight) as usize).min(self.components.len() - 1);
        let (mu, sigma) = self.components[idx];
        (mu + sigma * standard_normal(rng)).clamp(self.low, self.high)
    }

    fn pdf(&self, x: f64) -> f64 {
        let width = self.width();
        if width <= 0.0 {
            return 1.0;
        }

        let norm = (2.0 * std::f64::consts::PI).sqrt();
        let kernels: f64 = self
            .components
            .iter()
            .map(|&(mu, sigma)| {
                if sigma <= 0.0 {
                    return 0.0;
                }
                let z = (x - mu) / sigma;
                (-0.5 * z * z).exp() / (sigma * norm)
            })
            .sum();

        (self.prior_weight / width + kernels) / (self.components.len() as f64 + self.prior_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::RandomSearch;
    use serde_json::json;

    fn quick_config() -> TpeConfig {
        TpeConfig {
            n_startup: 5,
            ..TpeConfig::default()
        }
    }

    fn mixed_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("max_depth", 1, 20)
            .add_quantized("n_estimators", 10, 50, 1)
            .add_log_uniform("learning_rate", 1e-3, 1.0)
            .add_choice("criterion", vec![json!("squared_error"), json!("friedman_mse")])
            .add_fixed("random_state", ParameterValue::Int(42))
    }

    fn loss_of(params: &ParameterSet) -> f64 {
        let depth = params["max_depth"].as_f64().unwrap();
        let trees = params["n_estimators"].as_f64().unwrap();
        (depth - 3.0).abs() + (trees - 30.0).abs() / 10.0
    }

    fn drive(search: &mut dyn SearchStrategy, n: usize) -> Vec<ParameterSet> {
        let mut proposals = Vec::new();
        for i in 0..n {
            let params = search.suggest().unwrap();
            let loss = loss_of(&params);
            search.observe(TrialResult::ok(i, params.clone(), loss));
            proposals.push(params);
        }
        proposals
    }

    #[test]
    fn same_seed_reproduces_proposals() {
        let mut a = TpeSearch::with_config(mixed_space(), quick_config(), Some(42)).unwrap();
        let mut b = TpeSearch::with_config(mixed_space(), quick_config(), Some(42)).unwrap();
        assert_eq!(drive(&mut a, 30), drive(&mut b, 30));
    }

    #[test]
    fn warm_up_matches_uniform_sampling() {
        let mut tpe = TpeSearch::new(mixed_space(), Some(9)).unwrap();
        let mut random = RandomSearch::new(mixed_space(), Some(9)).unwrap();
        for _ in 0..tpe.config().n_startup {
            assert_eq!(tpe.suggest().unwrap(), random.suggest().unwrap());
        }
    }

    #[test]
    fn proposals_stay_in_domain() {
        let space = mixed_space();
        let mut tpe = TpeSearch::with_config(space.clone(), quick_config(), Some(1)).unwrap();
        for params in drive(&mut tpe, 60) {
            assert!(space.validate(&params), "invalid proposal: {params:?}");
            assert!(matches!(params["n_estimators"], ParameterValue::Int(_)));
        }
    }

    #[test]
    fn all_failed_history_falls_back_to_random() {
        let space = mixed_space();
        let mut tpe = TpeSearch::with_config(space.clone(), quick_config(), Some(5)).unwrap();
        for i in 0..12 {
            let params = tpe.suggest().unwrap();
            tpe.observe(TrialResult::failed(i, params, "estimator rejected parameters"));
        }
        let params = tpe.suggest().unwrap();
        assert!(space.validate(&params));
        assert_eq!(tpe.history().failed_count(), 12);
    }

    #[test]
    fn concentrates_near_the_optimum() {
        let space = SearchSpace::new().add_int("max_depth", 0, 20).add_quantized(
            "n_estimators",
            10,
            50,
            1,
        );
        let mut tpe = TpeSearch::with_config(space, quick_config(), Some(42)).unwrap();
        let proposals = drive(&mut tpe, 40);

        let late_error: f64 = proposals[20..]
            .iter()
            .map(|p| (p["max_depth"].as_f64().unwrap() - 3.0).abs())
            .sum::<f64>()
            / 20.0;
        // Uniform sampling over [0, 20] averages about 7.6.
        assert!(late_error < 5.0, "mean distance from optimum was {late_error}");
    }

    #[test]
    fn failed_trials_count_as_bad() {
        let mut history = TrialHistory::new();
        let mut p = ParameterSet::new();
        p.insert("x".into(), ParameterValue::Int(1));
        history.push(TrialResult::ok(0, p.clone(), 1.0));
        history.push(TrialResult::ok(1, p.clone(), 2.0));
        history.push(TrialResult::failed(2, p.clone(), "boom"));

        let (good, bad) = split_trials(&history, 0.25).unwrap();
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].trial_number, 0);
        assert_eq!(bad.len(), 2);
        assert!(bad.iter().any(|t| t.trial_number == 2));
    }

    #[test]
    fn config_is_validated() {
        let bad_gamma = TpeConfig {
            gamma: 1.5,
            ..TpeConfig::default()
        };
        assert!(TpeSearch::with_config(mixed_space(), bad_gamma, None).is_err());
        assert!(TpeSearch::new(SearchSpace::new().add_int("x", 5, 1), None).is_err());
    }

    #[test]
    fn parzen_density_prefers_observations() {
        let config = TpeConfig::default();
        let parzen = Parzen::fit(&[2.0, 2.5, 3.0], 0.0, 20.0, &config);
        assert!(parzen.pdf(2.5) > parzen.pdf(15.0));

        let empty = Parzen::fit(&[], 0.0, 20.0, &config);
        assert!((empty.pdf(3.0) - 1.0 / 20.0).abs() < 1e-12);
    }
}
