//! Search space definitions, domain validation and uniform sampling.

use std::collections::{BTreeMap, HashSet};

use ht_types::{config_error, validation_error, HtResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::trial::{TrialHistory, TrialResult};

/// A fully resolved parameter assignment, one value per declared parameter.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name as passed to the estimator (e.g. "max_depth").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Integer range [low, high] inclusive.
    IntUniform { low: i64, high: i64 },
    /// Multiples of `step` inside [low, high].
    IntQuantized { low: i64, high: i64, step: i64 },
    /// Continuous uniform range [low, high].
    Uniform { low: f64, high: f64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Categorical { choices: Vec<serde_json::Value> },
    /// A constant passed through unchanged.
    Fixed { value: ParameterValue },
}

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }

    /// Integer view; floats qualify only when they carry no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            Self::Float(_) => None,
            Self::Json(v) => v.as_i64(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Json(serde_json::Value::String(s)) => write!(f, "{s}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Smallest and largest multiplier `k` with `low <= k * step <= high`.
pub(crate) fn quantized_bounds(low: i64, high: i64, step: i64) -> Option<(i64, i64)> {
    if step <= 0 {
        return None;
    }
    let k_min = -(-low).div_euclid(step);
    let k_max = high.div_euclid(step);
    (k_min <= k_max).then_some((k_min, k_max))
}

impl ParameterSpec {
    /// Check the definition itself: ordered bounds, positive step, non-empty choices.
    pub fn check_definition(&self) -> HtResult<()> {
        match &self.kind {
            ParameterKind::IntUniform { low, high } => {
                if low > high {
                    return Err(config_error!("{}: low {} > high {}", self.name, low, high));
                }
            }
            ParameterKind::IntQuantized { low, high, step } => {
                if low > high {
                    return Err(config_error!("{}: low {} > high {}", self.name, low, high));
                }
                if *step <= 0 {
                    return Err(config_error!("{}: step must be positive, got {}", self.name, step));
                }
                if quantized_bounds(*low, *high, *step).is_none() {
                    return Err(config_error!(
                        "{}: no multiple of {} lies in [{}, {}]",
                        self.name,
                        step,
                        low,
                        high
                    ));
                }
            }
            ParameterKind::Uniform { low, high } => {
                if !low.is_finite() || !high.is_finite() || low > high {
                    return Err(config_error!("{}: invalid range [{}, {}]", self.name, low, high));
                }
            }
            ParameterKind::LogUniform { low, high } => {
                if !low.is_finite() || !high.is_finite() || *low <= 0.0 || low > high {
                    return Err(config_error!(
                        "{}: log-uniform range must satisfy 0 < low <= high, got [{}, {}]",
                        self.name,
                        low,
                        high
                    ));
                }
            }
            ParameterKind::Categorical { choices } => {
                if choices.is_empty() {
                    return Err(config_error!("{}: categorical parameter has no choices", self.name));
                }
            }
            ParameterKind::Fixed { .. } => {}
        }
        Ok(())
    }

    /// Whether `value` lies inside this parameter's domain.
    ///
    /// Quantized values are rounded to the nearest multiple of their step
    /// before the bounds check.
    pub fn admits(&self, value: &ParameterValue) -> bool {
        match &self.kind {
            ParameterKind::IntUniform { low, high } => value
                .as_i64()
                .map_or(false, |v| (*low..=*high).contains(&v)),
            ParameterKind::IntQuantized { low, high, step } => {
                value.as_f64().filter(|v| v.is_finite()).map_or(false, |v| {
                    let step = *step as f64;
                    let rounded = (v / step).round() * step;
                    rounded >= *low as f64 && rounded <= *high as f64
                })
            }
            ParameterKind::Uniform { low, high } | ParameterKind::LogUniform { low, high } => {
                value.as_f64().map_or(false, |v| v >= *low && v <= *high)
            }
            ParameterKind::Categorical { choices } => match value {
                ParameterValue::Json(v) => choices.contains(v),
                ParameterValue::Int(v) => choices.contains(&serde_json::json!(v)),
                ParameterValue::Float(v) => choices.contains(&serde_json::json!(v)),
            },
            ParameterKind::Fixed { value: fixed } => fixed == value,
        }
    }

    /// Draw a value uniformly from the domain.
    pub fn sample_uniform<R: Rng>(&self, rng: &mut R) -> ParameterValue {
        match &self.kind {
            ParameterKind::IntUniform { low, high } => {
                ParameterValue::Int(rng.random_range(*low..=*high))
            }
            ParameterKind::IntQuantized { low, high, step } => {
                match quantized_bounds(*low, *high, *step) {
                    Some((k_min, k_max)) => ParameterValue::Int(rng.random_range(k_min..=k_max) * step),
                    None => ParameterValue::Int(*low),
                }
            }
            ParameterKind::Uniform { low, high } => {
                ParameterValue::Float(rng.random_range(*low..=*high))
            }
            ParameterKind::LogUniform { low, high } => {
                let log_val: f64 = rng.random_range(low.ln()..=high.ln());
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
            ParameterKind::Categorical { choices } => {
                let idx = rng.random_range(0..choices.len());
                ParameterValue::Json(choices[idx].clone())
            }
            ParameterKind::Fixed { value } => value.clone(),
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterSpec>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.push(name, ParameterKind::IntUniform { low, high })
    }

    pub fn add_quantized(self, name: impl Into<String>, low: i64, high: i64, step: i64) -> Self {
        self.push(name, ParameterKind::IntQuantized { low, high, step })
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::Uniform { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::LogUniform { low, high })
    }

    pub fn add_choice(self, name: impl Into<String>, choices: Vec<serde_json::Value>) -> Self {
        self.push(name, ParameterKind::Categorical { choices })
    }

    pub fn add_fixed(self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.push(name, ParameterKind::Fixed { value })
    }

    /// The random-forest space tuned by the default workflow.
    pub fn random_forest() -> Self {
        Self::new()
            .add_quantized("max_depth", 1, 20, 1)
            .add_quantized("n_estimators", 10, 50, 1)
            .add_quantized("min_samples_split", 2, 10, 1)
            .add_quantized("min_samples_leaf", 1, 4, 1)
            .add_fixed("random_state", ParameterValue::Int(42))
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Fail fast on a malformed space: duplicate names or invalid bounds.
    pub fn check(&self) -> HtResult<()> {
        if self.parameters.is_empty() {
            return Err(config_error!("search space declares no parameters"));
        }
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(config_error!("duplicate parameter name: {}", param.name));
            }
            param.check_definition()?;
        }
        Ok(())
    }

    /// Detailed domain check: every declared name present, no undeclared
    /// names, every value inside its domain.
    pub fn check_parameters(&self, params: &ParameterSet) -> HtResult<()> {
        for name in params.keys() {
            if self.get(name).is_none() {
                return Err(validation_error!("undeclared parameter: {}", name));
            }
        }
        for spec in &self.parameters {
            match params.get(&spec.name) {
                None => return Err(validation_error!("missing parameter: {}", spec.name)),
                Some(value) if !spec.admits(value) => {
                    return Err(validation_error!(
                        "{} = {} is outside its domain {:?}",
                        spec.name,
                        value,
                        spec.kind
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self, params: &ParameterSet) -> bool {
        self.check_parameters(params).is_ok()
    }

    /// Canonical form of an admitted parameter set: integer parameters become
    /// `Int`, quantized ones rounded to the nearest multiple of their step.
    pub fn normalize(&self, params: &ParameterSet) -> ParameterSet {
        params
            .iter()
            .map(|(name, value)| {
                let canonical = match self.get(name).map(|p| &p.kind) {
                    Some(ParameterKind::IntUniform { .. }) => value.as_i64().map(ParameterValue::Int),
                    Some(ParameterKind::IntQuantized { step, .. }) => value
                        .as_f64()
                        .filter(|v| v.is_finite())
                        .map(|v| ParameterValue::Int((v / *step as f64).round() as i64 * step)),
                    _ => None,
                };
                (name.clone(), canonical.unwrap_or_else(|| value.clone()))
            })
            .collect()
    }

    /// Draw every parameter uniformly, in declaration order.
    pub fn sample_uniform<R: Rng>(&self, rng: &mut R) -> ParameterSet {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.sample_uniform(rng)))
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the strategy RNG; `None` draws a fresh seed from the thread RNG.
pub fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    let seed = seed.unwrap_or_else(|| rand::rng().random());
    ChaCha8Rng::seed_from_u64(seed)
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Propose the next parameter set to evaluate.
    fn suggest(&mut self) -> HtResult<ParameterSet>;

    /// Record a finished trial so adaptive strategies can condition on it.
    fn observe(&mut self, result: TrialResult);

    /// Every trial observed so far, in evaluation order.
    fn history(&self) -> &TrialHistory;

    /// The space this strategy samples from.
    fn space(&self) -> &SearchSpace;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
    history: TrialHistory,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> HtResult<Self> {
        space.check()?;
        Ok(Self {
            space,
            rng: seeded_rng(seed),
            history: TrialHistory::new(),
        })
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self) -> HtResult<ParameterSet> {
        Ok(self.space.sample_uniform(&mut self.rng))
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
        "random"
    }
}
