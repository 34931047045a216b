//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between pipeline stages in memory
//! - exported to CSV/JSON
//! - reloaded by a later stage run as a separate command

use std::collections::BTreeMap;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Relative tolerance used when two independent-variable samples are compared
/// for equality (frequency matching across sweeps).
pub const SAMPLE_MATCH_RTOL: f64 = 1e-12;

/// `g = 2π·γ / G_FACTOR_DIVISOR` with γ in GHz/T.
pub const G_FACTOR_DIVISOR: f64 = 87.99;

pub const OE_PER_TESLA: f64 = 1e4;
pub const HZ_PER_GHZ: f64 = 1e9;

/// Returns `true` when `a` and `b` are the same sample position.
pub fn same_sample(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= SAMPLE_MATCH_RTOL * scale
}

/// An ordered 1-D curve. `x` is strictly increasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Curve {
    /// Build a curve from unordered pairs: sorts by x and keeps the first of
    /// any repeated x so the strictly-increasing invariant holds.
    pub fn from_pairs(mut pairs: Vec<(f64, f64)>) -> Self {
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        pairs.dedup_by(|later, earlier| later.0 == earlier.0);
        let (x, y) = pairs.into_iter().unzip();
        Self { x, y }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }

    /// Signal at exactly `x` (up to float representation), if sampled there.
    pub fn value_at(&self, x: f64) -> Option<f64> {
        let tol = SAMPLE_MATCH_RTOL * x.abs().max(1.0);
        let idx = self.x.partition_point(|&v| v < x - tol);
        match self.x.get(idx) {
            Some(&v) if same_sample(v, x) => Some(self.y[idx]),
            _ => None,
        }
    }

    pub fn x_range(&self) -> Option<(f64, f64)> {
        Some((*self.x.first()?, *self.x.last()?))
    }
}

/// One raw input file: a frequency sweep of S21 at a fixed applied field.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    /// First integer found in the file name.
    pub key: i64,
    /// Applied field (Oe) the sweep was taken at.
    pub field_oe: f64,
    /// `x` = frequency (Hz), `y` = S21.
    pub curve: Curve,
}

/// Evenly spaced frequencies the sweeps are re-indexed onto.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyGrid {
    pub step_hz: f64,
    pub values: Vec<f64>,
}

/// All samples taken at one frequency, ordered by field.
///
/// Used for both the field-domain tables (`y` = S21) and the derivative tables
/// (`y` = dS21/dH).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDomainRecord {
    pub key: i64,
    pub frequency_hz: f64,
    /// `x` = field (Oe).
    pub curve: Curve,
}

/// Which resonance lineshape a per-frequency fit uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Lineshape {
    /// Absorption Lorentzian on background-subtracted S21 (dip).
    Absorption,
    /// Symmetric derivative Lorentzian on dS21/dH.
    Derivative,
    /// Derivative Lorentzian with an asymmetry term.
    Skew,
}

impl Lineshape {
    pub fn model(self) -> ModelKind {
        match self {
            Lineshape::Absorption => ModelKind::Absorption,
            Lineshape::Derivative => ModelKind::Derivative,
            Lineshape::Skew => ModelKind::SkewDerivative,
        }
    }

    /// Absorption curves are fit around their minimum, derivative curves
    /// around their maximum.
    pub fn extremum(self) -> Extremum {
        match self {
            Lineshape::Absorption => Extremum::Minimum,
            Lineshape::Derivative | Lineshape::Skew => Extremum::Maximum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Minimum,
    Maximum,
}

/// Concrete model evaluated by the fitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ModelKind {
    Absorption,
    Derivative,
    SkewDerivative,
    Kittel,
    /// Needs `gamma` (GHz/T) from a prior Kittel fit.
    Linewidth { gamma: f64 },
}

impl ModelKind {
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Absorption => "absorption Lorentzian",
            ModelKind::Derivative => "derivative Lorentzian",
            ModelKind::SkewDerivative => "skew derivative Lorentzian",
            ModelKind::Kittel => "Kittel",
            ModelKind::Linewidth { .. } => "linewidth",
        }
    }

    /// Parameter names in the order the model function expects them.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::Absorption => &["A", "sigma", "H_res"],
            ModelKind::Derivative => &["A", "LW", "H_res"],
            ModelKind::SkewDerivative => &["A", "LW", "H_res", "alpha"],
            ModelKind::Kittel => &["M_eff", "H_k", "gamma"],
            ModelKind::Linewidth { .. } => &["alpha", "DH0"],
        }
    }

    pub fn param_len(self) -> usize {
        self.param_names().len()
    }
}

/// Initial value and bounds of one fit parameter. Infinite bounds mean
/// "unbounded on that side".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub initial: f64,
    pub min: f64,
    pub max: f64,
}

impl ParamSpec {
    pub fn free(initial: f64) -> Self {
        Self {
            initial,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn bounded(initial: f64, min: f64, max: f64) -> Self {
        Self { initial, min, max }
    }

    pub fn at_least(initial: f64, min: f64) -> Self {
        Self {
            initial,
            min,
            max: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedParam {
    pub name: String,
    pub value: f64,
    /// `None` when the covariance matrix could not be estimated.
    pub stderr: Option<f64>,
}

/// Converged output of one bounded least-squares fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: ModelKind,
    pub params: Vec<FittedParam>,
    /// Model evaluated at the fitted x values.
    pub best_fit: Vec<f64>,
    pub r2: f64,
    pub n: usize,
    pub iterations: usize,
    pub nfev: usize,
}

impl FitResult {
    pub fn param(&self, name: &str) -> Option<&FittedParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.param(name).map(|p| p.value)
    }

    pub fn stderr(&self, name: &str) -> Option<f64> {
        self.param(name).and_then(|p| p.stderr)
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }
}

/// One accepted per-frequency fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceRecord {
    pub key: i64,
    pub frequency_hz: f64,
    pub a: f64,
    /// Full linewidth (Oe).
    pub lw: f64,
    pub h_res: f64,
    /// Asymmetry term; only the skew lineshape has one.
    pub alpha: Option<f64>,
    pub r2: f64,
    pub a_err: Option<f64>,
    pub lw_err: Option<f64>,
    pub h_res_err: Option<f64>,
}

/// Names accepted in the material parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MaterialKey {
    MEff,
    Gamma,
    Hk,
    GFactor,
    Material,
    Alpha,
    Dh0,
}

impl MaterialKey {
    /// Rows the linewidth stage derives from a Kittel γ.
    pub const DAMPING: [MaterialKey; 3] =
        [MaterialKey::Material, MaterialKey::Alpha, MaterialKey::Dh0];

    pub const ALL: [MaterialKey; 7] = [
        MaterialKey::MEff,
        MaterialKey::Gamma,
        MaterialKey::Hk,
        MaterialKey::GFactor,
        MaterialKey::Material,
        MaterialKey::Alpha,
        MaterialKey::Dh0,
    ];

    /// Name as written in the `Parameter` column.
    pub fn column_name(self) -> &'static str {
        match self {
            MaterialKey::MEff => "M_eff (T)",
            MaterialKey::Gamma => "gamma (GHz/T)",
            MaterialKey::Hk => "H_k (T)",
            MaterialKey::GFactor => "g-factor",
            MaterialKey::Material => "Material",
            MaterialKey::Alpha => "alpha",
            MaterialKey::Dh0 => "DH0 (Oe)",
        }
    }

    pub fn from_column_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|k| k.column_name() == name)
    }

    pub fn is_text(self) -> bool {
        matches!(self, MaterialKey::Material)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaterialValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for MaterialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialValue::Number(v) => write!(f, "{v}"),
            MaterialValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Scalar material constants, filled in stage by stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialParameters {
    values: BTreeMap<MaterialKey, MaterialValue>,
}

impl MaterialParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_number(&mut self, key: MaterialKey, value: f64) {
        self.values.insert(key, MaterialValue::Number(value));
    }

    pub fn set_text(&mut self, key: MaterialKey, value: impl Into<String>) {
        self.values.insert(key, MaterialValue::Text(value.into()));
    }

    pub fn get(&self, key: MaterialKey) -> Option<&MaterialValue> {
        self.values.get(&key)
    }

    /// Numeric value, `None` if the stage producing it has not run.
    pub fn number(&self, key: MaterialKey) -> Option<f64> {
        match self.values.get(&key)? {
            MaterialValue::Number(v) => Some(*v),
            MaterialValue::Text(_) => None,
        }
    }

    /// Like `number`, but a missing key is a fatal precondition failure.
    pub fn require_number(&self, key: MaterialKey, producer: &str) -> Result<f64, AppError> {
        self.number(key).ok_or_else(|| {
            AppError::missing_input(format!(
                "Material parameter `{}` is not available; run the {producer} stage first.",
                key.column_name()
            ))
        })
    }

    pub fn remove(&mut self, key: MaterialKey) -> Option<MaterialValue> {
        self.values.remove(&key)
    }

    pub fn merge(&mut self, other: &MaterialParameters) {
        for (k, v) in &other.values {
            self.values.insert(*k, v.clone());
        }
    }

    /// Rows in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (MaterialKey, &MaterialValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One step of the piecewise Kittel analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsymptoticPoint {
    /// Last (highest) frequency included in the prefix.
    pub cutoff_frequency_hz: f64,
    pub n_points: usize,
    pub gamma: f64,
    pub gamma_stderr: Option<f64>,
    pub g_factor: f64,
    pub g_factor_stderr: Option<f64>,
    pub r2: f64,
}

/// Convert γ (GHz/T) to the g-factor.
pub fn g_factor_from_gamma(gamma: f64) -> f64 {
    2.0 * std::f64::consts::PI * gamma / G_FACTOR_DIVISOR
}

/// Data + fitted curve handed to whatever renders figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitCurve {
    pub label: String,
    pub model: ModelKind,
    pub data: Curve,
    pub fit: Curve,
    pub r2: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_from_pairs_sorts_and_dedups() {
        let c = Curve::from_pairs(vec![(30.0, 3.0), (10.0, 1.0), (20.0, 2.0), (10.0, 9.0)]);
        assert_eq!(c.x, vec![10.0, 20.0, 30.0]);
        assert_eq!(c.y, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn value_at_matches_exact_samples_only() {
        let c = Curve::from_pairs(vec![(1e9, 0.5), (2e9, 0.7), (3e9, 0.9)]);
        assert_eq!(c.value_at(2e9), Some(0.7));
        assert_eq!(c.value_at(2.5e9), None);
        assert_eq!(c.value_at(4e9), None);
    }

    #[test]
    fn material_parameters_report_missing_keys() {
        let mut m = MaterialParameters::new();
        assert!(m.number(MaterialKey::Gamma).is_none());
        let err = m.require_number(MaterialKey::Gamma, "Kittel").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingInput);

        m.set_number(MaterialKey::Gamma, 29.0);
        m.set_text(MaterialKey::Material, "FeGaB");
        assert_eq!(m.number(MaterialKey::Gamma), Some(29.0));
        assert_eq!(m.number(MaterialKey::Material), None);
        assert_eq!(MaterialKey::from_column_name(" gamma (GHz/T)"), Some(MaterialKey::Gamma));
    }

    #[test]
    fn g_factor_conversion() {
        let g = g_factor_from_gamma(28.0);
        assert!((g - 1.99935).abs() < 1e-4, "got {g}");
    }
}
