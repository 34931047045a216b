//! Per-stage configuration.
//!
//! These are derived from CLI flags (plus presets) by `app::*_config_from_args`
//! and are all the pipeline code ever sees of the command line.

use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{Lineshape, ParamSpec};
use crate::error::AppError;

/// Default R² acceptance threshold for per-frequency fits.
pub const DEFAULT_R2_THRESHOLD: f64 = 0.9;

/// Solver limits applied to every single fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitBudget {
    /// Maximum number of model evaluations (Jacobian columns included).
    /// `None` uses `2000 * (params + 1)`.
    pub max_nfev: Option<usize>,
    /// Wall-clock limit per fit.
    pub time_limit: Option<Duration>,
}

impl Default for FitBudget {
    fn default() -> Self {
        Self {
            max_nfev: None,
            time_limit: Some(Duration::from_secs(10)),
        }
    }
}

impl FitBudget {
    pub fn max_nfev_for(&self, n_params: usize) -> usize {
        self.max_nfev.unwrap_or(2000 * (n_params + 1))
    }
}

/// Which sweep is subtracted from every other sweep as background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSweep {
    /// The sweep with the smallest key.
    First,
    /// The sweep whose file-name key equals this value (e.g. `0` for zero field).
    Key(i64),
}

impl FromStr for ReferenceSweep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("first") {
            return Ok(ReferenceSweep::First);
        }
        s.parse::<i64>()
            .map(ReferenceSweep::Key)
            .map_err(|_| format!("expected `first` or an integer file key, got `{s}`"))
    }
}

/// Frequency → field re-indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    pub step_hz: f64,
    /// `None` re-indexes the raw signal without background removal.
    pub reference: Option<ReferenceSweep>,
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.step_hz.is_finite() && self.step_hz > 0.0) {
            return Err(AppError::config(format!(
                "Frequency step must be finite and > 0 (got {}).",
                self.step_hz
            )));
        }
        Ok(())
    }
}

/// What to do when the field spacing of a record differs from the configured
/// derivative step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StepCheck {
    /// Differentiate with the configured step and report a warning.
    Warn,
    /// Skip the record.
    Reject,
    /// Divide by each sampled interval instead of `2·dH`.
    Observed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivativeConfig {
    /// Field step dH (Oe).
    pub step_oe: f64,
    pub step_check: StepCheck,
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self {
            step_oe: 10.0,
            step_check: StepCheck::Warn,
        }
    }
}

impl DerivativeConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.step_oe.is_finite() && self.step_oe > 0.0) {
            return Err(AppError::config(format!(
                "Derivative step must be finite and > 0 (got {}).",
                self.step_oe
            )));
        }
        Ok(())
    }
}

/// Initial guess and bounds of the resonance field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HresStrategy {
    /// Guess the centre of the selected window and bound to centre ± band.
    WindowCenter { band: f64 },
    /// Same guess and bounds for every record.
    Fixed(ParamSpec),
}

impl HresStrategy {
    pub fn resolve(self, window_min: f64, window_max: f64) -> ParamSpec {
        match self {
            HresStrategy::WindowCenter { band } => {
                let center = 0.5 * (window_min + window_max);
                ParamSpec::bounded(center, center - band, center + band)
            }
            HresStrategy::Fixed(spec) => spec,
        }
    }
}

/// Settings for the per-frequency resonance fits.
#[derive(Debug, Clone, PartialEq)]
pub struct ResonanceFitConfig {
    pub lineshape: Lineshape,
    /// Half-width Δ (Oe) of the window around the extremum.
    pub delta: f64,
    pub amplitude: ParamSpec,
    /// σ for the absorption lineshape, LW for the derivative ones.
    pub width: ParamSpec,
    /// Only used by the skew lineshape.
    pub asymmetry: ParamSpec,
    pub h_res: HresStrategy,
    pub r2_threshold: f64,
    pub budget: FitBudget,
}

impl ResonanceFitConfig {
    /// Defaults per lineshape.
    pub fn preset(lineshape: Lineshape) -> Self {
        let h_res = HresStrategy::WindowCenter { band: 100.0 };
        match lineshape {
            Lineshape::Absorption => Self {
                lineshape,
                delta: 120.0,
                amplitude: ParamSpec::free(-20.0),
                width: ParamSpec::at_least(20.0, 0.0),
                asymmetry: ParamSpec::free(0.0),
                h_res,
                r2_threshold: DEFAULT_R2_THRESHOLD,
                budget: FitBudget::default(),
            },
            Lineshape::Derivative => Self {
                lineshape,
                delta: 150.0,
                amplitude: ParamSpec::free(-15.0),
                width: ParamSpec::at_least(40.0, 0.0),
                asymmetry: ParamSpec::free(0.0),
                h_res,
                r2_threshold: DEFAULT_R2_THRESHOLD,
                budget: FitBudget::default(),
            },
            Lineshape::Skew => Self {
                lineshape,
                delta: 200.0,
                amplitude: ParamSpec::bounded(-1.0, -30.0, 0.0),
                width: ParamSpec::bounded(40.0, 10.0, 100.0),
                asymmetry: ParamSpec::bounded(0.02, -0.1, 0.1),
                h_res,
                r2_threshold: DEFAULT_R2_THRESHOLD,
                budget: FitBudget::default(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.delta.is_finite() && self.delta >= 0.0) {
            return Err(AppError::config(format!(
                "Window half-width must be finite and >= 0 (got {}).",
                self.delta
            )));
        }
        if !(self.r2_threshold.is_finite() && self.r2_threshold <= 1.0) {
            return Err(AppError::config(format!(
                "R² threshold must be finite and <= 1 (got {}).",
                self.r2_threshold
            )));
        }
        for (name, spec) in [
            ("A", self.amplitude),
            ("width", self.width),
            ("alpha", self.asymmetry),
        ] {
            validate_spec(name, spec)?;
        }
        match self.h_res {
            HresStrategy::WindowCenter { band } if !(band.is_finite() && band > 0.0) => Err(
                AppError::config(format!("H_res band must be finite and > 0 (got {band}).")),
            ),
            HresStrategy::Fixed(spec) => validate_spec("H_res", spec),
            _ => Ok(()),
        }
    }
}

/// Initial guesses for the Kittel dispersion fit (T, T, GHz/T).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KittelConfig {
    pub m_eff: ParamSpec,
    pub h_k: ParamSpec,
    pub gamma: ParamSpec,
    pub budget: FitBudget,
}

impl Default for KittelConfig {
    fn default() -> Self {
        Self {
            m_eff: ParamSpec::free(1.0),
            h_k: ParamSpec::free(0.01),
            gamma: ParamSpec::free(29.0),
            budget: FitBudget::default(),
        }
    }
}

impl KittelConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_spec("M_eff", self.m_eff)?;
        validate_spec("H_k", self.h_k)?;
        validate_spec("gamma", self.gamma)
    }
}

/// Linewidth-vs-frequency fit (damping).
#[derive(Debug, Clone, PartialEq)]
pub struct LinewidthConfig {
    pub material: String,
    pub alpha: ParamSpec,
    /// Initial ΔH0 in tesla.
    pub dh0: ParamSpec,
    pub budget: FitBudget,
}

impl Default for LinewidthConfig {
    fn default() -> Self {
        Self {
            material: "FeGaB".to_string(),
            alpha: ParamSpec::free(0.003),
            dh0: ParamSpec::free(0.0022),
            budget: FitBudget::default(),
        }
    }
}

impl LinewidthConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_spec("alpha", self.alpha)?;
        validate_spec("DH0", self.dh0)
    }
}

/// Piecewise (growing prefix) Kittel analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsymptoticConfig {
    pub segment_size: usize,
    pub kittel: KittelConfig,
}

impl Default for AsymptoticConfig {
    fn default() -> Self {
        Self {
            segment_size: 4,
            kittel: KittelConfig {
                h_k: ParamSpec::free(0.0017),
                ..KittelConfig::default()
            },
        }
    }
}

impl AsymptoticConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.segment_size == 0 {
            return Err(AppError::config("Segment size must be > 0."));
        }
        self.kittel.validate()
    }
}

/// Everything `fmr run` needs to take raw sweeps to material parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub index: IndexConfig,
    pub derivative: DerivativeConfig,
    pub resonance: ResonanceFitConfig,
    pub kittel: KittelConfig,
    pub linewidth: LinewidthConfig,
    pub asymptotic: Option<AsymptoticConfig>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        self.index.validate()?;
        self.derivative.validate()?;
        self.resonance.validate()?;
        self.kittel.validate()?;
        self.linewidth.validate()?;
        if let Some(a) = &self.asymptotic {
            a.validate()?;
        }
        Ok(())
    }
}

fn validate_spec(name: &str, spec: ParamSpec) -> Result<(), AppError> {
    if !spec.initial.is_finite() {
        return Err(AppError::config(format!("Initial `{name}` must be finite.")));
    }
    if spec.min.is_nan() || spec.max.is_nan() || spec.min >= spec.max {
        return Err(AppError::config(format!(
            "Bounds for `{name}` are invalid: [{}, {}].",
            spec.min, spec.max
        )));
    }
    Ok(())
}
