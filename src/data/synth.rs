//! Synthetic raw FMR sweeps.
//!
//! Each sweep is S21 vs frequency at one applied field. The resonance at
//! frequency `f` sits at the Kittel field `H_res(f)` with Gilbert linewidth
//! `ΔH(f)`; its field-domain shape is an absorption Lorentzian with
//! `σ = ΔH/2`. On top sits a frequency-dependent baseline (the part the
//! background stage removes) and seeded Gaussian noise.
//!
//! The sweep at `reference_field_oe` carries baseline and noise only, like a
//! sweep taken with the resonance pushed out of band.

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::domain::{Curve, HZ_PER_GHZ, OE_PER_TESLA, Sweep};
use crate::error::AppError;
use crate::models::{absorption_lorentzian, kittel_field, linewidth};

#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    pub field_min_oe: f64,
    pub field_max_oe: f64,
    pub field_step_oe: f64,
    pub freq_min_hz: f64,
    pub freq_max_hz: f64,
    pub freq_step_hz: f64,
    /// Sweep written without a resonance.
    pub reference_field_oe: f64,
    /// T
    pub m_eff: f64,
    /// T
    pub h_k: f64,
    /// GHz/T
    pub gamma: f64,
    pub alpha: f64,
    /// T
    pub dh0: f64,
    pub amplitude: f64,
    /// Baseline S21 per GHz.
    pub baseline_slope: f64,
    pub noise: f64,
    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            field_min_oe: 0.0,
            field_max_oe: 2000.0,
            field_step_oe: 10.0,
            freq_min_hz: 4e9,
            freq_max_hz: 12e9,
            freq_step_hz: 0.5e9,
            reference_field_oe: 0.0,
            m_eff: 1.0,
            h_k: 0.0017,
            gamma: 29.0,
            alpha: 0.005,
            dh0: 0.002,
            amplitude: -5.0,
            baseline_slope: -0.002,
            noise: 1e-5,
            seed: 42,
        }
    }
}

impl SynthConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        let ranges = [
            ("field", self.field_min_oe, self.field_max_oe, self.field_step_oe),
            ("frequency", self.freq_min_hz, self.freq_max_hz, self.freq_step_hz),
        ];
        for (name, lo, hi, step) in ranges {
            if !(lo.is_finite() && hi.is_finite() && hi >= lo && step.is_finite() && step > 0.0) {
                return Err(AppError::config(format!(
                    "Invalid {name} range {lo}..{hi} step {step}."
                )));
            }
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(AppError::config("Noise level must be finite and >= 0."));
        }
        if self.field_min_oe < 0.0 {
            return Err(AppError::config("Synthetic fields must be >= 0 Oe."));
        }
        Ok(())
    }

    fn steps(lo: f64, hi: f64, step: f64) -> Vec<f64> {
        let count = ((hi - lo) / step * (1.0 + 1e-12)).floor() as usize + 1;
        (0..count).map(|i| lo + i as f64 * step).collect()
    }

    pub fn fields(&self) -> Vec<f64> {
        Self::steps(self.field_min_oe, self.field_max_oe, self.field_step_oe)
    }

    pub fn frequencies(&self) -> Vec<f64> {
        Self::steps(self.freq_min_hz, self.freq_max_hz, self.freq_step_hz)
    }

    /// Resonance field (Oe) and full linewidth (Oe) at `freq_hz`.
    pub fn resonance_at(&self, freq_hz: f64) -> (f64, f64) {
        let f_ghz = freq_hz / HZ_PER_GHZ;
        let h_res = kittel_field(f_ghz, self.m_eff, self.h_k, self.gamma) * OE_PER_TESLA;
        let lw = linewidth(f_ghz, self.alpha, self.dh0, self.gamma) * OE_PER_TESLA;
        (h_res, lw)
    }
}

pub fn generate_sweeps(config: &SynthConfig) -> Result<Vec<Sweep>, AppError> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0, config.noise)
        .map_err(|e| AppError::config(format!("Noise distribution error: {e}")))?;

    let freqs = config.frequencies();
    let lines: Vec<(f64, f64)> = freqs.iter().map(|&f| config.resonance_at(f)).collect();

    let mut sweeps = Vec::new();
    for field in config.fields() {
        let resonant = (field - config.reference_field_oe).abs() > f64::EPSILON;
        let y = freqs
            .iter()
            .zip(&lines)
            .map(|(&f, &(h_res, lw))| {
                let mut s = config.baseline_slope * f / HZ_PER_GHZ;
                if resonant {
                    s += absorption_lorentzian(field, config.amplitude, 0.5 * lw, h_res);
                }
                s + normal.sample(&mut rng)
            })
            .collect();
        sweeps.push(Sweep {
            key: field.round() as i64,
            field_oe: field,
            curve: Curve {
                x: freqs.clone(),
                y,
            },
        });
    }
    log::info!(
        "Generated {} synthetic sweeps over {} frequencies",
        sweeps.len(),
        freqs.len()
    );
    Ok(sweeps)
}

/// One `<field>.txt` per sweep: `frequency S21` per line.
pub fn write_sweeps(dir: &Path, sweeps: &[Sweep]) -> Result<(), AppError> {
    create_dir_all(dir).map_err(|e| AppError::io(dir, "create directory", e))?;
    for sweep in sweeps {
        let path = dir.join(format!("{}.txt", sweep.key));
        let file = File::create(&path).map_err(|e| AppError::io(&path, "create", e))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "# frequency(Hz) S21 at {} Oe", sweep.field_oe)
            .map_err(|e| AppError::io(&path, "write", e))?;
        for (f, s) in sweep.curve.points() {
            writeln!(out, "{f} {s}").map_err(|e| AppError::io(&path, "write", e))?;
        }
        out.flush().map_err(|e| AppError::io(&path, "write", e))?;
    }
    Ok(())
}
