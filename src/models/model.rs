//! Model evaluation for the resonance lineshapes and the dispersion fits.
//!
//! The fitter only needs one primitive: `predict(model, x, params)` with
//! `params` in the order of `ModelKind::param_names`.

use std::f64::consts::PI;

use crate::domain::ModelKind;

/// Evaluate `model` at `x`.
pub fn predict(model: ModelKind, x: f64, params: &[f64]) -> f64 {
    match model {
        ModelKind::Absorption => absorption_lorentzian(x, params[0], params[1], params[2]),
        ModelKind::Derivative => derivative_lorentzian(x, params[0], params[1], params[2]),
        ModelKind::SkewDerivative => {
            skew_derivative_lorentzian(x, params[0], params[1], params[2], params[3])
        }
        ModelKind::Kittel => kittel_frequency(x, params[0], params[1], params[2]),
        ModelKind::Linewidth { gamma } => linewidth(x, params[0], params[1], gamma),
    }
}

/// Evaluate `model` over a slice of x values.
pub fn predict_all(model: ModelKind, xs: &[f64], params: &[f64]) -> Vec<f64> {
    xs.iter().map(|&x| predict(model, x, params)).collect()
}

/// `A·σ / (π·((x − H_res)² + σ²))`.
pub fn absorption_lorentzian(x: f64, a: f64, sigma: f64, h_res: f64) -> f64 {
    let dx = x - h_res;
    a * sigma / (PI * (dx * dx + sigma * sigma))
}

/// `−A·LW·(x − H_res) / (π·((x − H_res)² + (LW/2)²)²)`.
pub fn derivative_lorentzian(x: f64, a: f64, lw: f64, h_res: f64) -> f64 {
    let dx = x - h_res;
    let half = 0.5 * lw;
    let d = dx * dx + half * half;
    -(a * lw * dx) / (PI * d * d)
}

/// Derivative Lorentzian whose half-width grows linearly across the line:
/// `w = LW/2·(1 + α·(x − H_res))`.
pub fn skew_derivative_lorentzian(x: f64, a: f64, lw: f64, h_res: f64, alpha: f64) -> f64 {
    let dx = x - h_res;
    let w = 0.5 * lw * (1.0 + alpha * dx);
    let d = dx * dx + w * w;
    -2.0 * a * dx * w / (PI * d * d)
}

/// Kittel in-plane dispersion; `h` in T, result in GHz when `gamma` is GHz/T.
pub fn kittel_frequency(h: f64, m_eff: f64, h_k: f64, gamma: f64) -> f64 {
    gamma * ((h + h_k) * (h + m_eff + h_k)).sqrt()
}

/// Gilbert linewidth `ΔH(f) = 4π·α·f / (2π·γ) + ΔH0`.
pub fn linewidth(f: f64, alpha: f64, dh0: f64, gamma: f64) -> f64 {
    let gamma_rad = 2.0 * PI * gamma;
    4.0 * PI * alpha * f / gamma_rad + dh0
}

/// Applied field (T) at which the Kittel mode sits at `f` (GHz).
///
/// Inverse of `kittel_frequency`; used to synthesise test spectra.
pub fn kittel_field(f: f64, m_eff: f64, h_k: f64, gamma: f64) -> f64 {
    // u = H + H_k solves u·(u + M_eff) = (f/γ)².
    let r = f / gamma;
    let u = 0.5 * (-m_eff + (m_eff * m_eff + 4.0 * r * r).sqrt());
    u - h_k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivative_matches_analytic_derivative_of_absorption() {
        // d/dx of A·σ/(π(dx²+σ²)) with σ = LW/2 is the derivative lineshape.
        let (a, lw, h) = (-5.0, 40.0, 1000.0);
        let sigma = lw / 2.0;
        for &x in &[950.0, 990.0, 1003.0, 1050.0] {
            let eps = 1e-4;
            let num = (absorption_lorentzian(x + eps, a, sigma, h)
                - absorption_lorentzian(x - eps, a, sigma, h))
                / (2.0 * eps);
            let ana = derivative_lorentzian(x, a, lw, h);
            assert!((num - ana).abs() < 1e-9, "x={x}: {num} vs {ana}");
        }
    }

    #[test]
    fn skew_reduces_to_symmetric_without_asymmetry() {
        for &x in &[900.0, 1000.0, 1020.0] {
            let s = skew_derivative_lorentzian(x, -3.0, 50.0, 1000.0, 0.0);
            let d = derivative_lorentzian(x, -3.0, 50.0, 1000.0);
            assert!((s - d).abs() < 1e-15);
        }
    }

    #[test]
    fn kittel_field_inverts_frequency() {
        let (m_eff, h_k, gamma) = (1.0, 0.0017, 29.0);
        for &f in &[4.0, 8.0, 12.0] {
            let h = kittel_field(f, m_eff, h_k, gamma);
            let back = kittel_frequency(h, m_eff, h_k, gamma);
            assert!((back - f).abs() < 1e-9, "{f} -> {h} -> {back}");
        }
    }

    #[test]
    fn linewidth_is_linear_in_frequency() {
        let lw0 = linewidth(0.0, 0.005, 0.002, 29.0);
        let lw10 = linewidth(10.0, 0.005, 0.002, 29.0);
        assert!((lw0 - 0.002).abs() < 1e-15);
        assert!((lw10 - (0.002 + 2.0 * 0.005 * 10.0 / 29.0)).abs() < 1e-12);
    }
}
