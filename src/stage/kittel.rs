//! Kittel dispersion fit over the accepted resonance records.
//!
//! The resonance fields become the independent variable: `x = H_res` (T),
//! `y = f` (GHz).

use crate::domain::{
    Curve, FitCurve, FitResult, HZ_PER_GHZ, KittelConfig, MaterialKey, MaterialParameters,
    ModelKind, OE_PER_TESLA, ResonanceRecord, g_factor_from_gamma,
};
use crate::error::{AppError, RecordFailure};
use crate::fit::fit_curve;
use crate::stage::resonance::{DENSE_POINTS, dense_curve};

#[derive(Debug, Clone, PartialEq)]
pub struct KittelOutcome {
    pub fit: FitResult,
    pub material: MaterialParameters,
    pub curve: FitCurve,
}

/// `(H_res in T, f in GHz)` in record order.
pub fn kittel_points(records: &[ResonanceRecord]) -> Curve {
    let x = records.iter().map(|r| r.h_res / OE_PER_TESLA).collect();
    let y = records.iter().map(|r| r.frequency_hz / HZ_PER_GHZ).collect();
    Curve { x, y }
}

pub fn fit_kittel_points(
    points: &Curve,
    config: &KittelConfig,
) -> Result<FitResult, RecordFailure> {
    fit_curve(
        ModelKind::Kittel,
        &points.x,
        &points.y,
        &[config.m_eff, config.h_k, config.gamma],
        &config.budget,
    )
}

pub fn fit_kittel(
    records: &[ResonanceRecord],
    config: &KittelConfig,
) -> Result<KittelOutcome, AppError> {
    config.validate()?;
    if records.is_empty() {
        return Err(AppError::missing_input(
            "No resonance records to fit the Kittel dispersion to.",
        ));
    }
    let points = kittel_points(records);
    let fit = fit_kittel_points(&points, config).map_err(|e| AppError::fit_failed("Kittel", &e))?;

    let gamma = fit.params[2].value;
    let mut material = MaterialParameters::new();
    material.set_number(MaterialKey::MEff, fit.params[0].value);
    material.set_number(MaterialKey::Gamma, gamma);
    material.set_number(MaterialKey::Hk, fit.params[1].value);
    material.set_number(MaterialKey::GFactor, g_factor_from_gamma(gamma));
    log::info!(
        "Kittel fit: gamma={gamma:.4} GHz/T, M_eff={:.4} T, R²={:.5}",
        fit.params[0].value,
        fit.r2
    );

    let curve = FitCurve {
        label: "Kittel".to_string(),
        model: fit.model,
        fit: dense_curve(&fit, &points, DENSE_POINTS),
        data: points,
        r2: fit.r2,
    };
    Ok(KittelOutcome { fit, material, curve })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::kittel_field;

    /// Resonance records that follow an exact Kittel dispersion.
    pub(crate) fn kittel_records(
        m_eff: f64,
        h_k: f64,
        gamma: f64,
        n: usize,
    ) -> Vec<ResonanceRecord> {
        (0..n)
            .map(|i| {
                let f_hz = 4e9 + i as f64 * 0.5e9;
                let h_res = kittel_field(f_hz / HZ_PER_GHZ, m_eff, h_k, gamma) * OE_PER_TESLA;
                ResonanceRecord {
                    key: f_hz as i64,
                    frequency_hz: f_hz,
                    a: -10.0,
                    lw: 40.0 + i as f64,
                    h_res,
                    alpha: None,
                    r2: 0.99,
                    a_err: None,
                    lw_err: None,
                    h_res_err: None,
                }
            })
            .collect()
    }

    #[test]
    fn recovers_gamma_and_g_factor() {
        let records = kittel_records(1.0, 0.0017, 29.0, 12);
        let out = fit_kittel(&records, &KittelConfig::default()).unwrap();
        let gamma = out.material.number(MaterialKey::Gamma).unwrap();
        assert!((gamma - 29.0).abs() < 0.05, "gamma={gamma}");
        let g = out.material.number(MaterialKey::GFactor).unwrap();
        assert!((g - g_factor_from_gamma(gamma)).abs() < 1e-12);
        assert!(out.material.number(MaterialKey::Hk).is_some());
        assert!(out.fit.r2 > 0.9999);
    }

    #[test]
    fn no_records_is_missing_input() {
        let err = fit_kittel(&[], &KittelConfig::default()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn two_records_cannot_fit_three_parameters() {
        let records = kittel_records(1.0, 0.0017, 29.0, 2);
        let err = fit_kittel(&records, &KittelConfig::default()).unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }
}
