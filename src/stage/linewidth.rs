//! Gilbert damping from linewidth vs frequency.
//!
//! Needs γ from the Kittel stage; `x = f` (GHz), `y = LW` (T).

use crate::domain::{
    Curve, FitCurve, FitResult, HZ_PER_GHZ, LinewidthConfig, MaterialKey, MaterialParameters,
    ModelKind, OE_PER_TESLA, ResonanceRecord,
};
use crate::error::AppError;
use crate::fit::fit_curve;
use crate::stage::resonance::{DENSE_POINTS, dense_curve};

#[derive(Debug, Clone, PartialEq)]
pub struct LinewidthOutcome {
    pub fit: FitResult,
    /// Rows this stage adds to the material table.
    pub material: MaterialParameters,
    pub curve: FitCurve,
}

pub fn linewidth_points(records: &[ResonanceRecord]) -> Curve {
    let x = records.iter().map(|r| r.frequency_hz / HZ_PER_GHZ).collect();
    let y = records.iter().map(|r| r.lw / OE_PER_TESLA).collect();
    Curve { x, y }
}

pub fn fit_linewidth(
    records: &[ResonanceRecord],
    material: &MaterialParameters,
    config: &LinewidthConfig,
) -> Result<LinewidthOutcome, AppError> {
    config.validate()?;
    let gamma = material.require_number(MaterialKey::Gamma, "Kittel")?;
    if records.is_empty() {
        return Err(AppError::missing_input(
            "No resonance records to fit the linewidth to.",
        ));
    }

    let points = linewidth_points(records);
    let fit = fit_curve(
        ModelKind::Linewidth { gamma },
        &points.x,
        &points.y,
        &[config.alpha, config.dh0],
        &config.budget,
    )
    .map_err(|e| AppError::fit_failed("Linewidth", &e))?;

    let alpha = fit.params[0].value;
    let dh0_oe = fit.params[1].value * OE_PER_TESLA;
    let mut out = MaterialParameters::new();
    out.set_text(MaterialKey::Material, config.material.clone());
    out.set_number(MaterialKey::Alpha, alpha);
    out.set_number(MaterialKey::Dh0, dh0_oe);
    log::info!("Linewidth fit: alpha={alpha:.6}, DH0={dh0_oe:.3} Oe, R²={:.5}", fit.r2);

    let curve = FitCurve {
        label: format!("Linewidth ({})", config.material),
        model: fit.model,
        fit: dense_curve(&fit, &points, DENSE_POINTS),
        data: points,
        r2: fit.r2,
    };
    Ok(LinewidthOutcome {
        fit,
        material: out,
        curve,
    })
}
