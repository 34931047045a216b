//! Per-frequency resonance fits.
//!
//! For every field-domain (or derivative) record:
//! window around the extremum → bounded fit of the lineshape → R² gate.
//! Records are fitted independently on the rayon pool and gathered back in
//! key order. A failing record only produces a diagnostic.

use rayon::prelude::*;

use crate::domain::{
    Curve, FieldDomainRecord, FitCurve, FitResult, Lineshape, ParamSpec, ResonanceFitConfig,
    ResonanceRecord,
};
use crate::error::{Diagnostic, RecordFailure};
use crate::fit::{QualityGate, fit_curve};
use crate::models::predict_all;
use crate::signal::select_window;

const STAGE: &str = "resonance";

/// Points in each dense fitted curve handed to renderers.
pub const DENSE_POINTS: usize = 200;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResonanceStage {
    pub records: Vec<ResonanceRecord>,
    pub curves: Vec<FitCurve>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parameter specs in model order for one window.
pub fn resonance_specs(config: &ResonanceFitConfig, window: &Curve) -> Vec<ParamSpec> {
    let (lo, hi) = window.x_range().unwrap_or((0.0, 0.0));
    let h_res = config.h_res.resolve(lo, hi);
    match config.lineshape {
        Lineshape::Absorption | Lineshape::Derivative => {
            vec![config.amplitude, config.width, h_res]
        }
        Lineshape::Skew => vec![config.amplitude, config.width, h_res, config.asymmetry],
    }
}

/// Model evaluated on an even grid spanning `curve`.
pub fn dense_curve(fit: &FitResult, span: &Curve, points: usize) -> Curve {
    let Some((lo, hi)) = span.x_range() else {
        return Curve::default();
    };
    let points = points.max(2);
    let x: Vec<f64> = (0..points)
        .map(|i| lo + (hi - lo) * i as f64 / (points - 1) as f64)
        .collect();
    let y = predict_all(fit.model, &x, &fit.values());
    Curve { x, y }
}

/// Fit one record; the record and its curve, or why it was skipped.
pub fn fit_resonance(
    record: &FieldDomainRecord,
    config: &ResonanceFitConfig,
) -> Result<(ResonanceRecord, FitCurve), RecordFailure> {
    let window = select_window(&record.curve, config.delta, config.lineshape.extremum())?;
    let specs = resonance_specs(config, &window);
    let fit = fit_curve(config.lineshape.model(), &window.x, &window.y, &specs, &config.budget)?;
    QualityGate::new(config.r2_threshold).check(&fit)?;

    let a = fit.params[0].value;
    let a_err = fit.params[0].stderr;
    // Absorption is parameterised by the half-width σ; the table stores LW = 2σ.
    let (lw, lw_err) = match config.lineshape {
        Lineshape::Absorption => (2.0 * fit.params[1].value, fit.params[1].stderr.map(|e| 2.0 * e)),
        Lineshape::Derivative | Lineshape::Skew => (fit.params[1].value, fit.params[1].stderr),
    };
    let h_res = fit.params[2].value;
    let h_res_err = fit.params[2].stderr;
    let alpha = fit.params.get(3).map(|p| p.value);

    let curve = FitCurve {
        label: format!("{} Hz", record.frequency_hz),
        model: fit.model,
        fit: dense_curve(&fit, &window, DENSE_POINTS),
        data: window,
        r2: fit.r2,
    };
    let out = ResonanceRecord {
        key: record.key,
        frequency_hz: record.frequency_hz,
        a,
        lw,
        h_res,
        alpha,
        r2: fit.r2,
        a_err,
        lw_err,
        h_res_err,
    };
    Ok((out, curve))
}

/// Fit every record (full-batch mode).
pub fn fit_resonances(
    records: &[FieldDomainRecord],
    config: &ResonanceFitConfig,
) -> ResonanceStage {
    let mut ordered: Vec<&FieldDomainRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.key);

    let results: Vec<_> = ordered
        .par_iter()
        .map(|r| (*r, fit_resonance(r, config)))
        .collect();

    let mut stage = ResonanceStage::default();
    for (record, result) in results {
        match result {
            Ok((rec, curve)) => {
                stage.records.push(rec);
                stage.curves.push(curve);
            }
            Err(cause) => {
                let label = format!("{} Hz", record.frequency_hz);
                log::warn!("{label}: skipped, {cause}");
                stage
                    .diagnostics
                    .push(Diagnostic::skipped(STAGE, record.key, label, cause));
            }
        }
    }
    log::info!(
        "{} fits: {} accepted, {} skipped",
        config.lineshape.model().display_name(),
        stage.records.len(),
        stage.diagnostics.len()
    );
    stage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HresStrategy;
    use crate::models::{absorption_lorentzian, derivative_lorentzian};

    fn record(key: i64, f: impl Fn(f64) -> f64) -> FieldDomainRecord {
        let x: Vec<f64> = (0..=200).map(|i| i as f64 * 10.0).collect();
        let y = x.iter().map(|&h| f(h)).collect();
        FieldDomainRecord {
            key,
            frequency_hz: key as f64,
            curve: Curve { x, y },
        }
    }

    #[test]
    fn derivative_records_are_fitted_in_key_order() {
        let records = vec![
            record(6_000_000_000, |h| derivative_lorentzian(h, -10.0, 60.0, 900.0)),
            record(5_000_000_000, |h| derivative_lorentzian(h, -10.0, 60.0, 700.0)),
        ];
        let stage = fit_resonances(&records, &ResonanceFitConfig::preset(Lineshape::Derivative));
        assert!(stage.diagnostics.is_empty(), "{:?}", stage.diagnostics);
        assert_eq!(stage.records.len(), 2);
        assert_eq!(stage.records[0].key, 5_000_000_000);
        assert!((stage.records[0].h_res - 700.0).abs() < 1.0);
        assert!((stage.records[1].h_res - 900.0).abs() < 1.0);
        assert!((stage.records[1].lw - 60.0).abs() < 1.0);
        assert!(stage.records[0].alpha.is_none());
        assert_eq!(stage.curves[0].fit.len(), DENSE_POINTS);
    }

    #[test]
    fn absorption_reports_full_width() {
        let rec = record(4_000_000_000, |h| absorption_lorentzian(h, -20.0, 25.0, 1000.0));
        let config = ResonanceFitConfig::preset(Lineshape::Absorption);
        let (out, _) = fit_resonance(&rec, &config).unwrap();
        assert!((out.lw - 50.0).abs() < 0.5, "LW={}", out.lw);
        assert!((out.h_res - 1000.0).abs() < 0.5);
    }

    #[test]
    fn bad_records_are_skipped_not_fatal() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;
        use rand_distr::{Distribution, Normal};

        let mut rng = StdRng::seed_from_u64(3);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let noise: Vec<f64> = (0..=200).map(|_| normal.sample(&mut rng)).collect();

        let records = vec![
            record(5_000_000_000, |h| derivative_lorentzian(h, -10.0, 60.0, 800.0)),
            FieldDomainRecord {
                key: 7_000_000_000,
                frequency_hz: 7e9,
                curve: Curve::default(),
            },
            record(8_000_000_000, |h| noise[(h / 10.0).round() as usize]),
        ];
        let stage = fit_resonances(&records, &ResonanceFitConfig::preset(Lineshape::Derivative));
        assert_eq!(stage.records.len(), 1);
        assert_eq!(stage.diagnostics.len(), 2);
        assert_eq!(stage.diagnostics[0].key, 7_000_000_000);
        assert!(matches!(
            stage.diagnostics[0].cause,
            RecordFailure::EmptyWindow { .. }
        ));
        assert_eq!(stage.diagnostics[1].key, 8_000_000_000);
    }

    #[test]
    fn fixed_hres_strategy_uses_given_bounds() {
        let mut config = ResonanceFitConfig::preset(Lineshape::Derivative);
        config.h_res = HresStrategy::Fixed(ParamSpec::bounded(750.0, 700.0, 760.0));
        let window = Curve {
            x: vec![0.0, 2000.0],
            y: vec![0.0, 0.0],
        };
        let specs = resonance_specs(&config, &window);
        assert_eq!(specs[2], ParamSpec::bounded(750.0, 700.0, 760.0));
    }
}
