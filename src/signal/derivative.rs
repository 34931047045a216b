//! Central-difference differentiation of field-domain records.
//!
//! `dS/dH[i] ≈ (S[i+1] − S[i−1]) / (2·dH)` for every interior sample, so the
//! output has `n − 2` points located at the interior fields. `dH` is the
//! configured step. Every interval `H[i+1] − H[i−1]` is checked against `2·dH`;
//! a mismatch (uneven sampling, or a field missing from the record) is handled
//! by `StepCheck`.

use rayon::prelude::*;

use crate::domain::{Curve, DerivativeConfig, FieldDomainRecord, StepCheck};
use crate::error::{Diagnostic, RecordFailure};

const STAGE: &str = "derivative";

/// Relative difference at which an interval counts as a mismatch.
const STEP_RTOL: f64 = 1e-6;

/// Outcome of differentiating one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Differentiated {
    /// `None` when the record was skipped.
    pub record: Option<FieldDomainRecord>,
    pub diagnostic: Option<Diagnostic>,
}

/// Half of the first central interval that is not `2·step`, if any.
pub fn first_step_mismatch(curve: &Curve, step: f64) -> Option<f64> {
    curve
        .x
        .windows(3)
        .map(|w| 0.5 * (w[2] - w[0]))
        .find(|half| (half - step).abs() > STEP_RTOL * step)
}

/// Central differences with a fixed step.
pub fn central_difference(curve: &Curve, step: f64) -> Curve {
    central_difference_by(curve, |_| 2.0 * step)
}

/// Central differences over the sampled intervals.
pub fn central_difference_observed(curve: &Curve) -> Curve {
    central_difference_by(curve, |i| curve.x[i + 1] - curve.x[i - 1])
}

fn central_difference_by(curve: &Curve, interval: impl Fn(usize) -> f64) -> Curve {
    if curve.len() < 3 {
        return Curve::default();
    }
    let n = curve.len();
    let x = curve.x[1..n - 1].to_vec();
    let y = (1..n - 1)
        .map(|i| (curve.y[i + 1] - curve.y[i - 1]) / interval(i))
        .collect();
    Curve { x, y }
}

pub fn differentiate(record: &FieldDomainRecord, config: &DerivativeConfig) -> Differentiated {
    let label = format!("{} Hz", record.frequency_hz);
    let n = record.curve.len();
    if n < 3 {
        return Differentiated {
            record: None,
            diagnostic: Some(Diagnostic::skipped(
                STAGE,
                record.key,
                label,
                RecordFailure::InsufficientPoints { n, p: 3 },
            )),
        };
    }

    let step = config.step_oe;
    let mut diagnostic = None;
    let mut curve = None;
    if let Some(observed) = first_step_mismatch(&record.curve, step) {
        let cause = RecordFailure::StepMismatch {
            configured: step,
            observed,
        };
        match config.step_check {
            StepCheck::Warn => {
                log::warn!("{label}: {cause}");
                diagnostic = Some(Diagnostic::warning(STAGE, record.key, label.clone(), cause));
            }
            StepCheck::Reject => {
                log::warn!("{label}: skipped, {cause}");
                return Differentiated {
                    record: None,
                    diagnostic: Some(Diagnostic::skipped(STAGE, record.key, label, cause)),
                };
            }
            StepCheck::Observed => {
                log::info!("{label}: {cause}; using sampled intervals");
                curve = Some(central_difference_observed(&record.curve));
            }
        }
    }

    Differentiated {
        record: Some(FieldDomainRecord {
            key: record.key,
            frequency_hz: record.frequency_hz,
            curve: curve.unwrap_or_else(|| central_difference(&record.curve, step)),
        }),
        diagnostic,
    }
}

/// Differentiate every record in parallel; output keeps input order.
pub fn differentiate_records(
    records: &[FieldDomainRecord],
    config: &DerivativeConfig,
) -> (Vec<FieldDomainRecord>, Vec<Diagnostic>) {
    let results: Vec<Differentiated> = records
        .par_iter()
        .map(|r| differentiate(r, config))
        .collect();
    let mut out = Vec::with_capacity(results.len());
    let mut diagnostics = Vec::new();
    for r in results {
        out.extend(r.record);
        diagnostics.extend(r.diagnostic);
    }
    log::info!(
        "Differentiated {} of {} records with dH={} Oe",
        out.len(),
        records.len(),
        config.step_oe
    );
    (out, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;

    fn record(x: Vec<f64>, y: Vec<f64>) -> FieldDomainRecord {
        FieldDomainRecord {
            key: 5_000_000_000,
            frequency_hz: 5e9,
            curve: Curve { x, y },
        }
    }

    #[test]
    fn linear_curve_has_constant_derivative() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 10.0).collect();
        let y: Vec<f64> = x.iter().map(|h| 0.25 * h - 3.0).collect();
        let out = differentiate(&record(x.clone(), y), &DerivativeConfig::default());
        assert!(out.diagnostic.is_none());
        let d = out.record.unwrap().curve;
        assert_eq!(d.len(), x.len() - 2);
        assert_eq!(d.x, x[1..x.len() - 1].to_vec());
        assert!(d.y.iter().all(|v| (v - 0.25).abs() < 1e-12));
    }

    #[test]
    fn step_mismatch_policies() {
        let x: Vec<f64> = (0..10).map(|i| i as f64 * 20.0).collect();
        let y: Vec<f64> = x.iter().map(|h| 2.0 * h).collect();

        let warn = differentiate(&record(x.clone(), y.clone()), &DerivativeConfig::default());
        let diag = warn.diagnostic.unwrap();
        assert_eq!(diag.severity, Severity::Warning);
        // Configured 10 Oe on 20 Oe data doubles the slope.
        assert!((warn.record.unwrap().curve.y[0] - 4.0).abs() < 1e-12);

        let reject = differentiate(
            &record(x.clone(), y.clone()),
            &DerivativeConfig {
                step_oe: 10.0,
                step_check: StepCheck::Reject,
            },
        );
        assert!(reject.record.is_none());
        assert_eq!(reject.diagnostic.unwrap().severity, Severity::Skipped);

        let observed = differentiate(
            &record(x, y),
            &DerivativeConfig {
                step_oe: 10.0,
                step_check: StepCheck::Observed,
            },
        );
        assert!(observed.diagnostic.is_none());
        assert!((observed.record.unwrap().curve.y[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn short_record_is_skipped() {
        let short = record(vec![0.0, 10.0], vec![1.0, 2.0]);
        let out = differentiate(&short, &DerivativeConfig::default());
        assert!(out.record.is_none());
        assert!(matches!(
            out.diagnostic.unwrap().cause,
            RecordFailure::InsufficientPoints { n: 2, p: 3 }
        ));
    }

    #[test]
    fn missing_field_row_triggers_the_step_policy() {
        // 30 Oe is absent: the intervals around it span 30 Oe instead of 20.
        let x = vec![0.0, 10.0, 20.0, 40.0, 50.0, 60.0];
        let y: Vec<f64> = x.iter().map(|h| 2.0 * h).collect();
        assert_eq!(first_step_mismatch(&Curve { x: x.clone(), y: y.clone() }, 10.0), Some(15.0));

        let warn = differentiate(&record(x.clone(), y.clone()), &DerivativeConfig::default());
        let diag = warn.diagnostic.unwrap();
        assert_eq!(diag.severity, Severity::Warning);
        assert!(matches!(
            diag.cause,
            RecordFailure::StepMismatch { observed, .. } if observed == 15.0
        ));

        let reject = differentiate(
            &record(x.clone(), y.clone()),
            &DerivativeConfig {
                step_oe: 10.0,
                step_check: StepCheck::Reject,
            },
        );
        assert!(reject.record.is_none());

        let observed = differentiate(
            &record(x, y),
            &DerivativeConfig {
                step_oe: 10.0,
                step_check: StepCheck::Observed,
            },
        );
        let d = observed.record.unwrap().curve;
        assert_eq!(d.x, vec![10.0, 20.0, 40.0, 50.0]);
        assert!(d.y.iter().all(|v| (v - 2.0).abs() < 1e-12), "{:?}", d.y);
    }
}
