//! Piecewise Kittel analysis on growing frequency prefixes.
//!
//! With segment size `s` and `n` records (ascending frequency) the prefixes are
//! `s, 2s, …` plus a final prefix of all `n` records when `s` does not divide
//! `n`. Each prefix gets its own Kittel fit; watching γ (and g) settle as the
//! cutoff frequency grows shows where the dispersion becomes asymptotic.

use rayon::prelude::*;

use crate::domain::{
    AsymptoticConfig, AsymptoticPoint, FitCurve, ResonanceRecord, g_factor_from_gamma,
};
use crate::error::{AppError, Diagnostic};
use crate::stage::kittel::{fit_kittel_points, kittel_points};
use crate::stage::resonance::{DENSE_POINTS, dense_curve};

const STAGE: &str = "asymptotic";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsymptoticStage {
    pub points: Vec<AsymptoticPoint>,
    pub curves: Vec<FitCurve>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn prefix_lengths(n: usize, segment_size: usize) -> Vec<usize> {
    if segment_size == 0 {
        return Vec::new();
    }
    let mut out: Vec<usize> = (segment_size..=n).step_by(segment_size).collect();
    if n % segment_size != 0 {
        out.push(n);
    }
    out
}

pub fn asymptotic_analysis(
    records: &[ResonanceRecord],
    config: &AsymptoticConfig,
) -> Result<AsymptoticStage, AppError> {
    config.validate()?;
    if records.is_empty() {
        return Err(AppError::missing_input(
            "No resonance records for the asymptotic analysis.",
        ));
    }
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));

    let results: Vec<_> = prefix_lengths(sorted.len(), config.segment_size)
        .into_par_iter()
        .map(|len| {
            let prefix = &sorted[..len];
            let cutoff = prefix[len - 1].frequency_hz;
            let points = kittel_points(prefix);
            let fit = fit_kittel_points(&points, &config.kittel);
            (len, cutoff, prefix[len - 1].key, points, fit)
        })
        .collect();

    let mut stage = AsymptoticStage::default();
    for (len, cutoff, key, points, fit) in results {
        let label = format!("first {len} up to {cutoff} Hz");
        match fit {
            Ok(fit) => {
                let gamma = fit.params[2].value;
                let gamma_stderr = fit.params[2].stderr;
                stage.points.push(AsymptoticPoint {
                    cutoff_frequency_hz: cutoff,
                    n_points: len,
                    gamma,
                    gamma_stderr,
                    g_factor: g_factor_from_gamma(gamma),
                    g_factor_stderr: gamma_stderr.map(g_factor_from_gamma),
                    r2: fit.r2,
                });
                stage.curves.push(FitCurve {
                    label,
                    model: fit.model,
                    fit: dense_curve(&fit, &points, DENSE_POINTS),
                    data: points,
                    r2: fit.r2,
                });
            }
            Err(cause) => {
                log::warn!("{label}: skipped, {cause}");
                stage.diagnostics.push(Diagnostic::skipped(STAGE, key, label, cause));
            }
        }
    }
    if let Some(last) = stage.points.last() {
        log::info!(
            "Asymptotic g-factor {:.4} from {} prefixes",
            last.g_factor,
            stage.points.len()
        );
    }
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordFailure;
    use crate::stage::kittel::tests::kittel_records;

    #[test]
    fn prefixes_cover_remainder() {
        assert_eq!(prefix_lengths(10, 4), vec![4, 8, 10]);
        assert_eq!(prefix_lengths(8, 4), vec![4, 8]);
        assert_eq!(prefix_lengths(3, 4), vec![3]);
        assert!(prefix_lengths(0, 4).is_empty());
    }

    #[test]
    fn cutoffs_are_last_frequency_of_each_prefix() {
        let records = kittel_records(1.0, 0.0017, 29.0, 10);
        let stage = asymptotic_analysis(&records, &AsymptoticConfig::default()).unwrap();
        let cutoffs: Vec<f64> = stage.points.iter().map(|p| p.cutoff_frequency_hz).collect();
        assert_eq!(
            cutoffs,
            vec![records[3].frequency_hz, records[7].frequency_hz, records[9].frequency_hz]
        );
        let sizes: Vec<usize> = stage.points.iter().map(|p| p.n_points).collect();
        assert_eq!(sizes, vec![4, 8, 10]);
        for p in &stage.points {
            assert!((p.gamma - 29.0).abs() < 0.1, "gamma={}", p.gamma);
        }
    }

    #[test]
    fn short_prefix_is_a_diagnostic() {
        let records = kittel_records(1.0, 0.0017, 29.0, 5);
        let config = AsymptoticConfig {
            segment_size: 2,
            ..AsymptoticConfig::default()
        };
        let stage = asymptotic_analysis(&records, &config).unwrap();
        // Prefix of 2 cannot constrain three parameters.
        assert_eq!(stage.diagnostics.len(), 1);
        assert!(matches!(
            stage.diagnostics[0].cause,
            RecordFailure::InsufficientPoints { n: 2, p: 3 }
        ));
        assert_eq!(stage.points.len(), 2);
    }
}
