//! Frequency → field re-indexing.
//!
//! Raw input is one frequency sweep per applied field. Downstream fits need
//! the transpose: for each frequency, the signal as a function of field. The
//! grid of frequencies comes from the first sweep (lowest key) and a
//! configured step; each sweep contributes one sample per grid frequency if it
//! was measured there.

use rayon::prelude::*;

use crate::domain::{Curve, FieldDomainRecord, FrequencyGrid, IndexConfig, ReferenceSweep, Sweep};
use crate::error::{AppError, Diagnostic, RecordFailure};
use crate::signal::subtract_background;

const STAGE: &str = "reindex";

/// Field-domain records plus the per-frequency diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Reindexed {
    pub grid: FrequencyGrid,
    pub records: Vec<FieldDomainRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Integer key of a grid frequency; also the stem of its table file.
pub fn frequency_key(frequency_hz: f64) -> i64 {
    frequency_hz.round() as i64
}

/// `min, min + step, …` up to and including `max` of the sweep's frequencies.
pub fn build_grid(sweep: &Sweep, step_hz: f64) -> Result<FrequencyGrid, AppError> {
    let Some((lo, hi)) = sweep.curve.x_range() else {
        return Err(AppError::missing_input(format!(
            "Sweep {} has no samples to build a frequency grid from.",
            sweep.key
        )));
    };
    let count = ((hi - lo) / step_hz * (1.0 + 1e-12)).floor() as usize + 1;
    let values = (0..count).map(|i| lo + i as f64 * step_hz).collect();
    Ok(FrequencyGrid { step_hz, values })
}

pub fn find_reference(sweeps: &[Sweep], reference: ReferenceSweep) -> Result<&Sweep, AppError> {
    match reference {
        ReferenceSweep::First => sweeps.first(),
        ReferenceSweep::Key(key) => sweeps.iter().find(|s| s.key == key),
    }
    .ok_or_else(|| match reference {
        ReferenceSweep::First => {
            AppError::missing_input("No sweeps to take a background reference from.")
        }
        ReferenceSweep::Key(key) => AppError::missing_input(format!(
            "Background reference sweep with key {key} not found."
        )),
    })
}

/// Collect every sweep's sample at each grid frequency.
pub fn reindex(
    sweeps: &[Sweep],
    grid: &FrequencyGrid,
) -> (Vec<FieldDomainRecord>, Vec<Diagnostic>) {
    let results: Vec<Result<FieldDomainRecord, Diagnostic>> = grid
        .values
        .par_iter()
        .map(|&f| {
            let key = frequency_key(f);
            let pairs: Vec<(f64, f64)> = sweeps
                .iter()
                .filter_map(|s| s.curve.value_at(f).map(|v| (s.field_oe, v)))
                .collect();
            if pairs.is_empty() {
                let label = format!("{f} Hz");
                return Err(Diagnostic::skipped(STAGE, key, label, RecordFailure::NoData));
            }
            Ok(FieldDomainRecord {
                key,
                frequency_hz: f,
                curve: Curve::from_pairs(pairs),
            })
        })
        .collect();

    let mut records = Vec::with_capacity(results.len());
    let mut diagnostics = Vec::new();
    for r in results {
        match r {
            Ok(rec) => records.push(rec),
            Err(d) => {
                log::warn!("{}: {}", d.label, d.cause);
                diagnostics.push(d);
            }
        }
    }
    (records, diagnostics)
}

/// Full conversion: optional background removal, grid construction and
/// re-indexing. `sweeps` must be sorted by key.
pub fn convert_sweeps(sweeps: &[Sweep], config: &IndexConfig) -> Result<Reindexed, AppError> {
    config.validate()?;
    let Some(first) = sweeps.first() else {
        return Err(AppError::missing_input("No sweeps to convert."));
    };
    let grid = build_grid(first, config.step_hz)?;

    let corrected;
    let source = match config.reference {
        Some(reference) => {
            let background = find_reference(sweeps, reference)?;
            log::info!("Subtracting background sweep {}", background.key);
            corrected = sweeps
                .iter()
                .map(|s| subtract_background(s, background))
                .collect::<Vec<_>>();
            corrected.as_slice()
        }
        None => sweeps,
    };

    let (records, diagnostics) = reindex(source, &grid);
    log::info!(
        "Re-indexed {} sweeps onto {} frequencies ({} without data)",
        sweeps.len(),
        grid.values.len(),
        diagnostics.len()
    );
    Ok(Reindexed {
        grid,
        records,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(field: i64, freqs: &[f64], level: f64) -> Sweep {
        Sweep {
            key: field,
            field_oe: field as f64,
            curve: Curve {
                x: freqs.to_vec(),
                y: freqs.iter().map(|f| level + f * 1e-10).collect(),
            },
        }
    }

    #[test]
    fn grid_includes_both_ends() {
        let s = sweep(0, &[1e9, 1.5e9, 2e9, 2.5e9, 3e9], 0.0);
        let grid = build_grid(&s, 1e9).unwrap();
        assert_eq!(grid.values, vec![1e9, 2e9, 3e9]);

        let uneven = build_grid(&s, 0.75e9).unwrap();
        assert_eq!(uneven.values, vec![1e9, 1.75e9, 2.5e9]);
    }

    #[test]
    fn records_are_sorted_by_field() {
        let freqs = [1e9, 2e9, 3e9];
        let sweeps = vec![
            sweep(300, &freqs, 3.0),
            sweep(100, &freqs, 1.0),
            sweep(200, &freqs[..2], 2.0),
        ];
        let grid = FrequencyGrid {
            step_hz: 1e9,
            values: freqs.to_vec(),
        };
        let (records, diags) = reindex(&sweeps, &grid);
        assert!(diags.is_empty());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].curve.x, vec![100.0, 200.0, 300.0]);
        // Sweep 200 was not measured at 3 GHz.
        assert_eq!(records[2].curve.x, vec![100.0, 300.0]);
        assert_eq!(records[2].key, 3_000_000_000);
    }

    #[test]
    fn frequency_without_samples_is_no_data() {
        let sweeps = vec![sweep(0, &[1e9, 3e9], 0.0)];
        let grid = FrequencyGrid {
            step_hz: 1e9,
            values: vec![1e9, 2e9, 3e9],
        };
        let (records, diags) = reindex(&sweeps, &grid);
        assert_eq!(records.len(), 2);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].cause, RecordFailure::NoData);
        assert_eq!(diags[0].key, 2_000_000_000);
    }

    #[test]
    fn background_reference_zeroes_itself() {
        let freqs = [1e9, 2e9];
        let sweeps = vec![sweep(0, &freqs, 5.0), sweep(100, &freqs, 7.0)];
        let out = convert_sweeps(
            &sweeps,
            &IndexConfig {
                step_hz: 1e9,
                reference: Some(ReferenceSweep::Key(0)),
            },
        )
        .unwrap();
        for rec in &out.records {
            assert_eq!(rec.curve.y[0], 0.0);
            assert!((rec.curve.y[1] - 2.0).abs() < 1e-12);
        }

        let missing = convert_sweeps(
            &sweeps,
            &IndexConfig {
                step_hz: 1e9,
                reference: Some(ReferenceSweep::Key(42)),
            },
        );
        assert!(missing.is_err());
    }
}
