//! Formatted terminal output for every stage.
//!
//! Formatting stays here so the signal and fitting code never prints, and
//! output changes are localized.

use std::collections::BTreeMap;

use crate::domain::{AsymptoticPoint, FitResult, MaterialParameters, ResonanceRecord};
use crate::error::{Diagnostic, Severity};
use crate::io::CurveFile;
use crate::signal::Reindexed;

/// Summary of a frequency -> field conversion.
pub fn format_reindex_summary(reindexed: &Reindexed, background_removed: bool) -> String {
    let mut out = String::new();
    out.push_str("=== fmr - field-domain conversion ===\n");
    out.push_str(&format!(
        "Background: {}\n",
        if background_removed { "subtracted" } else { "raw" }
    ));
    let grid = &reindexed.grid;
    match (grid.values.first(), grid.values.last()) {
        (Some(lo), Some(hi)) => out.push_str(&format!(
            "Grid: {} frequencies | [{:.4}, {:.4}] GHz | step {} Hz\n",
            grid.values.len(),
            lo / 1e9,
            hi / 1e9,
            grid.step_hz
        )),
        _ => out.push_str("Grid: empty\n"),
    }
    let samples: usize = reindexed.records.iter().map(|r| r.curve.len()).sum();
    out.push_str(&format!(
        "Records: {} written | {} field samples\n",
        reindexed.records.len(),
        samples
    ));
    out
}

/// Per-frequency table of accepted resonance fits.
pub fn format_resonance_summary(records: &[ResonanceRecord]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Accepted fits: {}\n", records.len()));
    if records.is_empty() {
        return out;
    }
    let with_alpha = records.iter().any(|r| r.alpha.is_some());
    out.push_str(&format!(
        "{:>10}  {:>12}  {:>10}  {:>10}  {:>8}",
        "f (GHz)", "A", "LW (Oe)", "H_res (Oe)", "R2"
    ));
    if with_alpha {
        out.push_str(&format!("  {:>8}", "alpha"));
    }
    out.push('\n');
    for r in records {
        out.push_str(&format!(
            "{:>10.4}  {:>12.4e}  {:>10.3}  {:>10.3}  {:>8.5}",
            r.frequency_hz / 1e9,
            r.a,
            r.lw,
            r.h_res,
            r.r2
        ));
        if with_alpha {
            out.push_str(&format!("  {:>8}", fmt_opt(r.alpha, 5)));
        }
        out.push('\n');
    }
    out
}

/// Fitted parameters with standard errors.
pub fn format_fit(title: &str, fit: &FitResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{title} ({}): n={} R2={:.6} iterations={} nfev={}\n",
        fit.model.display_name(),
        fit.n,
        fit.r2,
        fit.iterations,
        fit.nfev
    ));
    for p in &fit.params {
        out.push_str(&format!(
            "  {:<6} = {:>14.6e} ± {}\n",
            p.name,
            p.value,
            fmt_opt(p.stderr, 3)
        ));
    }
    out
}

pub fn format_material(material: &MaterialParameters) -> String {
    let mut out = String::from("Material parameters:\n");
    for (key, value) in material.iter() {
        out.push_str(&format!("  {:<16} {value}\n", key.column_name()));
    }
    out
}

pub fn format_asymptotic(points: &[AsymptoticPoint]) -> String {
    let mut out = String::new();
    out.push_str("Piecewise Kittel fits:\n");
    out.push_str(&format!(
        "{:>12}  {:>6}  {:>10}  {:>10}  {:>8}  {:>10}  {:>8}\n",
        "cutoff (GHz)", "n", "gamma", "± gamma", "g", "± g", "R2"
    ));
    for p in points {
        out.push_str(&format!(
            "{:>12.4}  {:>6}  {:>10.4}  {:>10}  {:>8.5}  {:>10}  {:>8.5}\n",
            p.cutoff_frequency_hz / 1e9,
            p.n_points,
            p.gamma,
            fmt_opt(p.gamma_stderr, 4),
            p.g_factor,
            fmt_opt(p.g_factor_stderr, 5),
            p.r2
        ));
    }
    out
}

/// Skipped/flagged records tallied by stage and cause, then listed.
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return String::new();
    }
    let mut tally: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for d in diagnostics {
        *tally.entry((d.stage, d.cause.label())).or_default() += 1;
    }

    let mut out = String::from("Diagnostics:\n");
    for ((stage, label), count) in &tally {
        out.push_str(&format!("  {stage:<12} {label:<20} x{count}\n"));
    }
    for d in diagnostics {
        let tag = match d.severity {
            Severity::Warning => "warn",
            Severity::Skipped => "skip",
        };
        out.push_str(&format!("  [{tag}] {} {}: {}\n", d.stage, d.label, d.cause));
    }
    out
}

pub fn format_curve_file(file: &CurveFile) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} curves from `{}` ({}), generated {}\n",
        file.curves.len(),
        file.stage,
        file.tool,
        file.generated.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    for c in &file.curves {
        out.push_str(&format!(
            "  {:<32} {:<28} data={:<5} fit={:<5} R2={:.5}\n",
            c.label,
            c.model.display_name(),
            c.data.len(),
            c.fit.len(),
            c.r2
        ));
    }
    out
}

/// `n/a` for estimates that could not be computed.
fn fmt_opt(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(v) => format!("{v:.precision$}"),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FittedParam, MaterialKey, ModelKind};
    use crate::error::RecordFailure;

    #[test]
    fn unknown_stderr_prints_na() {
        let fit = FitResult {
            model: ModelKind::Kittel,
            params: vec![
                FittedParam { name: "M_eff".into(), value: 1.0, stderr: Some(0.01) },
                FittedParam { name: "H_k".into(), value: 0.002, stderr: None },
            ],
            best_fit: vec![],
            r2: 0.999,
            n: 9,
            iterations: 12,
            nfev: 60,
        };
        let text = format_fit("Kittel", &fit);
        assert!(text.contains("Kittel (Kittel): n=9"));
        assert!(text.contains("± n/a"));
        assert!(text.contains("± 0.010"));
    }

    #[test]
    fn diagnostics_are_tallied_by_cause() {
        let diags = vec![
            Diagnostic::skipped("resonance", 4, "4 GHz", RecordFailure::NoData),
            Diagnostic::skipped("resonance", 5, "5 GHz", RecordFailure::NoData),
            Diagnostic::warning(
                "derivative",
                6,
                "6 GHz",
                RecordFailure::StepMismatch { configured: 10.0, observed: 20.0 },
            ),
        ];
        let text = format_diagnostics(&diags);
        assert!(text.contains("no data"));
        assert!(text.contains("x2"));
        assert!(text.contains("[warn] derivative 6 GHz"));
        assert!(format_diagnostics(&[]).is_empty());
    }

    #[test]
    fn material_rows_in_schema_order() {
        let mut m = MaterialParameters::new();
        m.set_number(MaterialKey::Alpha, 0.005);
        m.set_number(MaterialKey::Gamma, 29.0);
        let text = format_material(&m);
        let gamma = text.find("gamma").unwrap();
        let alpha = text.find("alpha").unwrap();
        assert!(gamma < alpha);
    }
}
