//! Shared pipeline logic used by `fmr run` and the per-stage commands.
//!
//! `run_chain` takes raw sweeps to material parameters entirely in memory:
//! re-index (with optional background removal) -> derivative -> resonance
//! fits -> Kittel -> linewidth -> asymptotic. `persist` then writes the same
//! hand-off tables the per-stage commands produce, so a `run` directory can be
//! picked up by any later stage.

use std::path::{Path, PathBuf};

use crate::domain::{
    FieldDomainRecord, Lineshape, MaterialKey, MaterialParameters, PipelineConfig, Sweep,
};
use crate::error::{AppError, Diagnostic};
use crate::io::{
    ASYMPTOTIC_TABLE, CurveFile, DERIVATIVE_COLUMNS, FIELD_DOMAIN_COLUMNS, MATERIAL_TABLE,
    RESONANCE_TABLE, update_material_table, write_asymptotic_table, write_record_dir,
    write_resonance_table,
};
use crate::signal::{Reindexed, convert_sweeps, differentiate_records};
use crate::stage::{
    AsymptoticStage, KittelOutcome, LinewidthOutcome, ResonanceStage, asymptotic_analysis,
    fit_kittel, fit_linewidth, fit_resonances,
};

pub const FIELD_DOMAIN_DIR: &str = "field domain data";
pub const BACKGROUND_DIR: &str = "background removal";
pub const DERIVATIVE_DIR: &str = "ds21";

/// Where the field-domain tables of a work directory live.
pub fn field_domain_dir(work_dir: &Path, background_removed: bool) -> PathBuf {
    work_dir.join(if background_removed {
        BACKGROUND_DIR
    } else {
        FIELD_DOMAIN_DIR
    })
}

/// Field-domain tables a later stage reads by default: background-removed
/// when a `background` run produced them, otherwise the raw conversion.
pub fn latest_field_domain_dir(work_dir: &Path) -> PathBuf {
    let background = field_domain_dir(work_dir, true);
    if background.is_dir() {
        background
    } else {
        field_domain_dir(work_dir, false)
    }
}

pub fn derivative_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(DERIVATIVE_DIR)
}

/// All computed outputs of a single `fmr run`.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub reindexed: Reindexed,
    /// Empty when the resonance fits used the absorption lineshape.
    pub derivatives: Vec<FieldDomainRecord>,
    pub resonance: ResonanceStage,
    pub kittel: KittelOutcome,
    pub linewidth: LinewidthOutcome,
    pub material: MaterialParameters,
    pub asymptotic: Option<AsymptoticStage>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PipelineContext {
    /// Every fitted curve of the run, for renderers.
    pub fn curve_file(&self) -> CurveFile {
        let mut curves = self.resonance.curves.clone();
        curves.push(self.kittel.curve.clone());
        curves.push(self.linewidth.curve.clone());
        if let Some(a) = &self.asymptotic {
            curves.extend(a.curves.iter().cloned());
        }
        CurveFile::new("run", curves)
    }
}

/// Execute the full reduction chain in memory.
pub fn run_chain(sweeps: &[Sweep], config: &PipelineConfig) -> Result<PipelineContext, AppError> {
    config.validate()?;
    let mut diagnostics = Vec::new();

    // 1) Frequency -> field domain.
    let reindexed = convert_sweeps(sweeps, &config.index)?;
    diagnostics.extend(reindexed.diagnostics.iter().cloned());

    // 2) Derivative tables, unless fitting absorption dips directly.
    let derivatives = match config.resonance.lineshape {
        Lineshape::Absorption => Vec::new(),
        Lineshape::Derivative | Lineshape::Skew => {
            let (records, diags) = differentiate_records(&reindexed.records, &config.derivative);
            diagnostics.extend(diags);
            records
        }
    };
    let fit_input = match config.resonance.lineshape {
        Lineshape::Absorption => &reindexed.records,
        Lineshape::Derivative | Lineshape::Skew => &derivatives,
    };

    // 3) Per-frequency resonance fits.
    let resonance = fit_resonances(fit_input, &config.resonance);
    diagnostics.extend(resonance.diagnostics.iter().cloned());

    // 4) Dispersion and damping.
    let kittel = fit_kittel(&resonance.records, &config.kittel)?;
    let mut material = kittel.material.clone();
    let linewidth = fit_linewidth(&resonance.records, &material, &config.linewidth)?;
    material.merge(&linewidth.material);

    // 5) Piecewise Kittel.
    let asymptotic = match &config.asymptotic {
        Some(a) => {
            let stage = asymptotic_analysis(&resonance.records, a)?;
            diagnostics.extend(stage.diagnostics.iter().cloned());
            Some(stage)
        }
        None => None,
    };

    Ok(PipelineContext {
        reindexed,
        derivatives,
        resonance,
        kittel,
        linewidth,
        material,
        asymptotic,
        diagnostics,
    })
}

/// Write every hand-off table of `ctx` under `work_dir`.
pub fn persist(
    ctx: &PipelineContext,
    work_dir: &Path,
    config: &PipelineConfig,
) -> Result<(), AppError> {
    let background_removed = config.index.reference.is_some();
    write_record_dir(
        &field_domain_dir(work_dir, background_removed),
        &ctx.reindexed.records,
        FIELD_DOMAIN_COLUMNS,
    )?;
    if !ctx.derivatives.is_empty() {
        write_record_dir(&derivative_dir(work_dir), &ctx.derivatives, DERIVATIVE_COLUMNS)?;
    }
    write_resonance_table(&work_dir.join(RESONANCE_TABLE), &ctx.resonance.records)?;
    update_material_table(
        &work_dir.join(MATERIAL_TABLE),
        &ctx.material,
        &MaterialKey::DAMPING,
    )?;
    if let Some(a) = &ctx.asymptotic {
        write_asymptotic_table(&work_dir.join(ASYMPTOTIC_TABLE), &a.points)?;
    }
    log::info!("Wrote run outputs to '{}'", work_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SynthConfig, generate_sweeps};
    use crate::domain::{
        AsymptoticConfig, DerivativeConfig, IndexConfig, KittelConfig, LinewidthConfig,
        ReferenceSweep, ResonanceFitConfig,
    };
    use crate::io::{read_material_table, read_resonance_table};

    fn config(lineshape: Lineshape) -> PipelineConfig {
        PipelineConfig {
            index: IndexConfig {
                step_hz: 1e9,
                reference: Some(ReferenceSweep::First),
            },
            derivative: DerivativeConfig::default(),
            resonance: ResonanceFitConfig::preset(lineshape),
            kittel: KittelConfig::default(),
            linewidth: LinewidthConfig::default(),
            asymptotic: Some(AsymptoticConfig::default()),
        }
    }

    #[test]
    fn synthetic_sweeps_reduce_to_the_generating_gamma() {
        let synth = SynthConfig::default();
        let sweeps = generate_sweeps(&synth).unwrap();
        let ctx = run_chain(&sweeps, &config(Lineshape::Derivative)).unwrap();

        assert_eq!(ctx.reindexed.records.len(), 9);
        assert_eq!(ctx.resonance.records.len(), 9, "{:?}", ctx.diagnostics);
        for r in &ctx.resonance.records {
            let (h_res, _) = synth.resonance_at(r.frequency_hz);
            assert!((r.h_res - h_res).abs() < 5.0, "{} Hz: {} vs {h_res}", r.frequency_hz, r.h_res);
        }

        let gamma = ctx.material.number(MaterialKey::Gamma).unwrap();
        assert!((gamma - synth.gamma).abs() / synth.gamma < 0.02, "gamma={gamma}");
        assert!(ctx.material.number(MaterialKey::Alpha).is_some());
        assert!(ctx.material.get(MaterialKey::Material).is_some());

        let asym = ctx.asymptotic.as_ref().unwrap();
        assert_eq!(asym.points.len(), 3);
        assert_eq!(asym.points.last().unwrap().cutoff_frequency_hz, 12e9);
    }

    #[test]
    fn absorption_chain_skips_the_derivative() {
        let sweeps = generate_sweeps(&SynthConfig::default()).unwrap();
        let mut cfg = config(Lineshape::Absorption);
        cfg.asymptotic = None;
        let ctx = run_chain(&sweeps, &cfg).unwrap();
        assert!(ctx.derivatives.is_empty());
        assert!(ctx.asymptotic.is_none());
        let gamma = ctx.material.number(MaterialKey::Gamma).unwrap();
        assert!((gamma - 29.0).abs() / 29.0 < 0.02, "gamma={gamma}");
    }

    #[test]
    fn persisted_run_can_be_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let sweeps = generate_sweeps(&SynthConfig::default()).unwrap();
        let cfg = config(Lineshape::Derivative);
        let ctx = run_chain(&sweeps, &cfg).unwrap();
        persist(&ctx, dir.path(), &cfg).unwrap();

        assert!(dir.path().join(BACKGROUND_DIR).join("4000000000.csv").exists());
        assert!(dir.path().join(DERIVATIVE_DIR).join("12000000000.csv").exists());
        assert!(dir.path().join(ASYMPTOTIC_TABLE).exists());

        let records = read_resonance_table(&dir.path().join(RESONANCE_TABLE)).unwrap();
        assert_eq!(records.len(), ctx.resonance.records.len());
        let material = read_material_table(&dir.path().join(MATERIAL_TABLE)).unwrap();
        assert_eq!(material, ctx.material);
    }
}
