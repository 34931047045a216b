//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - turns flags into per-stage configs
//! - reads the previous stage's hand-off files
//! - runs the stage and writes its outputs
//! - prints reports

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::cli::{
    AsymptoticArgs, BackgroundArgs, BudgetArgs, Command, ConvertArgs, CurvesArgs, DampingArgs,
    DeriveArgs, DerivativeArgs, IndexArgs, KittelArgs, KittelGuessArgs, LineshapeArgs,
    LinewidthArgs, ResonanceArgs, RunArgs, SynthArgs,
};
use crate::data::{SynthConfig, generate_sweeps, write_sweeps};
use crate::domain::{
    AsymptoticConfig, DerivativeConfig, FitBudget, FitCurve, HresStrategy, IndexConfig,
    KittelConfig, Lineshape, LinewidthConfig, MaterialKey, ParamSpec, PipelineConfig,
    ReferenceSweep, ResonanceFitConfig,
};
use crate::error::{AppError, Diagnostic};
use crate::io::{
    ASYMPTOTIC_TABLE, CurveFile, DERIVATIVE_COLUMNS, FIELD_DOMAIN_COLUMNS, MATERIAL_TABLE,
    RESONANCE_TABLE, load_record_dir, load_sweeps, read_curve_json, read_material_table,
    read_resonance_table, update_material_table, write_asymptotic_table, write_curve_json,
    write_record_dir, write_resonance_table,
};
use crate::report::{
    format_asymptotic, format_curve_file, format_diagnostics, format_fit, format_material,
    format_reindex_summary, format_resonance_summary,
};
use crate::signal::{convert_sweeps, differentiate_records};
use crate::stage::{asymptotic_analysis, fit_kittel, fit_linewidth, fit_resonances};

pub mod pipeline;

use pipeline::{derivative_dir, field_domain_dir, latest_field_domain_dir};

/// H_k starting guess of the full-range Kittel fit (T).
const KITTEL_H_K: f64 = 0.01;
/// H_k starting guess of the piecewise Kittel fits (T).
const ASYMPTOTIC_H_K: f64 = 0.0017;

/// Entry point for the `fmr` binary.
pub fn run() -> Result<(), AppError> {
    // A missing `.env` is fine; flags and the real environment still apply.
    dotenvy::dotenv().ok();
    let cli = crate::cli::Cli::parse();

    match cli.threads {
        Some(0) => Err(AppError::config("--threads must be > 0.")),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| AppError::config(format!("Cannot start {n} worker threads: {e}")))?;
            log::debug!("Using {n} worker threads");
            pool.install(|| dispatch(cli.command))
        }
        None => dispatch(cli.command),
    }
}

fn dispatch(command: Command) -> Result<(), AppError> {
    match command {
        Command::Convert(args) => handle_convert(args),
        Command::Background(args) => handle_background(args),
        Command::Derive(args) => handle_derive(args),
        Command::Resonance(args) => handle_resonance(args),
        Command::Kittel(args) => handle_kittel(args),
        Command::Linewidth(args) => handle_linewidth(args),
        Command::Asymptotic(args) => handle_asymptotic(args),
        Command::Run(args) => handle_run(args),
        Command::Synth(args) => handle_synth(args),
        Command::Curves(args) => handle_curves(args),
    }
}

fn handle_convert(args: ConvertArgs) -> Result<(), AppError> {
    reindex_to_dir(&args.work.dir, &index_config_from_args(&args.index, None), &args.index)
}

fn handle_background(args: BackgroundArgs) -> Result<(), AppError> {
    let config = index_config_from_args(&args.index, Some(args.reference));
    reindex_to_dir(&args.work.dir, &config, &args.index)
}

fn reindex_to_dir(work_dir: &Path, config: &IndexConfig, args: &IndexArgs) -> Result<(), AppError> {
    config.validate()?;
    let sweeps = load_sweeps(&args.input, &args.ext)?;
    let reindexed = convert_sweeps(&sweeps, config)?;

    let background_removed = config.reference.is_some();
    let out_dir = field_domain_dir(work_dir, background_removed);
    write_record_dir(&out_dir, &reindexed.records, FIELD_DOMAIN_COLUMNS)?;

    println!("{}", format_reindex_summary(&reindexed, background_removed));
    print_diagnostics(&reindexed.diagnostics);
    Ok(())
}

fn handle_derive(args: DeriveArgs) -> Result<(), AppError> {
    let config = derivative_config_from_args(&args.derivative);
    config.validate()?;
    let input = args
        .input
        .unwrap_or_else(|| latest_field_domain_dir(&args.work.dir));
    let records = load_record_dir(&input, FIELD_DOMAIN_COLUMNS[0], FIELD_DOMAIN_COLUMNS[1])?;

    let (derivatives, diagnostics) = differentiate_records(&records, &config);
    let out_dir = derivative_dir(&args.work.dir);
    write_record_dir(&out_dir, &derivatives, DERIVATIVE_COLUMNS)?;

    println!(
        "Differentiated {} of {} records (dH={} Oe) into '{}'",
        derivatives.len(),
        records.len(),
        config.step_oe,
        out_dir.display()
    );
    print_diagnostics(&diagnostics);
    Ok(())
}

fn handle_resonance(args: ResonanceArgs) -> Result<(), AppError> {
    let budget = budget_from_args(&args.budget)?;
    let config = resonance_config_from_args(&args.lineshape, budget)?;
    config.validate()?;

    let (input, columns) = resonance_input(&args.work.dir, args.input, config.lineshape);
    let records = load_record_dir(&input, columns[0], columns[1])?;
    let stage = fit_resonances(&records, &config);
    write_resonance_table(&args.work.dir.join(RESONANCE_TABLE), &stage.records)?;

    println!("{}", format_resonance_summary(&stage.records));
    print_diagnostics(&stage.diagnostics);
    write_curves(args.curves.as_deref(), "resonance", stage.curves)
}

fn handle_kittel(args: KittelArgs) -> Result<(), AppError> {
    let budget = budget_from_args(&args.budget)?;
    let config = kittel_config_from_args(&args.guess, KITTEL_H_K, budget);
    let records = read_resonance_table(&args.work.dir.join(RESONANCE_TABLE))?;

    let outcome = fit_kittel(&records, &config)?;
    // A new γ invalidates any damping fitted against the old one.
    let material = update_material_table(
        &args.work.dir.join(MATERIAL_TABLE),
        &outcome.material,
        &MaterialKey::DAMPING,
    )?;

    println!("{}", format_fit("Kittel", &outcome.fit));
    println!("{}", format_material(&material));
    write_curves(args.curves.as_deref(), "kittel", vec![outcome.curve])
}

fn handle_linewidth(args: LinewidthArgs) -> Result<(), AppError> {
    let budget = budget_from_args(&args.budget)?;
    let config = linewidth_config_from_args(&args.damping, budget);
    let records = read_resonance_table(&args.work.dir.join(RESONANCE_TABLE))?;

    let material_path = args.work.dir.join(MATERIAL_TABLE);
    if !material_path.exists() {
        return Err(AppError::missing_input(format!(
            "'{}' not found; run the kittel stage first.",
            material_path.display()
        )));
    }
    let material = read_material_table(&material_path)?;

    let outcome = fit_linewidth(&records, &material, &config)?;
    let material = update_material_table(&material_path, &outcome.material, &[])?;

    println!("{}", format_fit("Linewidth", &outcome.fit));
    println!("{}", format_material(&material));
    write_curves(args.curves.as_deref(), "linewidth", vec![outcome.curve])
}

fn handle_asymptotic(args: AsymptoticArgs) -> Result<(), AppError> {
    let budget = budget_from_args(&args.budget)?;
    let config = AsymptoticConfig {
        segment_size: args.segment_size,
        kittel: kittel_config_from_args(&args.guess, ASYMPTOTIC_H_K, budget),
    };
    let records = read_resonance_table(&args.work.dir.join(RESONANCE_TABLE))?;

    let stage = asymptotic_analysis(&records, &config)?;
    write_asymptotic_table(&args.work.dir.join(ASYMPTOTIC_TABLE), &stage.points)?;

    println!("{}", format_asymptotic(&stage.points));
    print_diagnostics(&stage.diagnostics);
    write_curves(args.curves.as_deref(), "asymptotic", stage.curves)
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = pipeline_config_from_args(&args)?;
    config.validate()?;
    let sweeps = load_sweeps(&args.index.input, &args.index.ext)?;

    let ctx = pipeline::run_chain(&sweeps, &config)?;
    pipeline::persist(&ctx, &args.work.dir, &config)?;

    println!(
        "{}",
        format_reindex_summary(&ctx.reindexed, config.index.reference.is_some())
    );
    println!("{}", format_resonance_summary(&ctx.resonance.records));
    println!("{}", format_fit("Kittel", &ctx.kittel.fit));
    println!("{}", format_fit("Linewidth", &ctx.linewidth.fit));
    println!("{}", format_material(&ctx.material));
    if let Some(a) = &ctx.asymptotic {
        println!("{}", format_asymptotic(&a.points));
    }
    print_diagnostics(&ctx.diagnostics);

    if let Some(path) = &args.curves {
        write_curve_json(path, &ctx.curve_file())?;
        println!("Wrote fit curves to '{}'", path.display());
    }
    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let config = synth_config_from_args(&args);
    let sweeps = generate_sweeps(&config)?;
    write_sweeps(&args.output, &sweeps)?;
    println!(
        "Wrote {} synthetic sweeps ({} frequencies each) to '{}'",
        sweeps.len(),
        config.frequencies().len(),
        args.output.display()
    );
    Ok(())
}

fn handle_curves(args: CurvesArgs) -> Result<(), AppError> {
    let file = read_curve_json(&args.file)?;
    println!("{}", format_curve_file(&file));
    Ok(())
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    let text = format_diagnostics(diagnostics);
    if !text.is_empty() {
        println!("{text}");
    }
}

fn write_curves(path: Option<&Path>, stage: &str, curves: Vec<FitCurve>) -> Result<(), AppError> {
    if let Some(path) = path {
        write_curve_json(path, &CurveFile::new(stage, curves))?;
        println!("Wrote fit curves to '{}'", path.display());
    }
    Ok(())
}

/// Default input directory and column names for a lineshape.
fn resonance_input(
    work_dir: &Path,
    input: Option<PathBuf>,
    lineshape: Lineshape,
) -> (PathBuf, [&'static str; 2]) {
    match lineshape {
        Lineshape::Absorption => (
            input.unwrap_or_else(|| latest_field_domain_dir(work_dir)),
            FIELD_DOMAIN_COLUMNS,
        ),
        Lineshape::Derivative | Lineshape::Skew => (
            input.unwrap_or_else(|| derivative_dir(work_dir)),
            DERIVATIVE_COLUMNS,
        ),
    }
}

pub fn index_config_from_args(args: &IndexArgs, reference: Option<ReferenceSweep>) -> IndexConfig {
    IndexConfig {
        step_hz: args.freq_step,
        reference,
    }
}

pub fn derivative_config_from_args(args: &DerivativeArgs) -> DerivativeConfig {
    DerivativeConfig {
        step_oe: args.field_step,
        step_check: args.step_check,
    }
}

pub fn budget_from_args(args: &BudgetArgs) -> Result<FitBudget, AppError> {
    if !(args.time_limit.is_finite() && args.time_limit >= 0.0) {
        return Err(AppError::config(format!(
            "--time-limit must be finite and >= 0 (got {}).",
            args.time_limit
        )));
    }
    if args.max_nfev == Some(0) {
        return Err(AppError::config("--max-nfev must be > 0."));
    }
    Ok(FitBudget {
        max_nfev: args.max_nfev,
        time_limit: (args.time_limit > 0.0).then(|| Duration::from_secs_f64(args.time_limit)),
    })
}

/// Lineshape preset with any explicitly given flag applied on top.
pub fn resonance_config_from_args(
    args: &LineshapeArgs,
    budget: FitBudget,
) -> Result<ResonanceFitConfig, AppError> {
    let mut config = ResonanceFitConfig::preset(args.lineshape);
    config.budget = budget;
    if let Some(delta) = args.delta {
        config.delta = delta;
    }
    config.amplitude = override_spec(
        config.amplitude,
        args.amplitude,
        args.amplitude_min,
        args.amplitude_max,
    );
    config.width = override_spec(config.width, args.width, args.width_min, args.width_max);
    if let Some(alpha) = args.asymmetry {
        config.asymmetry.initial = alpha;
    }
    if let Some(t) = args.r2_threshold {
        config.r2_threshold = t;
    }

    match (args.hres_guess, args.hres_band) {
        (Some(_), Some(_)) => {
            return Err(AppError::config(
                "--hres-guess and --hres-band are mutually exclusive.",
            ));
        }
        (Some(guess), None) => {
            config.h_res = HresStrategy::Fixed(ParamSpec::bounded(
                guess,
                args.hres_min.unwrap_or(f64::NEG_INFINITY),
                args.hres_max.unwrap_or(f64::INFINITY),
            ));
        }
        (None, band) => {
            if args.hres_min.is_some() || args.hres_max.is_some() {
                return Err(AppError::config(
                    "--hres-min/--hres-max need --hres-guess.",
                ));
            }
            if let Some(band) = band {
                config.h_res = HresStrategy::WindowCenter { band };
            }
        }
    }
    Ok(config)
}

fn override_spec(
    spec: ParamSpec,
    initial: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
) -> ParamSpec {
    ParamSpec {
        initial: initial.unwrap_or(spec.initial),
        min: min.unwrap_or(spec.min),
        max: max.unwrap_or(spec.max),
    }
}

pub fn kittel_config_from_args(
    args: &KittelGuessArgs,
    default_h_k: f64,
    budget: FitBudget,
) -> KittelConfig {
    KittelConfig {
        m_eff: ParamSpec::free(args.m_eff),
        h_k: ParamSpec::free(args.h_k.unwrap_or(default_h_k)),
        gamma: ParamSpec::free(args.gamma),
        budget,
    }
}

pub fn linewidth_config_from_args(args: &DampingArgs, budget: FitBudget) -> LinewidthConfig {
    LinewidthConfig {
        material: args.material.clone(),
        alpha: ParamSpec::free(args.alpha),
        dh0: ParamSpec::free(args.dh0),
        budget,
    }
}

pub fn pipeline_config_from_args(args: &RunArgs) -> Result<PipelineConfig, AppError> {
    let budget = budget_from_args(&args.budget)?;
    let reference = (!args.no_background).then_some(args.reference);
    let asymptotic = (!args.no_asymptotic).then(|| AsymptoticConfig {
        segment_size: args.segment_size,
        kittel: kittel_config_from_args(&args.guess, ASYMPTOTIC_H_K, budget),
    });
    Ok(PipelineConfig {
        index: index_config_from_args(&args.index, reference),
        derivative: derivative_config_from_args(&args.derivative),
        resonance: resonance_config_from_args(&args.lineshape, budget)?,
        kittel: kittel_config_from_args(&args.guess, KITTEL_H_K, budget),
        linewidth: linewidth_config_from_args(&args.damping, budget),
        asymptotic,
    })
}

pub fn synth_config_from_args(args: &SynthArgs) -> SynthConfig {
    SynthConfig {
        field_min_oe: args.field_min,
        field_max_oe: args.field_max,
        field_step_oe: args.field_step,
        freq_min_hz: args.freq_min,
        freq_max_hz: args.freq_max,
        freq_step_hz: args.freq_step,
        m_eff: args.m_eff,
        h_k: args.h_k,
        gamma: args.gamma,
        alpha: args.alpha,
        dh0: args.dh0,
        noise: args.noise,
        seed: args.seed,
        ..SynthConfig::default()
    }
}
