//! Command-line parsing for the FMR reduction pipeline.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! signal processing and fitting code. Every tunable can also be set through an
//! `FMR_*` environment variable (or a `.env` file in the working directory).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{Lineshape, ReferenceSweep, StepCheck};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "fmr", version, about = "FMR spectrum reduction: sweeps to material parameters")]
pub struct Cli {
    /// Worker threads for per-record fits (default: one per core).
    #[arg(long, global = true, env = "FMR_THREADS")]
    pub threads: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands, in pipeline order.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Re-index raw sweeps into per-frequency field-domain tables.
    Convert(ConvertArgs),
    /// Like `convert`, subtracting a reference sweep first.
    Background(BackgroundArgs),
    /// Central-difference dS21/dH tables from field-domain tables.
    Derive(DeriveArgs),
    /// Per-frequency lineshape fits into `field domain parameters.csv`.
    Resonance(ResonanceArgs),
    /// Kittel dispersion fit into `material parameter.csv`.
    Kittel(KittelArgs),
    /// Linewidth (damping) fit; needs gamma from `kittel`.
    Linewidth(LinewidthArgs),
    /// Kittel fits on growing frequency prefixes.
    Asymptotic(AsymptoticArgs),
    /// The whole chain from raw sweeps in one process.
    Run(RunArgs),
    /// Write synthetic raw sweeps.
    Synth(SynthArgs),
    /// Summarise a fit-curve JSON file.
    Curves(CurvesArgs),
}

/// Work directory holding the aggregate tables of a reduction.
#[derive(Debug, Args, Clone)]
pub struct WorkDirArgs {
    #[arg(long = "dir", env = "FMR_DIR", default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct IndexArgs {
    /// Directory of raw `<field>.<ext>` sweeps.
    #[arg(long, env = "FMR_INPUT")]
    pub input: PathBuf,

    /// Raw sweep file extension.
    #[arg(long, env = "FMR_EXT", default_value = "txt")]
    pub ext: String,

    /// Frequency grid step (Hz).
    #[arg(long = "freq-step", env = "FMR_FREQ_STEP", default_value_t = 1e9)]
    pub freq_step: f64,
}

#[derive(Debug, Args, Clone)]
pub struct BudgetArgs {
    /// Maximum model evaluations per fit (default: 2000·(params + 1)).
    #[arg(long, env = "FMR_MAX_NFEV")]
    pub max_nfev: Option<usize>,

    /// Wall-clock limit per fit in seconds (0 disables).
    #[arg(long, env = "FMR_TIME_LIMIT", default_value_t = 10.0)]
    pub time_limit: f64,
}

#[derive(Debug, Args, Clone)]
pub struct DerivativeArgs {
    /// Field step dH (Oe).
    #[arg(long = "field-step", env = "FMR_FIELD_STEP", default_value_t = 10.0)]
    pub field_step: f64,

    /// What to do when the sampled field step differs from `--field-step`.
    #[arg(long, env = "FMR_STEP_CHECK", value_enum, default_value_t = StepCheck::Warn)]
    pub step_check: StepCheck,
}

/// Per-frequency fit settings. Unset values fall back to the lineshape preset.
#[derive(Debug, Args, Clone)]
pub struct LineshapeArgs {
    #[arg(long, env = "FMR_LINESHAPE", value_enum, default_value_t = Lineshape::Derivative)]
    pub lineshape: Lineshape,

    /// Half-width (Oe) of the window around the extremum.
    #[arg(long, env = "FMR_DELTA")]
    pub delta: Option<f64>,

    /// Initial amplitude A.
    #[arg(long, allow_hyphen_values = true)]
    pub amplitude: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub amplitude_min: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub amplitude_max: Option<f64>,

    /// Initial width: σ (absorption) or LW (derivative, skew), in Oe.
    #[arg(long)]
    pub width: Option<f64>,
    #[arg(long)]
    pub width_min: Option<f64>,
    #[arg(long)]
    pub width_max: Option<f64>,

    /// Initial skew α (skew lineshape only).
    #[arg(long, allow_hyphen_values = true)]
    pub asymmetry: Option<f64>,

    /// H_res is bounded to the window centre ± this band (Oe).
    #[arg(long, env = "FMR_HRES_BAND")]
    pub hres_band: Option<f64>,

    /// Use a fixed initial H_res (Oe) for every record instead of the window centre.
    #[arg(long)]
    pub hres_guess: Option<f64>,
    #[arg(long)]
    pub hres_min: Option<f64>,
    #[arg(long)]
    pub hres_max: Option<f64>,

    /// Fits with R² at or below this are rejected.
    #[arg(long, env = "FMR_R2_THRESHOLD")]
    pub r2_threshold: Option<f64>,
}

#[derive(Debug, Args, Clone)]
pub struct KittelGuessArgs {
    /// Initial M_eff (T).
    #[arg(long, env = "FMR_M_EFF", default_value_t = 1.0)]
    pub m_eff: f64,

    /// Initial H_k (T); 0.01 for `kittel`, 0.0017 for `asymptotic`.
    #[arg(long, env = "FMR_H_K", allow_hyphen_values = true)]
    pub h_k: Option<f64>,

    /// Initial gamma (GHz/T).
    #[arg(long, env = "FMR_GAMMA", default_value_t = 29.0)]
    pub gamma: f64,
}

#[derive(Debug, Args, Clone)]
pub struct DampingArgs {
    /// Material name recorded in the material table.
    #[arg(long, env = "FMR_MATERIAL", default_value = "FeGaB")]
    pub material: String,

    /// Initial Gilbert damping.
    #[arg(long, env = "FMR_ALPHA", default_value_t = 0.003)]
    pub alpha: f64,

    /// Initial inhomogeneous linewidth ΔH0 (T).
    #[arg(long, env = "FMR_DH0", default_value_t = 0.0022)]
    pub dh0: f64,
}

#[derive(Debug, Args, Clone)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub work: WorkDirArgs,
    #[command(flatten)]
    pub index: IndexArgs,
}

#[derive(Debug, Args, Clone)]
pub struct BackgroundArgs {
    #[command(flatten)]
    pub work: WorkDirArgs,
    #[command(flatten)]
    pub index: IndexArgs,

    /// Reference sweep: `first` or a file key such as `0`.
    #[arg(long, env = "FMR_REFERENCE", default_value = "first")]
    pub reference: ReferenceSweep,
}

#[derive(Debug, Args, Clone)]
pub struct DeriveArgs {
    #[command(flatten)]
    pub work: WorkDirArgs,

    /// Field-domain tables (default: `<dir>/background removal`, or
    /// `<dir>/field domain data` when no background run exists).
    #[arg(long)]
    pub input: Option<PathBuf>,

    #[command(flatten)]
    pub derivative: DerivativeArgs,
}

#[derive(Debug, Args, Clone)]
pub struct ResonanceArgs {
    #[command(flatten)]
    pub work: WorkDirArgs,

    /// Tables to fit (default: `<dir>/ds21`, or the field-domain tables for
    /// the absorption lineshape).
    #[arg(long)]
    pub input: Option<PathBuf>,

    #[command(flatten)]
    pub lineshape: LineshapeArgs,
    #[command(flatten)]
    pub budget: BudgetArgs,

    /// Write window data and fitted curves as JSON.
    #[arg(long)]
    pub curves: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct KittelArgs {
    #[command(flatten)]
    pub work: WorkDirArgs,
    #[command(flatten)]
    pub guess: KittelGuessArgs,
    #[command(flatten)]
    pub budget: BudgetArgs,
    #[arg(long)]
    pub curves: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct LinewidthArgs {
    #[command(flatten)]
    pub work: WorkDirArgs,
    #[command(flatten)]
    pub damping: DampingArgs,
    #[command(flatten)]
    pub budget: BudgetArgs,
    #[arg(long)]
    pub curves: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct AsymptoticArgs {
    #[command(flatten)]
    pub work: WorkDirArgs,

    /// Records added per prefix.
    #[arg(long, env = "FMR_SEGMENT_SIZE", default_value_t = 4)]
    pub segment_size: usize,

    #[command(flatten)]
    pub guess: KittelGuessArgs,
    #[command(flatten)]
    pub budget: BudgetArgs,
    #[arg(long)]
    pub curves: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub work: WorkDirArgs,
    #[command(flatten)]
    pub index: IndexArgs,

    /// Reference sweep: `first` or a file key such as `0`.
    #[arg(long, env = "FMR_REFERENCE", default_value = "first")]
    pub reference: ReferenceSweep,

    /// Re-index the raw signal without background removal.
    #[arg(long)]
    pub no_background: bool,

    #[command(flatten)]
    pub derivative: DerivativeArgs,
    #[command(flatten)]
    pub lineshape: LineshapeArgs,
    #[command(flatten)]
    pub guess: KittelGuessArgs,
    #[command(flatten)]
    pub damping: DampingArgs,

    #[arg(long, env = "FMR_SEGMENT_SIZE", default_value_t = 4)]
    pub segment_size: usize,

    /// Skip the piecewise Kittel analysis.
    #[arg(long)]
    pub no_asymptotic: bool,

    #[command(flatten)]
    pub budget: BudgetArgs,
    #[arg(long)]
    pub curves: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SynthArgs {
    /// Directory to write `<field>.txt` sweeps into.
    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, default_value_t = 0.0)]
    pub field_min: f64,
    #[arg(long, default_value_t = 2000.0)]
    pub field_max: f64,
    #[arg(long, default_value_t = 10.0)]
    pub field_step: f64,

    #[arg(long, default_value_t = 4e9)]
    pub freq_min: f64,
    #[arg(long, default_value_t = 12e9)]
    pub freq_max: f64,
    #[arg(long, default_value_t = 0.5e9)]
    pub freq_step: f64,

    /// True M_eff (T).
    #[arg(long, default_value_t = 1.0)]
    pub m_eff: f64,
    /// True H_k (T).
    #[arg(long, default_value_t = 0.0017)]
    pub h_k: f64,
    /// True gamma (GHz/T).
    #[arg(long, default_value_t = 29.0)]
    pub gamma: f64,
    /// True Gilbert damping.
    #[arg(long, default_value_t = 0.005)]
    pub alpha: f64,
    /// True ΔH0 (T).
    #[arg(long, default_value_t = 0.002)]
    pub dh0: f64,

    /// Gaussian noise standard deviation on S21.
    #[arg(long, default_value_t = 1e-5)]
    pub noise: f64,

    #[arg(long, env = "FMR_SEED", default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
pub struct CurvesArgs {
    /// Curve JSON written by `--curves`.
    #[arg(long)]
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_parses_with_defaults() {
        let argv = ["fmr", "run", "--input", "raw", "--reference", "0"];
        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.index.freq_step, 1e9);
        assert_eq!(args.reference, ReferenceSweep::Key(0));
        assert_eq!(args.lineshape.lineshape, Lineshape::Derivative);
        assert_eq!(args.derivative.step_check, StepCheck::Warn);
        assert_eq!(args.segment_size, 4);
    }

    #[test]
    fn negative_amplitude_is_accepted() {
        let cli = Cli::try_parse_from([
            "fmr",
            "resonance",
            "--lineshape",
            "skew",
            "--amplitude",
            "-2.5",
            "--threads",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.threads, Some(2));
        let Command::Resonance(args) = cli.command else {
            panic!("expected resonance");
        };
        assert_eq!(args.lineshape.lineshape, Lineshape::Skew);
        assert_eq!(args.lineshape.amplitude, Some(-2.5));
    }
}
