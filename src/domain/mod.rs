//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - raw and re-indexed spectra (`Sweep`, `FrequencyGrid`, `FieldDomainRecord`)
//! - model descriptions and fit outputs (`ModelKind`, `ParamSpec`, `FitResult`)
//! - stage outputs (`ResonanceRecord`, `MaterialParameters`, `AsymptoticPoint`)
//! - per-stage configuration (`config`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
