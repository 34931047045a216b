//! Pipeline stages that turn re-indexed spectra into resonance records and
//! material parameters.
//!
//! Each stage owns its output and only reads upstream outputs.

pub mod asymptotic;
pub mod kittel;
pub mod linewidth;
pub mod resonance;

pub use asymptotic::{AsymptoticStage, asymptotic_analysis, prefix_lengths};
pub use kittel::{KittelOutcome, fit_kittel};
pub use linewidth::{LinewidthOutcome, fit_linewidth};
pub use resonance::{ResonanceStage, fit_resonance, fit_resonances};
