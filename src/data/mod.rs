//! Synthetic spectra for demos and end-to-end checks.

pub mod synth;

pub use synth::*;
