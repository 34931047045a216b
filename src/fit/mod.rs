//! Nonlinear fitting.
//!
//! Responsibilities:
//!
//! - map bounded parameters onto an unconstrained space
//! - run damped Gauss–Newton (Levenberg–Marquardt) iterations
//! - gate fits on R²

pub mod bounds;
pub mod fitter;
pub mod gate;

pub use fitter::*;
pub use gate::*;
