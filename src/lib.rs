//! `fmr-reduce` library crate.
//!
//! The binary (`fmr`) is a thin wrapper around this library so that:
//!
//! - every stage is testable without spawning processes
//! - the signal and fitting code can be reused outside the CLI
//! - stages can be chained in memory (`fmr run`) or through files

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod signal;
pub mod stage;
