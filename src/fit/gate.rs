//! R² acceptance gate applied after every per-record fit.

use crate::domain::FitResult;
use crate::error::RecordFailure;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    pub threshold: f64,
}

impl QualityGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Accept iff `R² > threshold`. A NaN R² never passes.
    pub fn check(&self, fit: &FitResult) -> Result<(), RecordFailure> {
        self.check_r2(fit.r2)
    }

    pub fn check_r2(&self, r2: f64) -> Result<(), RecordFailure> {
        if r2 > self.threshold {
            Ok(())
        } else {
            Err(RecordFailure::QualityRejected {
                r2,
                threshold: self.threshold,
            })
        }
    }
}
