//! Box constraints via smooth change of variables.
//!
//! The solver works on unconstrained "internal" values; the model always sees
//! "external" values inside `[min, max]`:
//!
//! - both bounds: `ext = min + (sin(int) + 1)·(max − min)/2`
//! - lower only: `ext = min − 1 + sqrt(int² + 1)`
//! - upper only: `ext = max + 1 − sqrt(int² + 1)`
//! - none: identity

use crate::domain::ParamSpec;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Free,
    Lower(f64),
    Upper(f64),
    Both(f64, f64),
}

impl Transform {
    pub fn for_spec(spec: &ParamSpec) -> Self {
        match (spec.min.is_finite(), spec.max.is_finite()) {
            (true, true) => Transform::Both(spec.min, spec.max),
            (true, false) => Transform::Lower(spec.min),
            (false, true) => Transform::Upper(spec.max),
            (false, false) => Transform::Free,
        }
    }

    pub fn clamp(self, ext: f64) -> f64 {
        match self {
            Transform::Free => ext,
            Transform::Lower(lo) => ext.max(lo),
            Transform::Upper(hi) => ext.min(hi),
            Transform::Both(lo, hi) => ext.clamp(lo, hi),
        }
    }

    pub fn to_internal(self, ext: f64) -> f64 {
        let ext = self.clamp(ext);
        match self {
            Transform::Free => ext,
            Transform::Lower(lo) => ((ext - lo + 1.0).powi(2) - 1.0).sqrt(),
            Transform::Upper(hi) => ((hi - ext + 1.0).powi(2) - 1.0).sqrt(),
            Transform::Both(lo, hi) => (2.0 * (ext - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0).asin(),
        }
    }

    pub fn to_external(self, int: f64) -> f64 {
        match self {
            Transform::Free => int,
            Transform::Lower(lo) => lo - 1.0 + (int * int + 1.0).sqrt(),
            Transform::Upper(hi) => hi + 1.0 - (int * int + 1.0).sqrt(),
            Transform::Both(lo, hi) => lo + (int.sin() + 1.0) * (hi - lo) / 2.0,
        }
    }
}
