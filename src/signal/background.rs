//! Reference-sweep subtraction.

use crate::domain::{Curve, Sweep};

/// Subtract `reference` from `sweep` sample for sample.
///
/// Samples are paired by frequency equality; samples of `sweep` with no
/// counterpart in `reference` are dropped.
pub fn subtract_background(sweep: &Sweep, reference: &Sweep) -> Sweep {
    let (x, y) = sweep
        .curve
        .points()
        .filter_map(|(f, s)| reference.curve.value_at(f).map(|r| (f, s - r)))
        .unzip();
    Sweep {
        key: sweep.key,
        field_oe: sweep.field_oe,
        curve: Curve { x, y },
    }
}
