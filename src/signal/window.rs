//! Peak / dip window selection.

use crate::domain::{Curve, Extremum};
use crate::error::RecordFailure;

/// Position of the extremum of `curve` (first occurrence, NaN samples ignored).
pub fn locate_extremum(curve: &Curve, extremum: Extremum) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &y) in curve.y.iter().enumerate() {
        if !y.is_finite() {
            continue;
        }
        let better = match (best, extremum) {
            (None, _) => true,
            (Some((_, b)), Extremum::Maximum) => y > b,
            (Some((_, b)), Extremum::Minimum) => y < b,
        };
        if better {
            best = Some((i, y));
        }
    }
    best.map(|(i, _)| i)
}

/// Samples whose x lies within `[x_ext − delta, x_ext + delta]`.
///
/// No interpolation: only existing samples are returned, in order.
pub fn select_window(
    curve: &Curve,
    delta: f64,
    extremum: Extremum,
) -> Result<Curve, RecordFailure> {
    let Some(idx) = locate_extremum(curve, extremum) else {
        return Err(RecordFailure::EmptyWindow {
            center: f64::NAN,
            delta,
        });
    };
    let center = curve.x[idx];
    let (lo, hi) = (center - delta, center + delta);

    let (x, y): (Vec<f64>, Vec<f64>) = curve.points().filter(|(x, _)| *x >= lo && *x <= hi).unzip();
    if x.is_empty() {
        return Err(RecordFailure::EmptyWindow { center, delta });
    }
    Ok(Curve { x, y })
}
