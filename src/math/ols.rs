//! Linear least squares.
//!
//! The Levenberg–Marquardt step is itself a small linear least-squares problem:
//!
//! ```text
//! minimize ‖ [J; √λ·D] δ + [r; 0] ‖²
//! ```
//!
//! Implementation choices:
//! - We solve the stacked (tall) system with SVD, which stays usable when `J`
//!   is rank deficient (a parameter the window does not constrain).
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)
//! - Parameter dimension is tiny (2–4 columns), so SVD cost is negligible next
//!   to model evaluation.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-14, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Inverse of a symmetric positive-definite matrix (normal matrix `JᵀJ`).
///
/// Returns `None` when the matrix is singular or not positive definite, which
/// is how "curvature could not be estimated" surfaces to callers.
pub fn invert_normal_matrix(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    // Rounding can leave an exactly singular matrix "barely" positive
    // definite, so check conditioning before trusting Cholesky.
    let sv = a.clone().svd(false, false).singular_values;
    let (max, min) = (sv.max(), sv.min());
    if !(max > 0.0 && min > max * 1e-13) {
        return None;
    }
    let inv = a.clone().cholesky()?.inverse();
    if inv.iter().all(|v| v.is_finite()) {
        Some(inv)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn singular_normal_matrix_has_no_inverse() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(invert_normal_matrix(&a).is_none());

        let b = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 2.0]);
        let inv = invert_normal_matrix(&b).unwrap();
        assert!((inv[(0, 0)] - 0.25).abs() < 1e-12);
        assert!((inv[(1, 1)] - 0.5).abs() < 1e-12);
    }
}
