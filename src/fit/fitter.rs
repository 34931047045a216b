//! Bounded Levenberg–Marquardt least squares for a single model.
//!
//! Given:
//! - samples `(x_i, y_i)`
//! - one `ParamSpec` (initial value + bounds) per model parameter
//!
//! we minimise `Σ (model(x_i; p) − y_i)²` over the parameters. Bounds are
//! enforced by a change of variables (see `bounds`), so every trial point the
//! model sees is feasible. Each iteration solves the damped linearised
//! problem
//!
//! ```text
//! minimize ‖ [J; √λ·D] δ + [r; 0] ‖²
//! ```
//!
//! with the SVD solver, where `D` holds the running maximum of the Jacobian
//! column norms (Moré scaling).
//!
//! Standard errors come from `s²·(JᵀJ)⁻¹` with the Jacobian taken in external
//! (bounded) coordinates and `s² = SSR/(n − p)`. They are `None` whenever the
//! covariance cannot be estimated.

use std::time::Instant;

use nalgebra::{DMatrix, DVector};

use crate::domain::{FitBudget, FitResult, FittedParam, ModelKind, ParamSpec};
use crate::error::RecordFailure;
use crate::fit::bounds::Transform;
use crate::math::{invert_normal_matrix, r_squared, solve_least_squares};
use crate::models::{predict, predict_all};

const FTOL: f64 = 1e-12;
const XTOL: f64 = 1e-12;
const GTOL: f64 = 1e-14;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
/// Above this damping no descent direction exists at working precision.
const LAMBDA_MAX: f64 = 1e16;

/// Fit `model` to `(x, y)` starting from `specs`.
pub fn fit_curve(
    model: ModelKind,
    x: &[f64],
    y: &[f64],
    specs: &[ParamSpec],
    budget: &FitBudget,
) -> Result<FitResult, RecordFailure> {
    let p = model.param_len();
    if specs.len() != p {
        return Err(RecordFailure::divergence(format!(
            "{} expects {p} parameters, got {}",
            model.display_name(),
            specs.len()
        )));
    }
    let n = x.len().min(y.len());
    if n < p {
        return Err(RecordFailure::InsufficientPoints { n, p });
    }
    let (x, y) = (&x[..n], &y[..n]);
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(RecordFailure::divergence("input contains non-finite samples"));
    }

    let problem = Problem {
        model,
        x,
        y,
        transforms: specs.iter().map(Transform::for_spec).collect(),
    };
    let max_nfev = budget.max_nfev_for(p);
    let deadline = budget.time_limit.map(|d| Instant::now() + d);
    let mut nfev = 0usize;

    let mut params = DVector::from_iterator(
        p,
        specs
            .iter()
            .zip(&problem.transforms)
            .map(|(s, t)| t.to_internal(s.initial)),
    );
    let mut resid = problem.residuals(&params);
    nfev += 1;
    if !all_finite(&resid) {
        return Err(RecordFailure::divergence(
            "model is not finite at the initial guess",
        ));
    }
    let mut cost = resid.norm_squared();

    let mut lambda = LAMBDA_INIT;
    let mut scale = DVector::<f64>::zeros(p);
    let mut iterations = 0usize;

    'outer: loop {
        check_budget(nfev, max_nfev, deadline)?;
        iterations += 1;

        let jac = problem.internal_jacobian(&params, &resid);
        nfev += p;
        if !jac.iter().all(|v| v.is_finite()) {
            return Err(RecordFailure::divergence("Jacobian is not finite"));
        }

        let grad = jac.transpose() * &resid;
        let r_norm = resid.norm();
        if r_norm == 0.0 {
            break;
        }
        let mut gnorm = 0.0f64;
        for j in 0..p {
            let col = jac.column(j).norm();
            scale[j] = scale[j].max(col);
            if col > 0.0 {
                gnorm = gnorm.max((grad[j] / (col * r_norm)).abs());
            }
        }
        if gnorm <= GTOL {
            break;
        }

        loop {
            let step = damped_step(&jac, &resid, &scale, lambda);
            let Some(delta) = step else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    break 'outer;
                }
                continue;
            };

            let trial = &params + &delta;
            let trial_resid = problem.residuals(&trial);
            nfev += 1;
            let trial_cost = trial_resid.norm_squared();

            if all_finite(&trial_resid) && trial_cost < cost {
                let reduction = cost - trial_cost;
                let converged = reduction <= FTOL * cost
                    || delta.norm() <= XTOL * (params.norm() + XTOL)
                    || trial_cost == 0.0;
                params = trial;
                resid = trial_resid;
                cost = trial_cost;
                lambda = (lambda / 10.0).max(LAMBDA_MIN);
                if converged {
                    break 'outer;
                }
                break;
            }

            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                log::debug!(
                    "{}: damping saturated after {iterations} iterations, accepting current point",
                    model.display_name()
                );
                break 'outer;
            }
            check_budget(nfev, max_nfev, deadline)?;
        }
    }

    let external = problem.external(&params);
    if external.iter().any(|v| !v.is_finite()) {
        return Err(RecordFailure::divergence("fitted parameters are not finite"));
    }
    let best_fit = predict_all(model, x, &external);
    if best_fit.iter().any(|v| !v.is_finite()) {
        return Err(RecordFailure::divergence("best-fit curve is not finite"));
    }

    let stderrs = problem.standard_errors(&external, cost);
    let r2 = r_squared(y, &best_fit);
    log::debug!(
        "{}: converged in {iterations} iterations ({nfev} evaluations), R²={r2:.6}",
        model.display_name()
    );

    let params = model
        .param_names()
        .iter()
        .zip(external.iter().zip(stderrs))
        .map(|(name, (&value, stderr))| FittedParam {
            name: (*name).to_string(),
            value,
            stderr,
        })
        .collect();

    Ok(FitResult {
        model,
        params,
        best_fit,
        r2,
        n,
        iterations,
        nfev,
    })
}

struct Problem<'a> {
    model: ModelKind,
    x: &'a [f64],
    y: &'a [f64],
    transforms: Vec<Transform>,
}

impl Problem<'_> {
    fn external(&self, internal: &DVector<f64>) -> Vec<f64> {
        internal
            .iter()
            .zip(&self.transforms)
            .map(|(&v, t)| t.to_external(v))
            .collect()
    }

    fn residuals_at(&self, external: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            self.x.len(),
            self.x
                .iter()
                .zip(self.y)
                .map(|(&x, &y)| predict(self.model, x, external) - y),
        )
    }

    fn residuals(&self, internal: &DVector<f64>) -> DVector<f64> {
        self.residuals_at(&self.external(internal))
    }

    /// Forward-difference Jacobian of the residuals in internal coordinates.
    fn internal_jacobian(&self, internal: &DVector<f64>, resid: &DVector<f64>) -> DMatrix<f64> {
        let n = self.x.len();
        let p = internal.len();
        let mut jac = DMatrix::zeros(n, p);
        for j in 0..p {
            let h = fd_step(internal[j]);
            let mut shifted = internal.clone();
            shifted[j] += h;
            let r = self.residuals(&shifted);
            for i in 0..n {
                jac[(i, j)] = (r[i] - resid[i]) / h;
            }
        }
        jac
    }

    /// Central-difference Jacobian of the model in external coordinates.
    fn external_jacobian(&self, external: &[f64]) -> DMatrix<f64> {
        let n = self.x.len();
        let p = external.len();
        let mut jac = DMatrix::zeros(n, p);
        let mut shifted = external.to_vec();
        for j in 0..p {
            let h = f64::EPSILON.cbrt() * (external[j].abs() + 1e-3);
            shifted[j] = external[j] + h;
            let up = predict_all(self.model, self.x, &shifted);
            shifted[j] = external[j] - h;
            let down = predict_all(self.model, self.x, &shifted);
            shifted[j] = external[j];
            for i in 0..n {
                jac[(i, j)] = (up[i] - down[i]) / (2.0 * h);
            }
        }
        jac
    }

    fn standard_errors(&self, external: &[f64], ssr: f64) -> Vec<Option<f64>> {
        let n = self.x.len();
        let p = external.len();
        if n <= p {
            return vec![None; p];
        }
        let jac = self.external_jacobian(external);
        if !jac.iter().all(|v| v.is_finite()) {
            return vec![None; p];
        }
        let Some(inv) = invert_normal_matrix(&(jac.transpose() * &jac)) else {
            return vec![None; p];
        };
        let s2 = ssr / (n - p) as f64;
        (0..p)
            .map(|j| {
                let var = inv[(j, j)] * s2;
                (var.is_finite() && var >= 0.0).then(|| var.sqrt())
            })
            .collect()
    }
}

fn fd_step(v: f64) -> f64 {
    f64::EPSILON.sqrt() * v.abs().max(1.0)
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn damped_step(
    jac: &DMatrix<f64>,
    resid: &DVector<f64>,
    scale: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    let (n, p) = jac.shape();
    let mut a = DMatrix::zeros(n + p, p);
    a.rows_mut(0, n).copy_from(jac);
    let root = lambda.sqrt();
    for j in 0..p {
        let d = if scale[j] > 0.0 { scale[j] } else { 1.0 };
        a[(n + j, j)] = root * d;
    }
    let mut b = DVector::zeros(n + p);
    b.rows_mut(0, n).copy_from(&(-resid));
    solve_least_squares(&a, &b)
}

fn check_budget(
    nfev: usize,
    max_nfev: usize,
    deadline: Option<Instant>,
) -> Result<(), RecordFailure> {
    if nfev >= max_nfev {
        return Err(RecordFailure::divergence(format!(
            "evaluation budget of {max_nfev} exhausted"
        )));
    }
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Err(RecordFailure::divergence("time budget exhausted"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{derivative_lorentzian, kittel_frequency};

    fn grid(start: f64, end: f64, step: f64) -> Vec<f64> {
        let n = ((end - start) / step).round() as usize;
        (0..=n).map(|i| start + i as f64 * step).collect()
    }

    #[test]
    fn recovers_derivative_lorentzian_from_perturbed_guess() {
        let x = grid(700.0, 1300.0, 2.0);
        let y: Vec<f64> = x
            .iter()
            .map(|&h| derivative_lorentzian(h, -10.0, 50.0, 1000.0))
            .collect();
        let specs = [
            ParamSpec::free(-12.0),
            ParamSpec::at_least(40.0, 0.0),
            ParamSpec::free(1020.0),
        ];
        let fit = fit_curve(ModelKind::Derivative, &x, &y, &specs, &FitBudget::default()).unwrap();

        let a = fit.value("A").unwrap();
        let lw = fit.value("LW").unwrap();
        let h = fit.value("H_res").unwrap();
        assert!((a + 10.0).abs() / 10.0 < 0.01, "A={a}");
        assert!((lw - 50.0).abs() / 50.0 < 0.01, "LW={lw}");
        assert!((h - 1000.0).abs() / 1000.0 < 0.01, "H_res={h}");
        assert!(fit.r2 > 0.999999);
    }

    #[test]
    fn recovers_kittel_parameters() {
        let x = grid(0.05, 0.2, 0.01);
        let y: Vec<f64> = x
            .iter()
            .map(|&h| kittel_frequency(h, 1.2, 0.0017, 28.0))
            .collect();
        let specs = [
            ParamSpec::free(1.0),
            ParamSpec::free(0.01),
            ParamSpec::free(29.0),
        ];
        let fit = fit_curve(ModelKind::Kittel, &x, &y, &specs, &FitBudget::default()).unwrap();
        assert!((fit.value("gamma").unwrap() - 28.0).abs() < 1e-2);
        assert!((fit.value("M_eff").unwrap() - 1.2).abs() < 1e-2);
    }

    #[test]
    fn bounds_are_respected() {
        // True width is 50 but the upper bound forbids it.
        let x = grid(800.0, 1200.0, 5.0);
        let y: Vec<f64> = x
            .iter()
            .map(|&h| derivative_lorentzian(h, -10.0, 50.0, 1000.0))
            .collect();
        let specs = [
            ParamSpec::free(-10.0),
            ParamSpec::bounded(30.0, 10.0, 35.0),
            ParamSpec::bounded(1000.0, 900.0, 1100.0),
        ];
        let fit = fit_curve(ModelKind::Derivative, &x, &y, &specs, &FitBudget::default()).unwrap();
        let lw = fit.value("LW").unwrap();
        assert!((10.0..=35.0).contains(&lw), "LW={lw}");
        let h = fit.value("H_res").unwrap();
        assert!((900.0..=1100.0).contains(&h));
    }

    #[test]
    fn too_few_points_is_a_typed_failure() {
        let err = fit_curve(
            ModelKind::Derivative,
            &[1.0, 2.0],
            &[0.0, 0.0],
            &[ParamSpec::free(1.0); 3],
            &FitBudget::default(),
        )
        .unwrap_err();
        assert_eq!(err, RecordFailure::InsufficientPoints { n: 2, p: 3 });
    }

    #[test]
    fn non_finite_initial_model_is_divergence() {
        // sqrt of a negative product at H = -0.5 T.
        let x = [-0.5, -0.4, -0.3, -0.2];
        let y = [1.0, 2.0, 3.0, 4.0];
        let specs = [
            ParamSpec::free(1.0),
            ParamSpec::free(0.01),
            ParamSpec::free(29.0),
        ];
        let err = fit_curve(ModelKind::Kittel, &x, &y, &specs, &FitBudget::default()).unwrap_err();
        assert!(matches!(err, RecordFailure::FitDivergence { .. }));
    }

    #[test]
    fn exhausted_budget_is_divergence() {
        let x = grid(700.0, 1300.0, 2.0);
        let y: Vec<f64> = x
            .iter()
            .map(|&h| derivative_lorentzian(h, -10.0, 50.0, 1000.0))
            .collect();
        let specs = [
            ParamSpec::free(-12.0),
            ParamSpec::at_least(40.0, 0.0),
            ParamSpec::free(1020.0),
        ];
        let budget = FitBudget {
            max_nfev: Some(3),
            time_limit: None,
        };
        let err = fit_curve(ModelKind::Derivative, &x, &y, &specs, &budget).unwrap_err();
        assert!(matches!(err, RecordFailure::FitDivergence { .. }));
    }

    #[test]
    fn unidentifiable_parameters_have_no_stderr() {
        // Every sample at the same frequency: alpha and DH0 trade off exactly.
        let x = [5.0; 6];
        let y = [0.003; 6];
        let specs = [ParamSpec::free(0.003), ParamSpec::free(0.0022)];
        let fit = fit_curve(
            ModelKind::Linewidth { gamma: 29.0 },
            &x,
            &y,
            &specs,
            &FitBudget::default(),
        )
        .unwrap();
        assert!(fit.params.iter().all(|p| p.stderr.is_none()));
    }

    #[test]
    fn noisy_fit_reports_positive_stderr() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;
        use rand_distr::{Distribution, Normal};

        let mut rng = StdRng::seed_from_u64(11);
        let noise = Normal::new(0.0, 1e-4).unwrap();
        let x = grid(4.0, 12.0, 0.5);
        let y: Vec<f64> = x
            .iter()
            .map(|&f| crate::models::linewidth(f, 0.005, 0.002, 29.0) + noise.sample(&mut rng))
            .collect();
        let specs = [ParamSpec::free(0.003), ParamSpec::free(0.0022)];
        let fit = fit_curve(
            ModelKind::Linewidth { gamma: 29.0 },
            &x,
            &y,
            &specs,
            &FitBudget::default(),
        )
        .unwrap();
        let err = fit.stderr("alpha").unwrap();
        assert!(err > 0.0 && err < 1e-3);
        assert!((fit.value("alpha").unwrap() - 0.005).abs() < 5e-4);
    }
}
