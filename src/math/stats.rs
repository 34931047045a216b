//! Small descriptive statistics used by the fitter.

/// Coefficient of determination `1 − SS_res/SS_tot`.
///
/// A constant `observed` series has `SS_tot = 0`; it scores 1 for an exact
/// prediction and 0 otherwise.
pub fn r_squared(observed: &[f64], predicted: &[f64]) -> f64 {
    let n = observed.len().min(predicted.len());
    if n == 0 {
        return f64::NAN;
    }
    let mean = observed[..n].iter().sum::<f64>() / n as f64;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (&y, &f) in observed[..n].iter().zip(&predicted[..n]) {
        ss_res += (y - f) * (y - f);
        ss_tot += (y - mean) * (y - mean);
    }
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn sum_of_squares(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn perfect_prediction_scores_one() {
        let y = [1.0, 4.0, 9.0, 16.0];
        assert!((r_squared(&y, &y) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn noise_against_fixed_model_scores_low() {
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let noise: Vec<f64> = (0..500).map(|_| normal.sample(&mut rng)).collect();
        let model = vec![0.0; noise.len()];
        assert!(r_squared(&noise, &model) < 0.5);

        let slope: Vec<f64> = (0..noise.len()).map(|i| i as f64 * 1e-3).collect();
        assert!(r_squared(&noise, &slope) < 0.5);
    }

    #[test]
    fn constant_series_edge_case() {
        assert_eq!(r_squared(&[2.0, 2.0], &[2.0, 2.0]), 1.0);
        assert_eq!(r_squared(&[2.0, 2.0], &[2.0, 3.0]), 0.0);
    }
}
