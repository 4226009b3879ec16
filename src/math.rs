use nalgebra as na;
use num_traits::Float;

/// Guards denominators built from time or position differences.
pub const EPSILON: f64 = 1e-8;

/// Least-squares fit of `y = a·x² + b·x + c`, returns `[a, b, c]`.
pub fn quadratic_ls<T: na::ComplexField + Float>(
    x: &na::DVector<T>,
    y: &na::DVector<T>,
) -> Option<na::Matrix3x1<T>> {
    if x.len() != y.len() || x.len() < 3 {
        return None;
    }

    let n = T::from(x.len())?;

    let s_x1 = x.sum();
    let x2 = x.map(|x| x * x);
    let s_x2 = x2.sum();
    let x3 = x2.zip_map(x, |a, b| a * b);
    let s_x3 = x3.sum();
    let x4 = x3.zip_map(x, |a, b| a * b);
    let s_x4 = x4.sum();
    let s_x2y = x2.zip_map(y, |x, y| x * y).sum();
    let s_xy = x.zip_map(y, |x, y| x * y).sum();
    let s_y = y.sum();

    let a = na::Matrix3::new(s_x4, s_x3, s_x2, s_x3, s_x2, s_x1, s_x2, s_x1, n);
    let b = na::Matrix3x1::new(s_x2y, s_xy, s_y);

    let qr_result = a.qr();
    let qty = qr_result.q().transpose() * b;

    let beta = qr_result.r().solve_upper_triangular(&qty)?;

    if beta.iter().all(|v| Float::is_finite(*v)) {
        Some(beta)
    } else {
        None
    }
}

/// Evaluates `a·x² + b·x + c`.
#[inline]
pub fn poly2<T: Float>(coefficients: &[T; 3], x: T) -> T {
    let [a, b, c] = *coefficients;
    (a * x + b) * x + c
}

/// Mean and population standard deviation.
pub fn mean_stdev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;

    Some((mean, var.sqrt()))
}

/// Linearly interpolates `ys` at the last segment of `xs` that brackets `at`.
///
/// A segment brackets `at` when `(x[i] - at)·(x[i-1] - at) <= 0`.
pub fn crossing(xs: &[f64], ys: &[f64], at: f64) -> Option<f64> {
    let mut found = None;

    for i in 1..xs.len().min(ys.len()) {
        if (xs[i] - at) * (xs[i - 1] - at) <= 0.0 {
            let ratio = (at - xs[i - 1]) / (xs[i] - xs[i - 1] + EPSILON);
            found = Some(ys[i - 1] + (ys[i] - ys[i - 1]) * ratio);
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn quadratic_fit_recovers_coefficients() {
        let xs: Vec<f64> = (0..12).map(|i| i as f64 * 25.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| poly2(&[0.0004, -0.05, 12.0], *x)).collect();

        let params = quadratic_ls(&na::DVector::from_vec(xs), &na::DVector::from_vec(ys)).unwrap();

        assert_abs_diff_eq!(params[0], 0.0004, epsilon = 1e-7);
        assert_abs_diff_eq!(params[1], -0.05, epsilon = 1e-5);
        assert_abs_diff_eq!(params[2], 12.0, epsilon = 1e-3);
    }

    #[test]
    fn quadratic_fit_needs_three_points() {
        let xs = na::DVector::from_vec(vec![1.0, 2.0]);
        let ys = na::DVector::from_vec(vec![1.0, 2.0]);

        assert!(quadratic_ls(&xs, &ys).is_none());
    }

    #[test]
    fn mean_and_population_stdev() {
        let (mean, stdev) = mean_stdev(&[1.0, 3.0, 5.0, 7.0]).unwrap();

        assert_abs_diff_eq!(mean, 4.0);
        assert_abs_diff_eq!(stdev, 5.0_f64.sqrt());
        assert!(mean_stdev(&[]).is_none());
    }

    #[test]
    fn crossing_interpolates_inside_segment() {
        let xs = [0.0, 10.0, 20.0];
        let ts = [1.0, 2.0, 3.0];

        assert_abs_diff_eq!(crossing(&xs, &ts, 15.0).unwrap(), 2.5, epsilon = 1e-6);
        assert!(crossing(&xs, &ts, 25.0).is_none());
    }
}
