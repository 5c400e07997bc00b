//! Point and quantile error metrics.

/// Mean absolute error. NaN for empty input.
pub fn mae(y: &[f64], y_hat: &[f64]) -> f64 {
    mean(y.iter().zip(y_hat).map(|(a, b)| (a - b).abs()), y.len().min(y_hat.len()))
}

/// Root mean squared error. NaN for empty input.
pub fn rmse(y: &[f64], y_hat: &[f64]) -> f64 {
    mean(
        y.iter().zip(y_hat).map(|(a, b)| (a - b) * (a - b)),
        y.len().min(y_hat.len()),
    )
    .sqrt()
}

/// Mean pinball (quantile) loss at `level`.
pub fn pinball_loss(level: f64, y: &[f64], y_hat: &[f64]) -> f64 {
    mean(
        y.iter().zip(y_hat).map(|(a, b)| {
            let r = a - b;
            if r >= 0.0 {
                level * r
            } else {
                (level - 1.0) * r
            }
        }),
        y.len().min(y_hat.len()),
    )
}

/// Empirical quantile with linear interpolation between order statistics.
pub fn empirical_quantile(values: &[f64], level: f64) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let pos = level.clamp(0.0, 1.0) * (v.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(v[lo] + (v[hi] - v[lo]) * frac)
}

fn mean(iter: impl Iterator<Item = f64>, n: usize) -> f64 {
    if n == 0 {
        return f64::NAN;
    }
    iter.sum::<f64>() / n as f64
}
