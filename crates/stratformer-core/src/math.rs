//! Log-space helpers used by every probability computation in the crate.

/// `ln(Σ exp(x))`, shifted against the largest finite input.
///
/// All-`-inf` input yields `-inf` rather than NaN.
pub fn logsumexp(values: &[f64]) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    if values.iter().any(|v| *v == f64::INFINITY) {
        return f64::INFINITY;
    }

    let max = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }

    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// `x - logsumexp(x)`.
pub fn log_softmax(logits: &[f64]) -> Vec<f64> {
    let norm = logsumexp(logits);
    logits.iter().map(|x| x - norm).collect()
}

/// `KL(p ∥ q)` in nats. Mass in `p` where `q` has none gives `+inf`.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    p.iter()
        .zip(q.iter())
        .filter(|(pi, _)| **pi > 0.0)
        .map(|(pi, qi)| {
            if *qi <= 0.0 {
                f64::INFINITY
            } else {
                pi * (pi / qi).ln()
            }
        })
        .sum()
}

/// Normalizes in place; returns `false` (leaving values untouched) when the
/// total is zero or not finite.
pub fn normalize(weights: &mut [f64]) -> bool {
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return false;
    }
    for w in weights.iter_mut() {
        *w /= total;
    }
    true
}
