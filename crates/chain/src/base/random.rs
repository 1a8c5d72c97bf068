//! Random draws shared by the sub-processes.

use rand::Rng;
use rand_distr::{Distribution, Gamma, Poisson};

/// Floor applied to profile frequencies so that log-densities stay finite.
pub const MIN_FREQUENCY: f64 = 1e-12;

/// Draw from Gamma(shape, rate). Callers guarantee positive parameters;
/// degenerate parameters yield the distribution mean.
pub fn gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64, rate: f64) -> f64 {
    let scale = 1.0 / rate;
    Gamma::new(shape, scale).map_or(shape * scale, |d| d.sample(rng))
}

/// Draw a frequency vector from Dirichlet(`weights`).
///
/// Entries are floored at [`MIN_FREQUENCY`] and renormalized.
pub fn dirichlet<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> Vec<f64> {
    let mut draw: Vec<f64> = weights.iter().map(|&w| gamma(rng, w, 1.0)).collect();
    normalize_frequencies(&mut draw);
    draw
}

/// Normalize in place to a frequency vector with floored entries.
pub fn normalize_frequencies(values: &mut [f64]) {
    let total: f64 = values.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        let flat = 1.0 / values.len() as f64;
        values.iter_mut().for_each(|v| *v = flat);
        return;
    }
    for v in values.iter_mut() {
        *v = (*v / total).max(MIN_FREQUENCY);
    }
    let total: f64 = values.iter().sum();
    values.iter_mut().for_each(|v| *v /= total);
}

/// Draw an index with probability proportional to `weights`.
pub fn categorical<R: Rng + ?Sized>(rng: &mut R, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let mut u = rng.random::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        if u < w {
            return i;
        }
        u -= w;
    }
    // Rounding left a sliver at the end.
    weights.iter().rposition(|&w| w > 0.0).unwrap_or(0)
}

/// Draw an index with probability proportional to `exp(log_weights)`.
pub fn categorical_log<R: Rng + ?Sized>(rng: &mut R, log_weights: &[f64]) -> usize {
    let max = log_weights
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return rng.random_range(0..log_weights.len());
    }
    let weights: Vec<f64> = log_weights.iter().map(|&l| (l - max).exp()).collect();
    categorical(rng, &weights)
}

/// Multiplicative proposal factor `exp(tuning * (u - 1/2))`. Its log is the
/// Hastings correction of a scale move.
pub fn scale_factor<R: Rng + ?Sized>(rng: &mut R, tuning: f64) -> f64 {
    (tuning * (rng.random::<f64>() - 0.5)).exp()
}

/// Metropolis-Hastings acceptance test.
pub fn accept<R: Rng + ?Sized>(rng: &mut R, log_ratio: f64) -> bool {
    if log_ratio.is_nan() {
        return false;
    }
    log_ratio >= 0.0 || rng.random::<f64>().ln() < log_ratio
}

/// Draw from a Poisson(`mu`) distribution conditioned on being at least one.
pub fn truncated_poisson<R: Rng + ?Sized>(rng: &mut R, mu: f64) -> u32 {
    if mu > 10.0 {
        // Zero has negligible mass: plain rejection.
        if let Ok(poisson) = Poisson::new(mu) {
            loop {
                let n: f64 = poisson.sample(rng);
                if n >= 1.0 {
                    return n as u32;
                }
            }
        }
    }
    // Inverse CDF over n >= 1.
    let norm = -(-mu).exp_m1();
    let mut u = rng.random::<f64>() * norm;
    let mut n = 1u32;
    let mut p = (-mu).exp() * mu;
    loop {
        if u < p || p <= 0.0 {
            return n;
        }
        u -= p;
        n += 1;
        p *= mu / n as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_dirichlet_is_normalized() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        for _ in 0..100 {
            let f = dirichlet(&mut rng, &[0.1, 0.1, 0.1, 0.1]);
            assert!((f.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert!(f.iter().all(|&x| x > 0.0));
        }
    }

    #[test]
    fn test_categorical_log_respects_impossible_entries() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        for _ in 0..200 {
            let i = categorical_log(&mut rng, &[f64::NEG_INFINITY, 0.0, f64::NEG_INFINITY]);
            assert_eq!(i, 1);
        }
    }

    #[test]
    fn test_truncated_poisson_is_positive() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        for &mu in &[1e-8, 0.01, 0.5, 3.0, 25.0] {
            for _ in 0..200 {
                assert!(truncated_poisson(&mut rng, mu) >= 1);
            }
        }
    }

    #[test]
    fn test_truncated_poisson_mean() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let mu = 2.0_f64;
        let n = 20_000;
        let mean = (0..n)
            .map(|_| truncated_poisson(&mut rng, mu) as f64)
            .sum::<f64>()
            / n as f64;
        let expected = mu / (1.0 - (-mu).exp());
        assert!((mean - expected).abs() < 0.05, "mean {mean} vs {expected}");
    }

    #[test]
    fn test_accept_extremes() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        assert!(accept(&mut rng, 0.5));
        assert!(!accept(&mut rng, f64::NEG_INFINITY));
        assert!(!accept(&mut rng, f64::NAN));
    }
}
