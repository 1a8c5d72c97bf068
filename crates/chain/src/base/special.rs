//! Special functions needed by the rate and mixture processes.
//!
//! Everything works in log space where an underflow is plausible.

use std::f64::consts::PI;

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEF: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

const EPS: f64 = 1e-14;
const MAX_ITER: usize = 500;

/// Natural log of the Gamma function for `x > 0` (Lanczos approximation).
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection formula
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = LANCZOS_COEF[0];
    let t = x + LANCZOS_G + 0.5;
    for (i, &c) in LANCZOS_COEF.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// Regularized lower incomplete Gamma function `P(a, x)`.
pub fn gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x.is_infinite() {
        return 1.0;
    }
    if x < a + 1.0 {
        gamma_p_series(a, x)
    } else {
        1.0 - gamma_q_continued_fraction(a, x)
    }
}

fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut del = sum;
    for _ in 0..MAX_ITER {
        ap += 1.0;
        del *= x / ap;
        sum += del;
        if del.abs() < sum.abs() * EPS {
            break;
        }
    }
    (sum.ln() - x + a * x.ln() - ln_gamma(a)).exp()
}

fn gamma_q_continued_fraction(a: f64, x: f64) -> f64 {
    let tiny = 1e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / tiny;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=MAX_ITER {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < tiny {
            d = tiny;
        }
        c = b + an / c;
        if c.abs() < tiny {
            c = tiny;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Quantile of the Gamma(shape `a`, scale 1) distribution.
///
/// Bisection on `ln x`, which keeps full relative precision for the tiny
/// quantiles of small shapes.
pub fn gamma_quantile(a: f64, p: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    let mut hi = (a + 1.0).max(1.0);
    while gamma_p(a, hi) < p {
        hi *= 2.0;
    }
    let mut lo_ln = -700.0_f64;
    let mut hi_ln = hi.ln();
    for _ in 0..200 {
        let mid = 0.5 * (lo_ln + hi_ln);
        if gamma_p(a, mid.exp()) < p {
            lo_ln = mid;
        } else {
            hi_ln = mid;
        }
        if hi_ln - lo_ln < 1e-13 {
            break;
        }
    }
    (0.5 * (lo_ln + hi_ln)).exp()
}

/// Rates of a discrete Gamma distribution with `n_cat` equally probable
/// categories, shape `alpha` and mean one. Each rate is the mean of its
/// category.
pub fn discrete_gamma_rates(alpha: f64, n_cat: usize) -> Vec<f64> {
    if n_cat <= 1 {
        return vec![1.0];
    }
    let k = n_cat as f64;
    let mut rates = Vec::with_capacity(n_cat);
    let mut previous = 0.0;
    for i in 1..=n_cat {
        let upper = if i == n_cat {
            1.0
        } else {
            gamma_p(alpha + 1.0, gamma_quantile(alpha, i as f64 / k))
        };
        rates.push(k * (upper - previous).max(0.0));
        previous = upper;
    }
    rates
}

/// `ln(sum(exp(values)))` without overflow.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Log density of a Dirichlet distribution with concentration `weights`
/// at `point`.
pub fn ln_dirichlet_density(point: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    let mut density = ln_gamma(total);
    for (&p, &w) in point.iter().zip(weights) {
        density += (w - 1.0) * p.ln() - ln_gamma(w);
    }
    density
}

/// Log density of Gamma(shape, rate) at `x`.
pub fn ln_gamma_density(x: f64, shape: f64, rate: f64) -> f64 {
    shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x
}

/// Shannon entropy (natural log) of a frequency vector.
pub fn entropy(frequencies: &[f64]) -> f64 {
    frequencies
        .iter()
        .filter(|&&f| f > 0.0)
        .map(|&f| -f * f.ln())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_ln_gamma_known_values() {
        assert!(close(ln_gamma(1.0), 0.0, 1e-12));
        assert!(close(ln_gamma(2.0), 0.0, 1e-12));
        assert!(close(ln_gamma(5.0), 24.0_f64.ln(), 1e-10));
        assert!(close(ln_gamma(0.5), PI.sqrt().ln(), 1e-10));
        assert!(close(ln_gamma(0.1), 2.252_712_651_734_206, 1e-9));
    }

    #[test]
    fn test_gamma_p_exponential_case() {
        // Shape 1 is the exponential distribution.
        for &x in &[0.01, 0.5, 1.0, 3.0, 10.0] {
            assert!(close(gamma_p(1.0, x), 1.0 - (-x).exp(), 1e-10));
        }
        assert_eq!(gamma_p(2.0, 0.0), 0.0);
    }

    #[test]
    fn test_gamma_quantile_inverts_cdf() {
        for &a in &[0.05, 0.5, 1.0, 2.0, 20.0] {
            for &p in &[0.1, 0.25, 0.5, 0.9] {
                let q = gamma_quantile(a, p);
                assert!(close(gamma_p(a, q), p, 1e-8), "a={a} p={p} q={q}");
            }
        }
    }

    #[test]
    fn test_discrete_gamma_rates_have_unit_mean() {
        for &alpha in &[0.05, 0.3, 1.0, 5.0, 50.0] {
            for n_cat in 1..=8 {
                let rates = discrete_gamma_rates(alpha, n_cat);
                assert_eq!(rates.len(), n_cat);
                let mean = rates.iter().sum::<f64>() / n_cat as f64;
                assert!(close(mean, 1.0, 1e-6), "alpha={alpha} n={n_cat}");
                assert!(rates.windows(2).all(|w| w[0] <= w[1]));
            }
        }
    }

    #[test]
    fn test_log_sum_exp() {
        let v = [1000.0, 1000.0];
        assert!(close(log_sum_exp(&v), 1000.0 + 2.0_f64.ln(), 1e-9));
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_flat_dirichlet_density() {
        // Flat Dirichlet on the 3-simplex has density Gamma(3) = 2.
        let d = ln_dirichlet_density(&[0.2, 0.3, 0.5], &[1.0, 1.0, 1.0]);
        assert!(close(d, 2.0_f64.ln(), 1e-10));
    }

    #[test]
    fn test_entropy_of_uniform() {
        let h = entropy(&[0.25; 4]);
        assert!(close(h, 4.0_f64.ln(), 1e-12));
        assert_eq!(entropy(&[1.0, 0.0]), 0.0);
    }
}
