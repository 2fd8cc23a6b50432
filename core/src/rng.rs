//! Random primitives shared by the combinatorial tables and the stage kernels
//!
//! The simulation itself is agnostic to the concrete PRNG; any `R: rand::Rng` works, so
//! replicates can each own an independent generator and run across worker threads.

use rand::distributions::Distribution;
use rand::Rng;
use rand_pcg::Pcg64;

/// RNG used by the simulation
///
/// A `Pcg64` is small to clone/seed per-replicate and has none of the statistical defects
/// of a plain LCG; reproducibility is only claimed for a fixed seed against this RNG, per
/// the engine's non-goals.
pub type SimRng = Pcg64;

/// Seed a [`SimRng`] from an explicit seed, or from system entropy if none is given
pub fn seeded_rng(seed: Option<u64>) -> SimRng {
    match seed {
        Some(seed) => SimRng::seed_from_u64(seed),
        None => SimRng::from_entropy(),
    }
}

/// Derive an independent [`SimRng`] for worker `index` out of a top-level `seed`
///
/// Used when replicates are spread across threads: each worker needs its own stream, not
/// a shared one, since the PRNG state itself cannot be shared.
pub fn worker_rng(seed: u64, index: u64) -> SimRng {
    SimRng::seed_from_u64(worker_seed(seed, index))
}

/// Derive the seed a worker `index` should use from a top-level `seed`, without
/// constructing the RNG itself
///
/// Exposed separately from [`worker_rng`] so a caller that hands each worker its own
/// `SimConfig` (rather than a pre-built RNG) can set `SimConfig::seed` directly.
pub fn worker_seed(seed: u64, index: u64) -> u64 {
    seed.wrapping_add(index.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Sample a uniform deviate on `(0, 1)`
#[inline]
pub fn uniform01<R: Rng>(rng: &mut R) -> f64 {
    rng.gen::<f64>()
}

/// Sample a Poisson-distributed deviate with mean `lambda`
///
/// Uses a direct inversion method for small means and falls back to `rand_distr`'s
/// implementation above a threshold, since direct inversion's expected number of
/// iterations grows with `lambda`.
///
/// # Panics
/// Panics if `lambda` is negative; per the engine's error handling design, a negative
/// Poisson mean is a numerical degeneracy that must never occur by construction.
pub fn poisson<R: Rng>(lambda: f64, rng: &mut R) -> u64 {
    assert!(lambda >= 0.0, "poisson called with negative lambda");

    if lambda == 0.0 {
        return 0;
    }

    if lambda <= POISSON_DIRECT_THRESHOLD {
        direct_poisson(lambda, rng)
    } else {
        rand_distr::Poisson::new(lambda).unwrap().sample(rng)
    }
}

/// Mean below which the direct inversion method is used in preference to `rand_distr`
const POISSON_DIRECT_THRESHOLD: f64 = 30.0;

/// Direct inversion sampler for a Poisson deviate with mean `lambda`
///
/// Walks the CDF from `k = 0`, accumulating PMF mass via the standard recurrence
/// `p(k) = p(k-1) * lambda / k`. Cheaper than `rand_distr::Poisson` for the small means
/// the mutation and migration kernels typically draw.
fn direct_poisson<R: Rng>(lambda: f64, rng: &mut R) -> u64 {
    let mut k = 0u64;
    let mut p = (-lambda).exp();
    let mut cdf = p;
    let u = uniform01(rng);

    while u > cdf {
        k += 1;
        p *= lambda / k as f64;
        cdf += p;
    }

    k
}

/// Natural logarithm of the gamma function, via the Lanczos approximation (g = 7, n = 9)
///
/// Used to evaluate the Poisson PMF as `exp(k*ln(lambda) - lambda - log_gamma(k + 1))`
/// without computing `k!` directly, which would overflow for the class counts the
/// mutation transition matrix is built over.
pub fn log_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFICIENTS: [f64; 9] = [
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

    if x < 0.5 {
        // Reflection formula for the left half-plane; unused by the Poisson PMF here
        // since k + 1 >= 1, kept for completeness of the primitive.
        std::f64::consts::PI.ln()
            - (std::f64::consts::PI * x).sin().ln()
            - log_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut a = COEFFICIENTS[0];
        let t = x + G + 0.5;
        for (i, coeff) in COEFFICIENTS.iter().enumerate().skip(1) {
            a += coeff / (x + i as f64);
        }

        0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
    }
}

/// Evaluate the Poisson PMF `P(Poi(lambda) = k)`
pub fn poisson_pmf(lambda: f64, k: u64) -> f64 {
    if lambda == 0.0 {
        return if k == 0 { 1.0 } else { 0.0 };
    }

    (k as f64 * lambda.ln() - lambda - log_gamma(k as f64 + 1.0)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn log_gamma_matches_known_factorials() {
        // log_gamma(n+1) == ln(n!)
        assert_relative_eq!(log_gamma(1.0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(log_gamma(5.0), 24.0_f64.ln(), epsilon = 1e-9);
        assert_relative_eq!(log_gamma(7.0), 720.0_f64.ln(), epsilon = 1e-9);
    }

    #[test]
    fn poisson_pmf_normalizes_over_truncated_support() {
        let lambda = 0.8;
        let sum: f64 = (0..50).map(|k| poisson_pmf(lambda, k)).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn poisson_pmf_zero_lambda_is_degenerate_at_zero() {
        assert_relative_eq!(poisson_pmf(0.0, 0), 1.0);
        assert_relative_eq!(poisson_pmf(0.0, 1), 0.0);
    }

    #[test]
    fn poisson_mean_converges_for_small_and_large_lambda() {
        let mut rng = seeded_rng(Some(42));
        for &lambda in &[0.5, 5.0, 50.0] {
            let n = 20_000;
            let sum: u64 = (0..n).map(|_| poisson(lambda, &mut rng)).sum();
            let mean = sum as f64 / n as f64;
            assert!(
                (mean - lambda).abs() < 0.1 * lambda.max(1.0),
                "mean {mean} too far from lambda {lambda}"
            );
        }
    }
}
