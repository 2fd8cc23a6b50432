//! Performance sensitive kernels for the per-generation pipeline
//!
//! Each kernel reads the population's current buffer, writes the opposite (already
//! zeroed) buffer, and leaves swapping the cursor to the caller — the driver decides
//! which arities' cursors move after which stage, since reassortment only touches the
//! two-segment arity.

use rand::Rng;

use crate::cfg::ValidatedSimConfig;
use crate::population::Population;
use crate::rng::poisson;
use crate::tables::{MutationMatrix, OneSegmentTransitions};

/// Apply the mutation kernel to both arities
///
/// Mass-preserving per host: every unit of input mass in class `(j, k)` either stays
/// (the matrix's self-weight) or moves to a higher class reachable within `mutcap`
/// extra mutations this generation.
pub fn mutate(pop: &mut Population, matrix: &MutationMatrix, one_seg: &OneSegmentTransitions) {
    mutate_two_segment(pop, matrix);
    mutate_one_segment(pop, one_seg);
    pop.swap2();
    pop.swap1();
    pop.recompute_totals();
}

fn mutate_two_segment(pop: &mut Population, matrix: &MutationMatrix) {
    let kmax = pop.kmax();
    let host_num = pop.host_num();
    let classes = (kmax as usize + 1) * (kmax as usize + 1);

    let (out, src) = pop.write2();

    for h in 0..=host_num as usize {
        let base = h * classes;
        for class in 0..classes {
            let mass = src[base + class];
            if mass == 0.0 {
                continue;
            }

            out[base + class] += mass * matrix.self_weight(class);
            for edge in matrix.edges_from(class) {
                out[base + edge.dst] += mass * edge.weight;
            }
        }
    }
}

fn mutate_one_segment(pop: &mut Population, transitions: &OneSegmentTransitions) {
    let kmax2 = 2 * pop.kmax();
    let host_num = pop.host_num();
    let classes = kmax2 as usize + 1;

    let (out, src) = pop.write1();

    for h in 0..=host_num as usize {
        let base = h * classes;
        for j in 0..=kmax2 {
            let mass = src[base + j as usize];
            if mass == 0.0 {
                continue;
            }

            out[base + j as usize] += mass * transitions.self_weight(j);
            let l_max = transitions.l_max(j);
            for l in 1..=l_max {
                out[base + (j + l) as usize] += mass * transitions.weight(l);
            }
        }
    }
}

/// Apply the reassortment kernel to the two-segment arity only
///
/// Deterministic mean-field mixing: a fraction `r` of each host's two-segment particles
/// are re-paired so that segment marginals are preserved but linkage is randomized;
/// stochasticity is deferred entirely to the reproduction stage.
pub fn reassort(pop: &mut Population, r: f64) {
    let kmax = pop.kmax();
    let host_num = pop.host_num();
    let width = kmax as usize + 1;
    let classes = width * width;

    let (out, src) = pop.write2();

    for h in 0..=host_num as usize {
        let base = h * classes;
        let host_src = &src[base..base + classes];
        let n2: f64 = host_src.iter().sum();

        if n2 == 0.0 {
            continue;
        }

        let mut jp = vec![0.0; width];
        let mut kp = vec![0.0; width];
        for j in 0..width {
            for k in 0..width {
                let mass = host_src[j * width + k];
                jp[j] += mass;
                kp[k] += mass;
            }
        }
        for v in &mut jp {
            *v /= n2;
        }
        for v in &mut kp {
            *v /= n2;
        }

        let host_out = &mut out[base..base + classes];
        for j in 0..width {
            for k in 0..width {
                let linked = host_src[j * width + k];
                let reassorted = n2 * jp[j] * kp[k];
                host_out[j * width + k] = (1.0 - r) * linked + r * reassorted;
            }
        }
    }

    pop.swap2();
    pop.recompute_totals();
}

/// Apply the selection-constrained Poisson reproduction kernel to both arities
///
/// Uses the host totals as of *before* this stage (the snapshot taken at entry), not
/// totals recomputed mid-stage, per the engine's within-generation snapshot semantics:
/// every host's carrying-capacity limiter reads the same population sizes regardless of
/// the order hosts happen to be iterated in.
pub fn reproduce<R: Rng>(pop: &mut Population, cfg: &ValidatedSimConfig, rng: &mut R) {
    let n_before = pop.totals().n.clone();

    reproduce_two_segment(pop, cfg, &n_before, rng);
    reproduce_one_segment(pop, cfg, &n_before, rng);

    pop.swap2();
    pop.swap1();
    pop.recompute_totals();
}

fn reproduce_two_segment<R: Rng>(
    pop: &mut Population,
    cfg: &ValidatedSimConfig,
    n_before: &[f64],
    rng: &mut R,
) {
    let kmax = pop.kmax();
    let host_num = pop.host_num();
    let width = kmax as usize + 1;
    let classes = width * width;
    let s = cfg.inner.s;
    let c = cfg.inner.c;
    let carrying_capacity = cfg.inner.K;

    let (out, src) = pop.write2();

    for h in 0..=host_num as usize {
        let base = h * classes;
        let limiter = 2.0 / (1.0 + n_before[h] / carrying_capacity);

        for j in 0..width {
            for k in 0..width {
                let idx = base + j * width + k;
                let mass = src[idx];
                if mass == 0.0 {
                    continue;
                }

                let sterilised = j + k == 2 * kmax as usize;
                let lambda = if sterilised {
                    0.0
                } else {
                    mass * (1.0 - s).powi((j + k) as i32) * (1.0 - c) * limiter
                };
                debug_assert!(lambda >= 0.0, "negative Poisson mean in reproduction");
                out[idx] = poisson(lambda, rng) as f64;
            }
        }
    }
}

fn reproduce_one_segment<R: Rng>(
    pop: &mut Population,
    cfg: &ValidatedSimConfig,
    n_before: &[f64],
    rng: &mut R,
) {
    let kmax2 = 2 * pop.kmax();
    let host_num = pop.host_num();
    let classes = kmax2 as usize + 1;
    let s = cfg.inner.s;
    let carrying_capacity = cfg.inner.K;

    let (out, src) = pop.write1();

    for h in 0..=host_num as usize {
        let base = h * classes;
        let limiter = 2.0 / (1.0 + n_before[h] / carrying_capacity);

        for j in 0..classes {
            let idx = base + j;
            let mass = src[idx];
            if mass == 0.0 {
                continue;
            }

            let sterilised = j as u32 == kmax2;
            let lambda = if sterilised {
                0.0
            } else {
                mass * (1.0 - s).powi(j as i32) * limiter
            };
            debug_assert!(lambda >= 0.0, "negative Poisson mean in reproduction");
            out[idx] = poisson(lambda, rng) as f64;
        }
    }
}

/// Apply the migration kernel to both arities: deposit a fraction `mig` of each real
/// host's mass into the pool, then draw Poisson transmission from the pool back into
/// each real host with mean `pool_mass / host_num * tr`
///
/// The two sub-phases run against the same output buffer so the draw phase can read what
/// the deposit phase just wrote into the pool's slot; the pool is cleared before the
/// kernel returns, restoring the "pool only non-empty mid-migration" invariant.
pub fn migrate<R: Rng>(pop: &mut Population, mig: f64, tr: f64, rng: &mut R) {
    migrate_two_segment(pop, mig, tr, rng);
    migrate_one_segment(pop, mig, tr, rng);
    pop.swap2();
    pop.swap1();
    pop.recompute_totals();
    pop.debug_assert_pool_empty();
}

fn migrate_two_segment<R: Rng>(pop: &mut Population, mig: f64, tr: f64, rng: &mut R) {
    let kmax = pop.kmax();
    let host_num = pop.host_num();
    let classes = (kmax as usize + 1) * (kmax as usize + 1);

    let (out, src) = pop.write2();

    for h in 1..=host_num as usize {
        let base = h * classes;
        for class in 0..classes {
            let mass = src[base + class];
            let deposit = mass * mig;
            out[base + class] += mass - deposit;
            out[class] += deposit;
        }
    }

    let host_num_f = host_num as f64;
    for class in 0..classes {
        let pool_mass = out[class];
        for h in 1..=host_num as usize {
            let lambda = pool_mass / host_num_f * tr;
            debug_assert!(lambda >= 0.0, "negative Poisson mean in migration");
            out[h * classes + class] += poisson(lambda, rng) as f64;
        }
        out[class] = 0.0;
    }
}

fn migrate_one_segment<R: Rng>(pop: &mut Population, mig: f64, tr: f64, rng: &mut R) {
    let kmax2 = 2 * pop.kmax();
    let host_num = pop.host_num();
    let classes = kmax2 as usize + 1;

    let (out, src) = pop.write1();

    for h in 1..=host_num as usize {
        let base = h * classes;
        for class in 0..classes {
            let mass = src[base + class];
            let deposit = mass * mig;
            out[base + class] += mass - deposit;
            out[class] += deposit;
        }
    }

    let host_num_f = host_num as f64;
    for class in 0..classes {
        let pool_mass = out[class];
        for h in 1..=host_num as usize {
            let lambda = pool_mass / host_num_f * tr;
            debug_assert!(lambda >= 0.0, "negative Poisson mean in migration");
            out[h * classes + class] += poisson(lambda, rng) as f64;
        }
        out[class] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded_rng;
    use crate::tables::FactorTable;
    use approx::assert_relative_eq;

    fn cfg(host_num: u32, kmax: u32, mutcap: u32) -> ValidatedSimConfig {
        let pop2init = vec![1.0 / host_num as f64; host_num as usize];
        let pop1init = vec![0.0; host_num as usize];
        let inner = crate::cfg::SimConfig {
            destination: "test".to_string(),
            timestep: 1,
            krecord: 0,
            untilext: 0,
            rep: 1,
            s: 0.0,
            N0: 1000.0,
            K: 1.0e6,
            u: 0.5,
            gen_num: 10,
            c: 0.0,
            r: 0.0,
            seed: 1,
            host_num,
            kmax,
            pop2init_str: String::new(),
            pop2init_len: 0,
            pop1init_str: String::new(),
            pop1init_len: 0,
            tr: 0.0,
            mig: 0.0,
            mutcap,
        };
        ValidatedSimConfig {
            inner,
            pop2init,
            pop1init,
        }
    }

    #[test]
    fn mutate_preserves_total_mass_per_host() {
        let kmax = 6;
        let factor = FactorTable::build(0.9, kmax);
        let matrix = MutationMatrix::build(&factor, kmax, kmax * 2);
        let one_seg = OneSegmentTransitions::build(&factor, kmax, kmax * 2);

        let mut pop = Population::new(2, kmax);
        pop.seed_initial(1000.0, &[0.6, 0.4], &[0.3, 0.1]);
        let before = pop.totals().clone();

        mutate(&mut pop, &matrix, &one_seg);

        let after = pop.totals();
        assert_relative_eq!(after.n2[1], before.n2[1], epsilon = 1e-6 * before.n2[1].max(1.0));
        assert_relative_eq!(after.n2[2], before.n2[2], epsilon = 1e-6 * before.n2[2].max(1.0));
        assert_relative_eq!(after.n1[1], before.n1[1], epsilon = 1e-6 * before.n1[1].max(1.0));
        assert_relative_eq!(after.n1[2], before.n1[2], epsilon = 1e-6 * before.n1[2].max(1.0));
    }

    #[test]
    fn mutate_is_identity_when_u_is_zero() {
        let kmax = 5;
        let factor = FactorTable::build(0.0, kmax);
        let matrix = MutationMatrix::build(&factor, kmax, kmax * 2);
        let one_seg = OneSegmentTransitions::build(&factor, kmax, kmax * 2);

        let mut pop = Population::new(1, kmax);
        pop.seed_initial(500.0, &[1.0], &[1.0]);

        mutate(&mut pop, &matrix, &one_seg);

        let idx = pop.idx2(1, 0, 0);
        assert_relative_eq!(pop.cur2()[idx], 500.0, epsilon = 1e-6);
    }

    #[test]
    fn reassort_preserves_marginals() {
        let kmax = 6;
        let mut pop = Population::new(1, kmax);
        {
            let width = kmax as usize + 1;
            let host_base = width * width;
            let (out, _) = pop.write2();
            out[host_base + 3 * width] = 500.0;
            out[host_base + 3] = 500.0;
        }
        pop.swap2();
        pop.recompute_totals();

        reassort(&mut pop, 1.0);

        let width = kmax as usize + 1;
        let host_base = width * width;
        let buf = pop.cur2();
        assert_relative_eq!(buf[host_base + 3 * width + 3], 250.0, epsilon = 1e-6);
        assert_relative_eq!(buf[host_base], 250.0, epsilon = 1e-6);
    }

    #[test]
    fn reassort_is_noop_for_empty_host() {
        let kmax = 4;
        let mut pop = Population::new(1, kmax);
        reassort(&mut pop, 0.5);
        assert_relative_eq!(pop.totals().n2[1], 0.0);
    }

    #[test]
    fn reproduce_sterilises_the_top_class() {
        let kmax = 3;
        let mut pop = Population::new(1, kmax);
        {
            let width = kmax as usize + 1;
            let (out, _) = pop.write2();
            out[width * width + kmax as usize * width + kmax as usize] = 1000.0;
        }
        pop.swap2();
        pop.recompute_totals();

        let mut rng = seeded_rng(Some(7));
        let cfg = cfg(1, kmax, kmax * 2);
        reproduce(&mut pop, &cfg, &mut rng);

        assert_relative_eq!(pop.totals().n2[1], 0.0);
    }

    #[test]
    fn reproduction_boundary_converges_to_k_at_zero_params() {
        let kmax = 3;
        let mut pop = Population::new(1, kmax);
        pop.seed_initial(10.0, &[1.0], &[0.0]);

        let mut rng = seeded_rng(Some(99));
        let cfg = cfg(1, kmax, kmax * 2);

        for _ in 0..200 {
            reproduce(&mut pop, &cfg, &mut rng);
        }

        assert!((pop.totals().n[1] - cfg.inner.K).abs() / cfg.inner.K < 0.05);
    }

    #[test]
    fn migration_conserves_pool_emptiness_invariant() {
        let kmax = 3;
        let mut pop = Population::new(3, kmax);
        pop.seed_initial(100.0, &[1.0, 0.0, 0.0], &[0.0, 0.0, 0.0]);

        let mut rng = seeded_rng(Some(5));
        migrate(&mut pop, 0.1, 1.0, &mut rng);

        pop.debug_assert_pool_empty();
    }
}
