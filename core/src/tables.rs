//! Combinatorial tables precomputed once per run and shared read-only across replicates
//!
//! Builds the Poisson `factor[]` table and the sparse mutation transition matrix `M`
//! described in the engine's mutation kernel. Both are immutable once built, so an
//! implementation that spreads replicates across worker threads can share a single
//! instance behind an `Arc` without any synchronization.

use crate::rng::poisson_pmf;

/// `factor[i] = P(Poi(2u) = i)` for `i` in `[0, 2*kmax]`
///
/// `2u` is the per-virion, per-generation expected mutation count summed across both
/// genome segments.
#[derive(Debug, Clone)]
pub struct FactorTable {
    values: Vec<f64>,
}

impl FactorTable {
    /// Build the table for mutation rate `u` and segment cap `kmax`
    pub fn build(u: f64, kmax: u32) -> Self {
        let lambda = 2.0 * u;
        let len = 2 * kmax as usize + 1;
        let values = (0..len as u64).map(|i| poisson_pmf(lambda, i)).collect();
        Self { values }
    }

    /// `factor[l]`, or `0.0` if `l` is beyond the table's built-in support
    #[inline]
    pub fn get(&self, l: usize) -> f64 {
        self.values.get(l).copied().unwrap_or(0.0)
    }

    /// Sum of `factor[l]` for `l` in `1..=upto` (inclusive)
    fn partial_sum(&self, upto: usize) -> f64 {
        (1..=upto).map(|l| self.get(l)).sum()
    }
}

/// Flatten a two-segment class `(j, k)` into the index scheme `M` is built over
#[inline]
pub fn class_index(kmax: u32, j: u32, k: u32) -> usize {
    (kmax as usize + 1) * j as usize + k as usize
}

/// A single redistribution of mass from a source class to a destination class
#[derive(Debug, Clone, Copy)]
pub struct MutationEdge {
    /// Flattened source class index
    pub src: usize,
    /// Flattened destination class index
    pub dst: usize,
    /// Fraction of the source class's mass redistributed to `dst`
    pub weight: f64,
}

/// The precomputed mutation transition matrix `M`, stored as a sparse list of edges plus
/// a per-class no-mutation self-weight, as recommended by the engine's design notes:
/// the matrix is upper-triangular in the flattened index and mostly empty, so a dense
/// `(kmax+1)^2 x (kmax+1)^2` array would waste both memory and cache locality.
#[derive(Debug, Clone)]
pub struct MutationMatrix {
    /// Off-diagonal redistribution edges, grouped by source class for the mutate kernel
    edges: Vec<Vec<MutationEdge>>,
    /// Per-class no-mutation self-weight: `1 - sum(factor[1..=L(j,k)])`
    self_weight: Vec<f64>,
    kmax: u32,
    mutcap: u32,
}

impl MutationMatrix {
    /// Build the matrix for two-segment classes under cap `kmax` and per-generation
    /// mutation cap `mutcap`, from an already-built [`FactorTable`]
    pub fn build(factor: &FactorTable, kmax: u32, mutcap: u32) -> Self {
        let num_classes = (kmax as usize + 1) * (kmax as usize + 1);
        let mut edges = vec![Vec::new(); num_classes];
        let mut self_weight = vec![0.0; num_classes];

        for j in 0..=kmax {
            for k in 0..=kmax {
                let src = class_index(kmax, j, k);
                let max_total = 2 * kmax - j - k;
                let l_max = mutcap.min(max_total);

                for l in 1..=l_max {
                    let admissible = admissible_pairs(kmax, j, k, l);
                    let share = factor.get(l as usize) / admissible.len() as f64;
                    for (l2, l3) in admissible {
                        let dst = class_index(kmax, j + l2, k + l3);
                        edges[src].push(MutationEdge {
                            src,
                            dst,
                            weight: share,
                        });
                    }
                }

                self_weight[src] = 1.0 - factor.partial_sum(l_max as usize);
            }
        }

        Self {
            edges,
            self_weight,
            kmax,
            mutcap,
        }
    }

    /// Edges leaving flattened source class `src`
    #[inline]
    pub fn edges_from(&self, src: usize) -> &[MutationEdge] {
        &self.edges[src]
    }

    /// No-mutation self-weight for flattened source class `src`
    #[inline]
    pub fn self_weight(&self, src: usize) -> f64 {
        self.self_weight[src]
    }

    /// Segment cap this matrix was built for
    pub fn kmax(&self) -> u32 {
        self.kmax
    }

    /// Per-generation mutation cap this matrix was built for
    pub fn mutcap(&self) -> u32 {
        self.mutcap
    }
}

/// Enumerate the `(l2, l3)` pairs with `l2 + l3 = l` admissible under the per-segment
/// cap `kmax` starting from source class `(j, k)`
///
/// "Admissible" means both `j + l2 <= kmax` and `k + l3 <= kmax`.
fn admissible_pairs(kmax: u32, j: u32, k: u32, l: u32) -> Vec<(u32, u32)> {
    let l2_min = l.saturating_sub(kmax - k);
    let l2_max = l.min(kmax - j);
    (l2_min..=l2_max).map(|l2| (l2, l - l2)).collect()
}

/// One-segment mutation transitions: `out[j+l] += factor[l] * in[j]`
///
/// One-segment classes need no splitting since there is only one segment to place new
/// mutations on, so this is a simple banded structure rather than the two-segment
/// matrix's sparse edge list; the same [`FactorTable`] (built over `2u`, per the engine's
/// contract) is reused unscaled for both arities.
#[derive(Debug, Clone)]
pub struct OneSegmentTransitions {
    /// `factor[l]` truncated to the per-generation mutation cap
    weights: Vec<f64>,
    kmax2: u32,
    mutcap: u32,
}

impl OneSegmentTransitions {
    /// Build the one-segment transitions for cap `2*kmax` and per-generation cap `mutcap`
    pub fn build(factor: &FactorTable, kmax: u32, mutcap: u32) -> Self {
        let kmax2 = 2 * kmax;
        let weights = (0..=kmax2).map(|l| factor.get(l as usize)).collect();
        Self {
            weights,
            kmax2,
            mutcap,
        }
    }

    /// Maximum extra mutations a particle at class `j` may acquire this generation
    #[inline]
    pub fn l_max(&self, j: u32) -> u32 {
        self.mutcap.min(self.kmax2 - j)
    }

    /// `factor[l]` for `l` in `1..=l_max(j)`
    #[inline]
    pub fn weight(&self, l: u32) -> f64 {
        self.weights[l as usize]
    }

    /// No-mutation self-weight for class `j`: `1 - sum(factor[1..=l_max(j)])`
    pub fn self_weight(&self, j: u32) -> f64 {
        let l_max = self.l_max(j);
        1.0 - (1..=l_max).map(|l| self.weight(l)).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn factor_table_is_identity_when_u_is_zero() {
        let factor = FactorTable::build(0.0, 5);
        assert_relative_eq!(factor.get(0), 1.0);
        for l in 1..=10 {
            assert_relative_eq!(factor.get(l), 0.0);
        }
    }

    #[test]
    fn factor_table_normalizes_for_small_u() {
        let kmax = 10;
        let factor = FactorTable::build(0.5, kmax);
        let sum: f64 = (0..=2 * kmax as usize).map(|l| factor.get(l)).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn mutation_matrix_never_exceeds_per_segment_cap() {
        let kmax = 6;
        let factor = FactorTable::build(1.2, kmax);
        let matrix = MutationMatrix::build(&factor, kmax, kmax * 2);

        for j in 0..=kmax {
            for k in 0..=kmax {
                let src = class_index(kmax, j, k);
                for edge in matrix.edges_from(src) {
                    let dst_j = edge.dst / (kmax as usize + 1);
                    let dst_k = edge.dst % (kmax as usize + 1);
                    assert!(dst_j as u32 <= kmax);
                    assert!(dst_k as u32 <= kmax);
                }
            }
        }
    }

    #[test]
    fn mutation_matrix_is_mass_conserving_per_source_class() {
        let kmax = 6;
        let factor = FactorTable::build(0.9, kmax);
        let matrix = MutationMatrix::build(&factor, kmax, kmax * 2);

        for j in 0..=kmax {
            for k in 0..=kmax {
                let src = class_index(kmax, j, k);
                let out_mass: f64 = matrix.edges_from(src).iter().map(|e| e.weight).sum();
                let total = out_mass + matrix.self_weight(src);
                assert_relative_eq!(total, 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn mutation_matrix_boundary_class_is_fully_self_weighted() {
        let kmax = 4;
        let factor = FactorTable::build(1.0, kmax);
        let matrix = MutationMatrix::build(&factor, kmax, kmax * 2);

        let src = class_index(kmax, kmax, kmax);
        assert!(matrix.edges_from(src).is_empty());
        assert_relative_eq!(matrix.self_weight(src), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn mutcap_truncation_is_absorbed_by_self_weight() {
        // With mutcap well below the per-segment cap, most probability mass for large l
        // must stay in the source class to preserve conservation.
        let kmax = 10;
        let factor = FactorTable::build(2.0, kmax);
        let matrix = MutationMatrix::build(&factor, kmax, 1);

        let src = class_index(kmax, 0, 0);
        let out_mass: f64 = matrix.edges_from(src).iter().map(|e| e.weight).sum();
        let total = out_mass + matrix.self_weight(src);
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        // Only l=1 edges exist under mutcap=1.
        assert_eq!(matrix.edges_from(src).len(), 2);
    }

    #[test]
    fn one_segment_transitions_identity_at_u_zero() {
        let kmax = 5;
        let factor = FactorTable::build(0.0, kmax);
        let transitions = OneSegmentTransitions::build(&factor, kmax, kmax * 2);
        assert_relative_eq!(transitions.self_weight(0), 1.0, epsilon = 1e-9);
        assert_relative_eq!(transitions.self_weight(2 * kmax), 1.0, epsilon = 1e-9);
    }
}
