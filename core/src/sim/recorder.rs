//! Reduces a population tensor snapshot into per-host recorder rows
//!
//! Two modes, selected by `krecord`: mean mutation load (`0`) or minimum mutation load
//! (`1`). Both report one row of four numbers — `(N1, N2, k1, k2)` — per host, plus a
//! global row at index 0, matching the output layout fixed in the engine's external
//! interface.

use crate::population::Population;

/// A single host's (or the global) recorded statistics for one row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostStat {
    /// One-segment population size
    pub pop1: f64,
    /// Two-segment population size
    pub pop2: f64,
    /// One-segment mutation load (mean or minimum, per the recorder mode)
    pub k1: f64,
    /// Two-segment mutation load (mean or minimum, per the recorder mode)
    pub k2: f64,
}

/// Reduce `pop`'s current buffers into one [`HostStat`] per host, index 0 first (global)
/// followed by hosts `1..=host_num`
///
/// `krecord = 0` selects mean mutation load, `krecord = 1` selects minimum mutation load.
/// A host with zero population reports a load of `-1` for the corresponding arity, as
/// does the global row when the corresponding grand total is zero.
pub fn record(pop: &Population, krecord: u8) -> Vec<HostStat> {
    match krecord {
        0 => record_mean(pop),
        _ => record_min(pop),
    }
}

fn record_mean(pop: &Population) -> Vec<HostStat> {
    let host_num = pop.host_num();
    let kmax = pop.kmax();
    let width = kmax as usize + 1;
    let classes2 = width * width;
    let classes1 = 2 * kmax as usize + 1;
    let totals = pop.totals();

    let mut rows = Vec::with_capacity(host_num as usize + 1);

    let mut host_k2 = vec![0.0; host_num as usize + 1];
    let mut host_k1 = vec![0.0; host_num as usize + 1];

    for h in 1..=host_num as usize {
        let base2 = h * classes2;
        let n2 = totals.n2[h];
        let k2 = if n2 > 0.0 {
            let mut weighted = 0.0;
            for j in 0..width {
                for k in 0..width {
                    weighted += pop.cur2()[base2 + j * width + k] * (j + k) as f64;
                }
            }
            weighted / n2
        } else {
            -1.0
        };
        host_k2[h] = k2;

        let base1 = h * classes1;
        let n1 = totals.n1[h];
        let k1 = if n1 > 0.0 {
            let mut weighted = 0.0;
            for j in 0..classes1 {
                weighted += pop.cur1()[base1 + j] * j as f64;
            }
            weighted / n1
        } else {
            -1.0
        };
        host_k1[h] = k1;

        rows.push(HostStat {
            pop1: n1,
            pop2: n2,
            k1,
            k2,
        });
    }

    let global_k2 = if totals.n2[0] > 0.0 {
        (1..=host_num as usize)
            .map(|h| host_k2[h] * totals.n2[h] / totals.n2[0])
            .sum()
    } else {
        -1.0
    };
    let global_k1 = if totals.n1[0] > 0.0 {
        (1..=host_num as usize)
            .map(|h| host_k1[h] * totals.n1[h] / totals.n1[0])
            .sum()
    } else {
        -1.0
    };

    rows.insert(
        0,
        HostStat {
            pop1: totals.n1[0],
            pop2: totals.n2[0],
            k1: global_k1,
            k2: global_k2,
        },
    );

    rows
}

fn record_min(pop: &Population) -> Vec<HostStat> {
    let host_num = pop.host_num();
    let kmax = pop.kmax();
    let width = kmax as usize + 1;
    let classes2 = width * width;
    let classes1 = 2 * kmax as usize + 1;
    let totals = pop.totals();

    let mut rows = Vec::with_capacity(host_num as usize + 1);
    let mut host_min2 = vec![-1.0f64; host_num as usize + 1];
    let mut host_min1 = vec![-1.0f64; host_num as usize + 1];

    for h in 1..=host_num as usize {
        let base2 = h * classes2;
        let mut min2 = 2 * kmax + 1;
        for j in 0..width {
            for k in 0..width {
                if pop.cur2()[base2 + j * width + k] > 0.0 {
                    min2 = min2.min((j + k) as u32);
                }
            }
        }
        let k2 = if min2 <= 2 * kmax { min2 as f64 } else { -1.0 };
        host_min2[h] = k2;

        let base1 = h * classes1;
        let mut min1 = 2 * kmax + 1;
        for j in 0..classes1 {
            if pop.cur1()[base1 + j] > 0.0 {
                min1 = min1.min(j as u32);
            }
        }
        let k1 = if min1 <= 2 * kmax { min1 as f64 } else { -1.0 };
        host_min1[h] = k1;

        rows.push(HostStat {
            pop1: totals.n1[h],
            pop2: totals.n2[h],
            k1,
            k2,
        });
    }

    let global_k2 = host_min2
        .iter()
        .skip(1)
        .filter(|&&v| v >= 0.0)
        .cloned()
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        })
        .unwrap_or(-1.0);
    let global_k1 = host_min1
        .iter()
        .skip(1)
        .filter(|&&v| v >= 0.0)
        .cloned()
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        })
        .unwrap_or(-1.0);

    rows.insert(
        0,
        HostStat {
            pop1: totals.n1[0],
            pop2: totals.n2[0],
            k1: global_k1,
            k2: global_k2,
        },
    );

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mean_load_is_minus_one_for_empty_host() {
        let pop = Population::new(1, 4);
        let rows = record(&pop, 0);
        assert_relative_eq!(rows[0].k2, -1.0);
        assert_relative_eq!(rows[1].k2, -1.0);
    }

    #[test]
    fn mean_load_weights_global_by_host_share() {
        let mut pop = Population::new(2, 4);
        pop.seed_initial(100.0, &[1.0, 0.0], &[0.0, 0.0]);
        // host 1 has all mass at class (0,0), so k2 should be 0 everywhere.
        let rows = record(&pop, 0);
        assert_relative_eq!(rows[0].k2, 0.0);
        assert_relative_eq!(rows[1].k2, 0.0);
        assert_relative_eq!(rows[2].k2, -1.0);
    }

    #[test]
    fn min_load_finds_lowest_populated_class() {
        let mut pop = Population::new(1, 4);
        {
            let width = 5;
            let (out, _) = pop.write2();
            out[width * width + 2 * width + 1] = 10.0;
        }
        pop.swap2();
        pop.recompute_totals();

        let rows = record(&pop, 1);
        assert_relative_eq!(rows[1].k2, 3.0);
        assert_relative_eq!(rows[0].k2, 3.0);
    }
}
