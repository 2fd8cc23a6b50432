//! Configuration for the simulation engine, with CLI parsing traits derived
//!
//! `SimConfig` is both the library's configuration type and (via `clap::Parser`) the
//! shape of the simulation's positional command line arguments: fields with no
//! `#[clap(short)]`/`#[clap(long)]` attribute are treated by clap's derive as positional
//! arguments in declaration order.

// Several parameters (N0, K, H) are named the way the population-genetics literature
// names them, not in normal Rust snake-case.
#![allow(non_snake_case)]

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Simulation options: the positional CLI contract fixed for this engine, in order —
/// `destination, timestep, krecord, untilext, rep, s, N0, K, u, gen_num, c, r, seed,
/// host_num, kmax, pop2init_str, pop2init_len, pop1init_str, pop1init_len, tr, mig,
/// mutcap`
#[derive(Clone, Debug, Parser, Serialize, Deserialize)]
pub struct SimConfig {
    /// Name of the output subdirectory under `./data/`
    pub destination: String,
    /// Whether to emit one row per generation (`1`) or one row per replicate (`0`)
    pub timestep: u8,
    /// Whether to record mean mutation load (`0`) or minimum mutation load (`1`)
    pub krecord: u8,
    /// Whether to terminate a replicate early on global extinction
    pub untilext: u8,
    /// Number of replicates to perform
    pub rep: u32,
    /// Per-mutation selection coefficient
    pub s: f64,
    /// Initial population size per host, before proportional split
    pub N0: f64,
    /// Carrying capacity per host
    pub K: f64,
    /// Per-segment, per-generation mutation rate
    pub u: f64,
    /// Number of generations to run each replicate for
    pub gen_num: u32,
    /// Structural cost of carrying two segments
    pub c: f64,
    /// Reassortment rate
    pub r: f64,
    /// Seed for the RNG
    pub seed: u64,
    /// Number of real hosts (`H`); host 0 is always the migration pool
    pub host_num: u32,
    /// Per-segment mutation-count cap
    pub kmax: u32,
    /// `~`-terminated list of per-host initial two-segment proportions
    pub pop2init_str: String,
    /// Character length of `pop2init_str`
    pub pop2init_len: usize,
    /// `~`-terminated list of per-host initial one-segment proportions
    pub pop1init_str: String,
    /// Character length of `pop1init_str`
    pub pop1init_len: usize,
    /// Transmission rate applied to the migration pool
    pub tr: f64,
    /// Per-generation emigration fraction into the migration pool
    pub mig: f64,
    /// Per-generation cap on new mutations a single particle may acquire
    pub mutcap: u32,
}

/// Errors that reject a [`SimConfig`] before any tensor is allocated
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `kmax` must allow at least one mutation class
    #[error("kmax must be >= 1, got {0}")]
    KmaxTooSmall(u32),
    /// There must be at least one real host
    #[error("host_num must be >= 1, got {0}")]
    HostNumTooSmall(u32),
    /// `pop2init_len` did not match the actual character length of `pop2init_str`
    #[error("pop2init_len {declared} does not match actual length {actual} of pop2init_str")]
    Pop2InitLenMismatch {
        /// Declared length
        declared: usize,
        /// Actual length
        actual: usize,
    },
    /// `pop1init_len` did not match the actual character length of `pop1init_str`
    #[error("pop1init_len {declared} does not match actual length {actual} of pop1init_str")]
    Pop1InitLenMismatch {
        /// Declared length
        declared: usize,
        /// Actual length
        actual: usize,
    },
    /// The number of `~`-separated proportions in `pop2init_str` did not equal `host_num`
    #[error("pop2init_str has {found} entries, expected host_num = {expected}")]
    Pop2InitCountMismatch {
        /// Entries found
        found: usize,
        /// Entries expected
        expected: usize,
    },
    /// The number of `~`-separated proportions in `pop1init_str` did not equal `host_num`
    #[error("pop1init_str has {found} entries, expected host_num = {expected}")]
    Pop1InitCountMismatch {
        /// Entries found
        found: usize,
        /// Entries expected
        expected: usize,
    },
    /// A proportion string could not be parsed as a floating point number
    #[error("could not parse proportion {entry:?}: {source}")]
    BadProportion {
        /// The offending substring
        entry: String,
        /// Underlying parse error
        #[source]
        source: std::num::ParseFloatError,
    },
}

/// A [`SimConfig`] that has passed validation, with the `~`-terminated proportion lists
/// already parsed into per-host vectors
#[derive(Debug, Clone)]
pub struct ValidatedSimConfig {
    /// The underlying configuration
    pub inner: SimConfig,
    /// Parsed per-host initial two-segment proportions
    pub pop2init: Vec<f64>,
    /// Parsed per-host initial one-segment proportions
    pub pop1init: Vec<f64>,
}

impl SimConfig {
    /// Validate this configuration, parsing the `~`-terminated proportion lists
    ///
    /// Rejects configuration errors up front, before any tensor allocation, per the
    /// engine's error handling design: setup errors abort the process rather than
    /// surfacing mid-replicate.
    pub fn validate(self) -> Result<ValidatedSimConfig, ConfigError> {
        if self.kmax < 1 {
            return Err(ConfigError::KmaxTooSmall(self.kmax));
        }
        if self.host_num < 1 {
            return Err(ConfigError::HostNumTooSmall(self.host_num));
        }
        if self.pop2init_str.chars().count() != self.pop2init_len {
            return Err(ConfigError::Pop2InitLenMismatch {
                declared: self.pop2init_len,
                actual: self.pop2init_str.chars().count(),
            });
        }
        if self.pop1init_str.chars().count() != self.pop1init_len {
            return Err(ConfigError::Pop1InitLenMismatch {
                declared: self.pop1init_len,
                actual: self.pop1init_str.chars().count(),
            });
        }

        let pop2init = parse_tilde_list(&self.pop2init_str)?;
        if pop2init.len() != self.host_num as usize {
            return Err(ConfigError::Pop2InitCountMismatch {
                found: pop2init.len(),
                expected: self.host_num as usize,
            });
        }

        let pop1init = parse_tilde_list(&self.pop1init_str)?;
        if pop1init.len() != self.host_num as usize {
            return Err(ConfigError::Pop1InitCountMismatch {
                found: pop1init.len(),
                expected: self.host_num as usize,
            });
        }

        Ok(ValidatedSimConfig {
            inner: self,
            pop2init,
            pop1init,
        })
    }
}

/// Parse a `~`-terminated, `~`-separated list of floating point proportions
fn parse_tilde_list(s: &str) -> Result<Vec<f64>, ConfigError> {
    s.trim_end_matches('~')
        .split('~')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<f64>()
                .map_err(|source| ConfigError::BadProportion {
                    entry: entry.to_string(),
                    source,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cfg() -> SimConfig {
        SimConfig {
            destination: "out".to_string(),
            timestep: 1,
            krecord: 0,
            untilext: 0,
            rep: 1,
            s: 0.0,
            N0: 10.0,
            K: 100.0,
            u: 0.0,
            gen_num: 10,
            c: 0.0,
            r: 0.0,
            seed: 1,
            host_num: 2,
            kmax: 5,
            pop2init_str: "0.5~0.5~".to_string(),
            pop2init_len: 8,
            pop1init_str: "0~0~".to_string(),
            pop1init_len: 4,
            tr: 0.0,
            mig: 0.0,
            mutcap: 2,
        }
    }

    #[test]
    fn valid_config_parses_proportions() {
        let validated = base_cfg().validate().unwrap();
        assert_eq!(validated.pop2init, vec![0.5, 0.5]);
        assert_eq!(validated.pop1init, vec![0.0, 0.0]);
    }

    #[test]
    fn rejects_kmax_zero() {
        let mut cfg = base_cfg();
        cfg.kmax = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::KmaxTooSmall(0))));
    }

    #[test]
    fn rejects_mismatched_declared_length() {
        let mut cfg = base_cfg();
        cfg.pop2init_len = 3;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Pop2InitLenMismatch { .. })
        ));
    }

    #[test]
    fn rejects_proportion_count_not_matching_host_num() {
        let mut cfg = base_cfg();
        cfg.host_num = 3;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Pop2InitCountMismatch { .. })
        ));
    }
}
