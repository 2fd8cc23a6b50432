//! Drives the replicate/generation pipeline and exposes its intermediate state
//!
//! [`SimulationHandler`] owns everything one replicate needs — the population tensor,
//! the precomputed tables, and the RNG stream — and steps through the mutate, reassort,
//! reproduce, migrate sequence one generation at a time via an iterator-like
//! `next_state`/`current_state` interface, mirroring how the engine's ancestor drove its
//! own replicate/transfer loop.

mod kernels;
pub mod recorder;

use std::sync::Arc;

use crate::cfg::{ConfigError, SimConfig, ValidatedSimConfig};
use crate::population::Population;
use crate::rng::{seeded_rng, SimRng};
use crate::tables::{FactorTable, MutationMatrix, OneSegmentTransitions};

/// Handler to run a sequence of replicates from a validated config, exposing intermediate
/// state with an iterator-like interface
pub struct SimulationHandler {
    /// Current replicate, `0` before the first call to [`SimulationHandler::next_state`]
    replicate: u32,
    /// Current generation within the current replicate
    generation: u32,
    /// Validated simulation options
    cfg: ValidatedSimConfig,
    /// Precomputed two-segment mutation transition matrix, `Arc`-shared so several
    /// handlers spread across worker threads can reuse one build of it
    matrix: Arc<MutationMatrix>,
    /// Precomputed one-segment mutation transitions, `Arc`-shared for the same reason
    one_seg: Arc<OneSegmentTransitions>,
    /// The population tensor, reused (zeroed and reseeded) across replicates
    pop: Population,
    /// RNG shared across all replicates
    rng: SimRng,
    /// Set when the current replicate reached global extinction under `untilext`
    ended_early: bool,
}

impl SimulationHandler {
    /// Validate `cfg` and build a new handler, precomputing the mutation tables itself for
    /// single-threaded use
    ///
    /// When replicates are split across worker threads, build the tables once with
    /// [`build_tables`](SimulationHandler::build_tables) and hand each worker a handler
    /// via [`SimulationHandler::with_tables`] instead, so the (comparatively expensive)
    /// table construction is not repeated per worker.
    pub fn new(cfg: SimConfig) -> Result<Self, ConfigError> {
        let cfg = cfg.validate()?;
        let (matrix, one_seg) = Self::build_tables(&cfg);
        Self::with_tables(cfg, matrix, one_seg)
    }

    /// Precompute the mutation tables for a validated config, for sharing across several
    /// handlers built with [`SimulationHandler::with_tables`]
    pub fn build_tables(
        cfg: &ValidatedSimConfig,
    ) -> (Arc<MutationMatrix>, Arc<OneSegmentTransitions>) {
        let factor = FactorTable::build(cfg.inner.u, cfg.inner.kmax);
        let matrix = MutationMatrix::build(&factor, cfg.inner.kmax, cfg.inner.mutcap);
        let one_seg = OneSegmentTransitions::build(&factor, cfg.inner.kmax, cfg.inner.mutcap);
        (Arc::new(matrix), Arc::new(one_seg))
    }

    /// Build a new handler from a validated config and already-built tables, without
    /// recomputing them
    pub fn with_tables(
        cfg: ValidatedSimConfig,
        matrix: Arc<MutationMatrix>,
        one_seg: Arc<OneSegmentTransitions>,
    ) -> Result<Self, ConfigError> {
        let pop = Population::new(cfg.inner.host_num, cfg.inner.kmax);
        let rng = seeded_rng(Some(cfg.inner.seed));

        Ok(Self {
            replicate: 0,
            generation: 0,
            cfg,
            matrix,
            one_seg,
            pop,
            rng,
            ended_early: false,
        })
    }

    /// Validated configuration this handler is running
    pub fn cfg(&self) -> &ValidatedSimConfig {
        &self.cfg
    }

    /// Get the current state of the handled simulation, or `None` if it has not been
    /// advanced yet or the configured number of replicates is zero
    pub fn current_state(&self) -> Option<SimulationState<'_>> {
        if self.replicate > 0 {
            Some(SimulationState {
                replicate: self.replicate,
                generation: self.generation,
                end_of_replicate: self.ended_early || self.generation == self.cfg.inner.gen_num,
                population: &self.pop,
            })
        } else {
            None
        }
    }

    /// If possible, advance the state of the handled simulation and return the new state,
    /// or do nothing and return `None` with the state left unchanged if it cannot be
    /// advanced any further
    pub fn next_state(&mut self) -> Option<SimulationState<'_>> {
        if let Some(SimulationState {
            end_of_replicate: false,
            ..
        }) = self.current_state()
        {
            self.generation += 1;
        } else if self.replicate < self.cfg.inner.rep {
            self.replicate += 1;
            self.generation = 0;
        } else {
            return None;
        }

        if self.generation == 0 {
            self.start_replicate();
        } else {
            self.advance_generation();
        }

        self.current_state()
    }

    /// Whether the simulation is finished
    ///
    /// This returning `true` means [`SimulationHandler::next_state`] will return `None`
    /// and vice versa.
    pub fn is_finished(&self) -> bool {
        self.replicate == self.cfg.inner.rep
            && (self.replicate == 0
                || self.ended_early
                || self.generation == self.cfg.inner.gen_num)
    }

    /// Reset and reseed the population tensor for a new replicate
    fn start_replicate(&mut self) {
        self.pop.reset();
        self.pop
            .seed_initial(self.cfg.inner.N0, &self.cfg.pop2init, &self.cfg.pop1init);
        self.ended_early = false;
    }

    /// Run one generation's mutate, reassort, reproduce, migrate pipeline, then check the
    /// `untilext` extinction condition against the post-migration totals
    fn advance_generation(&mut self) {
        kernels::mutate(&mut self.pop, &self.matrix, &self.one_seg);
        kernels::reassort(&mut self.pop, self.cfg.inner.r);
        kernels::reproduce(&mut self.pop, &self.cfg, &mut self.rng);
        kernels::migrate(
            &mut self.pop,
            self.cfg.inner.mig,
            self.cfg.inner.tr,
            &mut self.rng,
        );

        if self.cfg.inner.untilext != 0 {
            let totals = self.pop.totals();
            if totals.n2[0] == 0.0 || totals.n1[0] == 0.0 {
                self.ended_early = true;
            }
        }
    }
}

/// A snapshot of the simulation state at some point in time
pub struct SimulationState<'a> {
    /// Replicate this state is for, starting at `1`
    pub replicate: u32,
    /// Generation this state is for, `0` is the freshly-seeded state before any stage runs
    pub generation: u32,
    /// Whether this state is the last state for the current replicate
    pub end_of_replicate: bool,
    /// The population tensor as of this state
    pub population: &'a Population,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SimConfig {
        SimConfig {
            destination: "test".to_string(),
            timestep: 1,
            krecord: 0,
            untilext: 0,
            rep: 2,
            s: 0.0,
            N0: 100.0,
            K: 1000.0,
            u: 0.1,
            gen_num: 3,
            c: 0.0,
            r: 0.1,
            seed: 42,
            host_num: 2,
            kmax: 4,
            pop2init_str: "1.0~0.0~".to_string(),
            pop2init_len: 8,
            pop1init_str: "0.0~0.0~".to_string(),
            pop1init_len: 8,
            tr: 0.0,
            mig: 0.0,
            mutcap: 4,
        }
    }

    #[test]
    fn runs_exactly_rep_times_gen_num_generations() {
        let mut handler = SimulationHandler::new(cfg()).unwrap();
        let mut seen = Vec::new();
        while let Some(state) = handler.next_state() {
            seen.push((state.replicate, state.generation));
        }
        assert!(handler.is_finished());
        assert_eq!(seen.last(), Some(&(2, 3)));
        assert_eq!(seen.iter().filter(|(r, _)| *r == 1).count(), 4); // generations 0..=3
    }

    #[test]
    fn untilext_ends_replicate_early_on_global_extinction() {
        let mut bad_cfg = cfg();
        bad_cfg.untilext = 1;
        bad_cfg.rep = 1;
        bad_cfg.gen_num = 50;
        // Every host deposits its entire mass into the pool (mig = 1.0) and the pool's
        // transmission draw back has mean zero (tr = 0.0), so after the first generation's
        // migration stage every class is deterministically empty.
        bad_cfg.mig = 1.0;
        bad_cfg.tr = 0.0;

        let mut handler = SimulationHandler::new(bad_cfg).unwrap();
        let mut last_generation = 0;
        while let Some(state) = handler.next_state() {
            last_generation = state.generation;
        }
        assert!(last_generation < 50);
    }

    #[test]
    fn empty_replicate_count_is_finished_immediately() {
        let mut empty_cfg = cfg();
        empty_cfg.rep = 0;
        let mut handler = SimulationHandler::new(empty_cfg).unwrap();
        assert!(handler.is_finished());
        assert!(handler.next_state().is_none());
    }
}
