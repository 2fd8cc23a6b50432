//! Library for concerns and functions specific to the CLI, rather than the simulation
//! engine itself
//!
//! Kept separate to "dogfood" the engine's library interface by making the CLI use it, to
//! prevent overly tight coupling between the CLI and the engine, and to keep CLI concerns
//! totally out of the engine's public interface.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time;

use anyhow::{Error, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::{izip, Itertools};

use virsim_core::cfg::SimConfig;
use virsim_core::rng::worker_seed;
use virsim_core::sim::recorder::HostStat;
use virsim_core::sim::{recorder, SimulationHandler, SimulationState};
use virsim_core::tables::{MutationMatrix, OneSegmentTransitions};

use cfg::{CliCommand, ReproduceConfig};
use io::{extract_sim_config_from_path, report_writer_for_cli};

mod cfg;
mod io;

pub use cfg::CliConfig;

/// Run the CLI as specified by some `CliConfig`
pub fn run_cli_config(cfg: CliConfig) {
    match cfg.command {
        CliCommand::Simulate(sim_cli_cfg) => run_simulations(
            sim_cli_cfg.sim_cfg,
            sim_cli_cfg.workers,
            sim_cli_cfg.quiet,
        ),
        CliCommand::Reproduce(reproduce_cfg) => reproduce_simulations(&reproduce_cfg),
    }
}

/// Run the simulation with command line display and report error results if applicable
fn run_simulations(sim_cfg: SimConfig, workers: u32, quiet: bool) {
    if let Err(e) = run_simulations_inner(sim_cfg, workers, quiet) {
        report_error("Error: Failed to run simulation.", e);
    }
}

/// Reproduce a previous run's results by extracting its settings and handing off to the
/// normal `Simulate` path
///
/// The engine's `seed` field is a required `u64`, not optional, so a reproduced run always
/// replays the exact same RNG stream the original run used.
fn reproduce_simulations(cfg: &ReproduceConfig) {
    match extract_sim_config_from_path(&cfg.input_path) {
        Ok(sim_cfg) => run_simulations(sim_cfg, cfg.workers, cfg.quiet),
        Err(e) => {
            report_error(
                "Error: Failed to read simulation options for reproduction",
                e,
            );
        }
    }
}

/// Run the simulation with command line display and pass error results up
///
/// Dispatches to the single-threaded path when `workers <= 1` or there is at most one
/// replicate to run (splitting a single replicate across threads buys nothing), and to the
/// multi-threaded path otherwise.
fn run_simulations_inner(sim_cfg: SimConfig, workers: u32, quiet: bool) -> Result<()> {
    let report_writer = report_writer_for_cli(&sim_cfg)?;

    if workers <= 1 || sim_cfg.rep <= 1 {
        run_sequential(sim_cfg, report_writer, quiet)
    } else {
        run_parallel(sim_cfg, workers, report_writer, quiet)
    }
}

/// Run every replicate on the calling thread, writing each recorded row as it is produced
fn run_sequential<W: std::io::Write>(
    sim_cfg: SimConfig,
    mut report_writer: virsim_core::io::ReportWriter<W>,
    quiet: bool,
) -> Result<()> {
    const TARGET_UPDATE_INTERVAL: time::Duration = time::Duration::from_millis(500);

    let rep = sim_cfg.rep as u64;
    let gen_num = sim_cfg.gen_num as u64;
    let timestep = sim_cfg.timestep;

    let mut simulation_handler = SimulationHandler::new(sim_cfg)?;
    let krecord = simulation_handler.cfg().inner.krecord;

    let mut bar_handler = ProgressBarHandler::new(
        TARGET_UPDATE_INTERVAL,
        quiet,
        [
            styled_bar(rep, "Replicate:"),
            styled_bar(gen_num, "Generation:"),
        ],
    );

    while let Some(state) = simulation_handler.next_state() {
        let SimulationState {
            replicate,
            generation,
            end_of_replicate,
            population,
        } = state;

        if timestep == 1 || end_of_replicate {
            let rows = recorder::record(population, krecord);
            report_writer.record(replicate, generation, &rows)?;
        }

        bar_handler.maybe_set_positions([replicate as u64 - 1, generation as u64]);
    }

    Ok(())
}

/// A single recorded row, tagged with the global replicate number it belongs to
struct RecordedRow {
    replicate: u32,
    generation: u32,
    rows: Vec<HostStat>,
}

/// Messages a worker thread sends back to the writer thread
enum WorkerMsg {
    /// A row ready to be written
    Row(RecordedRow),
    /// One of this worker's replicates finished, for progress bar accounting
    ReplicateFinished,
    /// The worker's share of replicates failed to run at all
    Failed(Error),
}

/// Split `rep` replicates across `workers` independent threads, each with its own
/// [`Population`](virsim_core::population::Population) tensor and RNG stream seeded by
/// splitting the top-level seed, and write every recorded row back on the calling thread
/// as it arrives
///
/// Replicates are embarrassingly parallel — nothing a worker computes depends on any
/// other replicate — so each worker is handed a contiguous block of the total replicate
/// count and a `SimConfig` clone with `rep` and `seed` adjusted for its block. The
/// "Generation" progress bar is necessarily approximate here, since workers advance
/// independently; it shows the most recently completed generation from any worker rather
/// than a single strict progression.
fn run_parallel<W: std::io::Write>(
    sim_cfg: SimConfig,
    workers: u32,
    mut report_writer: virsim_core::io::ReportWriter<W>,
    quiet: bool,
) -> Result<()> {
    const TARGET_UPDATE_INTERVAL: time::Duration = time::Duration::from_millis(500);

    let rep = sim_cfg.rep;
    let gen_num = sim_cfg.gen_num as u64;
    let top_seed = sim_cfg.seed;
    let blocks = partition_replicates(rep, workers);

    let validated = sim_cfg.validate()?;
    let (matrix, one_seg) = SimulationHandler::build_tables(&validated);

    let mut bar_handler = ProgressBarHandler::new(
        TARGET_UPDATE_INTERVAL,
        quiet,
        [
            styled_bar(rep as u64, "Replicate:"),
            styled_bar(gen_num, "Generation:"),
        ],
    );

    let mut first_error = None;
    let mut completed_replicates: u64 = 0;

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<WorkerMsg>();

        for (index, (offset, count)) in blocks.into_iter().enumerate() {
            let mut worker_cfg = validated.inner.clone();
            worker_cfg.rep = count;
            worker_cfg.seed = worker_seed(top_seed, index as u64);
            let matrix = Arc::clone(&matrix);
            let one_seg = Arc::clone(&one_seg);
            let tx = tx.clone();
            scope.spawn(move || run_worker(worker_cfg, matrix, one_seg, offset, tx));
        }
        drop(tx);

        for msg in rx {
            match msg {
                WorkerMsg::Row(RecordedRow {
                    replicate,
                    generation,
                    rows,
                }) => {
                    if let Err(e) = report_writer.record(replicate, generation, &rows) {
                        first_error.get_or_insert(e);
                    }
                    bar_handler.maybe_set_positions([completed_replicates, generation as u64]);
                }
                WorkerMsg::ReplicateFinished => {
                    completed_replicates += 1;
                    bar_handler.set_positions([completed_replicates, 0]);
                }
                WorkerMsg::Failed(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
    });

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Partition `rep` replicates into `workers` contiguous, as-even-as-possible blocks,
/// returned as `(offset, count)` pairs
///
/// Clamps the worker count to `rep` so no block is empty.
fn partition_replicates(rep: u32, workers: u32) -> Vec<(u32, u32)> {
    let workers = workers.clamp(1, rep.max(1));
    let base = rep / workers;
    let remainder = rep % workers;

    let mut blocks = Vec::with_capacity(workers as usize);
    let mut offset = 0;
    for index in 0..workers {
        let count = base + u32::from(index < remainder);
        blocks.push((offset, count));
        offset += count;
    }

    blocks
}

/// Run one worker's share of replicates, sending every recorded row and replicate
/// completion back over `tx`
///
/// `replicate_offset` is added to this worker's own 1-based replicate numbering to
/// recover the global replicate number its rows should be written under. `matrix` and
/// `one_seg` are the tables built once by [`run_parallel`] and shared read-only across
/// every worker, rather than rebuilt per thread.
fn run_worker(
    worker_cfg: SimConfig,
    matrix: Arc<MutationMatrix>,
    one_seg: Arc<OneSegmentTransitions>,
    replicate_offset: u32,
    tx: mpsc::Sender<WorkerMsg>,
) {
    let worker_cfg = match worker_cfg.validate() {
        Ok(validated) => validated,
        Err(e) => {
            let _ = tx.send(WorkerMsg::Failed(e.into()));
            return;
        }
    };
    let mut simulation_handler = match SimulationHandler::with_tables(worker_cfg, matrix, one_seg)
    {
        Ok(handler) => handler,
        Err(e) => {
            let _ = tx.send(WorkerMsg::Failed(e.into()));
            return;
        }
    };
    let krecord = simulation_handler.cfg().inner.krecord;
    let timestep = simulation_handler.cfg().inner.timestep;

    while let Some(state) = simulation_handler.next_state() {
        let SimulationState {
            replicate,
            generation,
            end_of_replicate,
            population,
        } = state;

        if timestep == 1 || end_of_replicate {
            let rows = recorder::record(population, krecord);
            let msg = WorkerMsg::Row(RecordedRow {
                replicate: replicate_offset + replicate,
                generation,
                rows,
            });
            if tx.send(msg).is_err() {
                return;
            }
        }

        if end_of_replicate && tx.send(WorkerMsg::ReplicateFinished).is_err() {
            return;
        }
    }
}

/// Report an `error` and a `message` to the user
fn report_error(message: &str, error: Error) {
    eprintln!("{}", message);
    eprintln!("{:#}", error);
    eprintln!("Details:\n{:#?}", error);
}

/// Get a `ProgressBar` with style options and a custom prefix set to use for displaying
/// progress
fn styled_bar(len: u64, prefix: &str) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(len, ProgressDrawTarget::stderr_nohz())
        .with_style(ProgressStyle::default_bar().template("{prefix} {wide_bar} [{pos}/{len}]"));
    bar.set_prefix(prefix);

    bar
}

/// Handler for multiple `indicatif::ProgressBar`s
struct ProgressBarHandler<const N: usize> {
    bars: [ProgressBar; N],
    quiet: bool,
    update_interval: time::Duration,
    last_update: time::Instant,
}

impl<const N: usize> ProgressBarHandler<N> {
    /// Create a new `ProgressBarHandler` taking ownership of the underlying progress bars
    ///
    /// When `quiet` is set, the bars are hidden rather than omitted outright, so the rest
    /// of this type's logic (position tracking, panic hook) stays unchanged.
    pub fn new(update_interval: time::Duration, quiet: bool, bars: [ProgressBar; N]) -> Self {
        if quiet {
            for bar in &bars {
                bar.set_draw_target(ProgressDrawTarget::hidden());
            }
        }

        // ProgressBars are Arc under the hood, clone is Arc clone.
        // Need to do this so bars don't interfere with panic messages.
        let handles = bars.clone();
        let old_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            for handle in &handles {
                handle.abandon();
            }

            old_hook(info);
        }));

        let mut result = Self {
            bars,
            quiet,
            update_interval,
            last_update: time::Instant::now(),
        };
        // Make sure bars start cleared out
        result.set_positions([0; N]);
        result
    }

    /// Set positions of the handled bars
    pub fn set_positions(&mut self, positions: [u64; N]) {
        if let Some((first_updatable, _)) = izip!(positions, &self.bars)
            .find_position(|(position, bar)| *position != bar.position())
        {
            // Clear all bars that come after this one
            for bar in self.bars.iter_mut().skip(first_updatable + 1).rev() {
                bar.finish_and_clear();
            }
            // Set position of this bar
            self.bars[first_updatable].set_position(positions[first_updatable]);
            // Reset/set positions for remaining bars
            for (position, bar) in izip!(positions, &mut self.bars).skip(first_updatable + 1) {
                bar.reset();
                bar.set_position(position);
            }
        }

        self.last_update = time::Instant::now();
    }

    /// Set positions of the handled bars only if enough time has elapsed
    pub fn maybe_set_positions(&mut self, positions: [u64; N]) {
        if self.last_update.elapsed() >= self.update_interval {
            self.set_positions(positions);
        }
    }
}

impl<const N: usize> Drop for ProgressBarHandler<N> {
    fn drop(&mut self) {
        if self.quiet {
            return;
        }
        for bar in &self.bars {
            bar.finish_and_clear();
        }
    }
}
