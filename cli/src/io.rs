//! IO helpers specific to the CLI
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Result;

use virsim_core::cfg::SimConfig;
use virsim_core::io::{extract_sim_config, ReportWriter};

/// Buffer capacity to use for the output file
///
/// Set at 8 MB
const FILE_BUFFER_CAPACITY: usize = 8 * (1 << 20);

/// Create (if necessary) the `./data/<destination>/` directory named by `sim_cfg` and open
/// a uniquely-named report file inside it, wrapped in a [`ReportWriter`]
pub fn report_writer_for_cli(sim_cfg: &SimConfig) -> Result<ReportWriter<BufWriter<File>>> {
    let dir = PathBuf::from("data").join(&sim_cfg.destination);
    fs::create_dir_all(&dir)?;

    let path = unique_report_path(&dir, sim_cfg);
    let file = create_buffered_file(&path)?;

    ReportWriter::new(file, sim_cfg)
}

/// Pick a report filename embedding every scalar run parameter, disambiguating with a
/// `(n)` suffix if a file with that name already exists in `dir`
fn unique_report_path(dir: &Path, sim_cfg: &SimConfig) -> PathBuf {
    let stem = format!(
        "report_ts{}_kr{}_ext{}_rep{}_s{}_N0{}_K{}_u{}_gen{}_c{}_r{}_seed{}_h{}_kmax{}_tr{}_mig{}_mutcap{}",
        sim_cfg.timestep,
        sim_cfg.krecord,
        sim_cfg.untilext,
        sim_cfg.rep,
        sim_cfg.s,
        sim_cfg.N0,
        sim_cfg.K,
        sim_cfg.u,
        sim_cfg.gen_num,
        sim_cfg.c,
        sim_cfg.r,
        sim_cfg.seed,
        sim_cfg.host_num,
        sim_cfg.kmax,
        sim_cfg.tr,
        sim_cfg.mig,
        sim_cfg.mutcap,
    );

    let mut candidate = dir.join(format!("{stem}.csv"));
    let mut suffix = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}({suffix}).csv"));
        suffix += 1;
    }
    candidate
}

/// Create a buffered `File` to write to
fn create_buffered_file<P: AsRef<Path>>(path: P) -> std::io::Result<BufWriter<File>> {
    Ok(BufWriter::with_capacity(
        FILE_BUFFER_CAPACITY,
        File::create(path)?,
    ))
}

/// Extract a `SimConfig` stored from a previous run from the file at a given path
pub fn extract_sim_config_from_path<P: AsRef<Path>>(path: P) -> Result<SimConfig> {
    File::open(path)
        .map_err(anyhow::Error::from)
        .and_then(extract_sim_config)
}
