//! The CSV report writer, the engine's only output format

use std::io::Write;

use anyhow::Result;

use crate::cfg::SimConfig;
use crate::sim::recorder::HostStat;

use crate::io::OutputMode;

use crate::io::output::{initialize_output_as_csv, EMPTY_CSV_RECORD};

/// Writes one CSV row per recorded generation (`timestep = 1`) or per replicate
/// (`timestep = 0`), with four columns — `pop1`, `pop2`, `k1`, `k2` — per host, the
/// global row (index 0) first
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
    timestep: u8,
}

impl<W: Write> ReportWriter<W> {
    /// Create a new `ReportWriter`, writing the metadata/config header and the column
    /// header row to the underlying `writer`
    pub fn new(writer: W, sim_cfg: &SimConfig) -> Result<Self> {
        let mut writer = initialize_output_as_csv(writer, sim_cfg, OutputMode::Report)?;

        let mut header = vec!["rep".to_string()];
        if sim_cfg.timestep == 1 {
            header.push("gen".to_string());
        }
        for h in 0..=sim_cfg.host_num {
            header.push(format!("pop1.{h}"));
            header.push(format!("pop2.{h}"));
            header.push(format!("k1.{h}"));
            header.push(format!("k2.{h}"));
        }
        writer.write_record(&header)?;

        Ok(Self {
            writer,
            timestep: sim_cfg.timestep,
        })
    }

    /// Record one row: `replicate`, optionally `generation` (only when `timestep = 1`),
    /// then each of `rows` flattened into its four fields
    pub fn record(&mut self, replicate: u32, generation: u32, rows: &[HostStat]) -> Result<()> {
        self.writer.write_field(replicate.to_string())?;
        if self.timestep == 1 {
            self.writer.write_field(generation.to_string())?;
        }
        for row in rows {
            self.writer.write_field(format_num(row.pop1))?;
            self.writer.write_field(format_num(row.pop2))?;
            self.writer.write_field(format_num(row.k1))?;
            self.writer.write_field(format_num(row.k2))?;
        }
        self.writer.write_record(EMPTY_CSV_RECORD)?;

        Ok(())
    }

    /// Consume the outputter and get back the underlying `writer`
    ///
    /// Will not necessarily flush the writer.
    pub fn into_inner(self) -> Result<W, csv::IntoInnerError<csv::Writer<W>>> {
        self.writer.into_inner()
    }
}

/// Format a recorded statistic, preserving the `-1` sentinel for an empty host/arity
/// exactly rather than letting float formatting print `-1.0` inconsistently with the
/// populated rows
fn format_num(v: f64) -> String {
    if v == v.trunc() {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::recorder::HostStat;

    fn cfg() -> SimConfig {
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
            gen_num: 1,
            c: 0.0,
            r: 0.0,
            seed: 1,
            host_num: 1,
            kmax: 2,
            pop2init_str: "1~".to_string(),
            pop2init_len: 2,
            pop1init_str: "0~".to_string(),
            pop1init_len: 2,
            tr: 0.0,
            mig: 0.0,
            mutcap: 2,
        }
    }

    #[test]
    fn header_includes_gen_column_only_when_timestep_is_one() {
        let cfg = cfg();
        let mut writer = ReportWriter::new(Vec::new(), &cfg).unwrap();
        writer
            .record(
                1,
                0,
                &[
                    HostStat {
                        pop1: 0.0,
                        pop2: 10.0,
                        k1: -1.0,
                        k2: 0.0,
                    },
                    HostStat {
                        pop1: 0.0,
                        pop2: 10.0,
                        k1: -1.0,
                        k2: 0.0,
                    },
                ],
            )
            .unwrap();

        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let header_line = text.lines().nth(2).unwrap();
        assert!(header_line.starts_with("rep,gen,pop1.0,pop2.0,k1.0,k2.0"));
        assert!(text.contains("1,0,0,10,-1,0,0,10,-1,0"));
    }
}
