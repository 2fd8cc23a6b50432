//! Output tools for the simulation engine

use std::io::Write;

use anyhow::Result;

use crate::cfg::SimConfig;

use crate::io::{Metadata, OutputMode};

mod outputter_impls;

pub use outputter_impls::ReportWriter;

/// Output `Metadata` and `SimConfig` into a header using the provided `writer`
///
/// Allows an optional prefix for header lines (e.g. a comment character for CSV output).
fn initialize_output<W: Write>(
    writer: &mut W,
    sim_cfg: &SimConfig,
    output_mode: OutputMode,
    header_prefix: &'static str,
) -> Result<()> {
    write!(writer, "{}", header_prefix)?;
    let metadata = Metadata::new(output_mode);
    serde_json::to_writer(writer.by_ref(), &metadata)?;
    writeln!(writer)?;

    write!(writer, "{}", header_prefix)?;
    serde_json::to_writer(writer.by_ref(), sim_cfg)?;
    writeln!(writer)?;

    Ok(())
}

/// Manually moving onto the next record in the `csv` crate requires writing an empty record
const EMPTY_CSV_RECORD: [&[u8]; 0] = [];

/// Buffer capacity to use for the CSV writer
///
/// Set at 128 KB
const CSV_BUFFER_CAPACITY: usize = 128 * (1 << 10);

/// Initialize a `writer` as described in [`initialize_output`] and get a `csv::Writer` over
/// the underlying `writer`
fn initialize_output_as_csv<W: Write>(
    mut writer: W,
    sim_cfg: &SimConfig,
    output_mode: OutputMode,
) -> Result<csv::Writer<W>> {
    initialize_output(&mut writer, sim_cfg, output_mode, "# ")?;

    Ok(csv::WriterBuilder::new()
        .buffer_capacity(CSV_BUFFER_CAPACITY)
        .from_writer(writer))
}
