//! Tools for parsing information encoded in a previous run's output, for the `Reproduce`
//! entry point

use std::io::{BufRead, BufReader, Lines, Read};

use anyhow::Result;
use thiserror::Error;

use crate::cfg::SimConfig;

use crate::io::{get_current_version_str, Metadata};

/// Get the `SimConfig` encoded in a previous output file back out
///
/// Fails if the previous output is from an incompatible version; in the future this may
/// change to allow backward compatibility (i.e. via SemVer).
pub fn extract_sim_config<R: Read>(source: R) -> Result<SimConfig> {
    Ok(extract_headers(source)?.sim_cfg)
}

/// Get the `Metadata` and `SimConfig` encoded in a previous file back out
fn extract_headers<R: Read>(source: R) -> Result<ExtractedHeaders<R>> {
    // BufReader is required for the `lines` iterator
    let reader = BufReader::with_capacity(HEADER_BUFFER_CAPACITY, source);
    let mut lines = reader.lines();

    // Strip the leading comment character before decoding each header line
    let metadata: Metadata = match lines.next() {
        Some(line) => serde_json::from_str(line?.trim_start_matches("# "))?,
        None => return Err(MetadataError::MissingHeaders.into()),
    };

    if metadata.version != get_current_version_str() {
        return Err(MetadataError::IncompatibleVersion {
            version: metadata.version,
        }
        .into());
    }

    let sim_cfg: SimConfig = match lines.next() {
        Some(line) => serde_json::from_str(line?.trim_start_matches("# "))?,
        None => return Err(MetadataError::MissingHeaders.into()),
    };

    Ok(ExtractedHeaders {
        metadata,
        sim_cfg,
        remainder: lines,
    })
}

/// Parts of the file after extracting headers
struct ExtractedHeaders<R: Read> {
    /// Metadata extracted from the file
    #[allow(dead_code)]
    metadata: Metadata,
    /// Simulation configuration extracted from the file
    sim_cfg: SimConfig,
    /// Remainder of the file, as a lines reader the underlying `BufReader` can be
    /// recovered from
    #[allow(dead_code)]
    remainder: Lines<BufReader<R>>,
}

/// Buffer capacity for reading the header
///
/// Set at 2 KB
const HEADER_BUFFER_CAPACITY: usize = 2 * (1 << 10);

/// An error originating from processing a previous output file for reproduction of results
#[derive(Error, Debug)]
enum MetadataError {
    /// Attempted to load metadata from an incompatible simulation version
    #[error("Input file is from an incompatible simulation version: {version}")]
    IncompatibleVersion {
        /// Version number of the incompatible file
        version: String,
    },
    /// Attempted to load metadata from a file missing this engine's output headers
    #[error("Input file is missing the necessary headers to extract simulation options from")]
    MissingHeaders,
}
