//! Types to handle simulation output and retrieval of encoded metadata and configuration
//! settings

use serde::{Deserialize, Serialize};

mod input_parsing;
mod output;

pub use input_parsing::extract_sim_config;
pub use output::ReportWriter;

/// Type of output a file's header describes
///
/// Kept as an enum (rather than a bare marker) since a reader decoding an old output file
/// should reject an output mode it doesn't recognize instead of silently misparsing it.
#[derive(Serialize, Deserialize, Copy, Clone)]
enum OutputMode {
    /// Per-host, per-row population and mutation load summary, as CSV
    Report,
}

/// Information used to mark output files as having been produced by a specific version of
/// this engine
#[derive(Serialize, Deserialize)]
struct Metadata {
    name: String,
    version: String,
    description: String,
    output_mode: OutputMode,
}

impl Metadata {
    /// Construct a new `Metadata` instance based on the current version of the code and
    /// the desired `OutputMode`
    fn new(output_mode: OutputMode) -> Self {
        Self {
            name: "virsim".to_string(),
            version: get_current_version_str().to_string(),
            description: "stochastic metapopulation evolution engine for a segmented viral genome"
                .to_string(),
            output_mode,
        }
    }
}

/// Get the current version of this engine as defined in Cargo.toml
fn get_current_version_str() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
