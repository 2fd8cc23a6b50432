use clap::Parser;

use virsim_cli::{run_cli_config, CliConfig};

/// Entry point for the "virsim" command-line executable
fn main() {
    let cfg = CliConfig::parse();
    run_cli_config(cfg);
}
