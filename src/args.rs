//! Command line arguments for the grid engine autoscaler daemon
use std::path::PathBuf;

use clap::Parser;

/// The autoscaler daemon's command line arguments
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct Args {
    /// The path to a YAML file overriding the cloud API connection settings
    #[clap(short, long, default_value = "config.yaml")]
    pub config: PathBuf,
    /// Print every supported CP_CAP_* parameter and exit
    #[clap(long)]
    pub list_params: bool,
}
