use std::path::PathBuf;

use clap::Parser;

/// Shrinks a cloud Kubernetes cluster to a minimal footprint on a declared schedule
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file that contains the provider, schedule store and port configuration.
    #[arg(short, long)]
    pub config_file: PathBuf,
}
