//! Parses command-line arguments for the keychain daemon.

use std::path::PathBuf;

use clap::{crate_version, Parser};

#[derive(Debug, Parser)]
#[clap(
    name = "keychaind",
    about = "Hierarchical-deterministic keychain service",
    version = crate_version!()
)]
pub(crate) struct Cli {
    #[clap(
        long,
        short = 'c',
        help = "The file containing the configuration for the daemon",
        default_value = "keychaind.toml"
    )]
    pub config: PathBuf,
}
