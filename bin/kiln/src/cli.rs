use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kiln_pipeline::{Backoff, ContractFilter};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(
    author,
    version,
    about = "Compile, link and deploy smart contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "KILN_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// The project root. Sources, build output and `Kiln.toml` are resolved against it.
    #[arg(short, long, env = "KILN_PROJECT_DIR", default_value = ".")]
    pub project: PathBuf,

    /// Path to a configuration file to use instead of `<project>/Kiln.toml`.
    #[arg(long, alias = "conf", env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile project contracts, storing their output in `<build_dir>/contracts.json`.
    ///
    /// Call bare to compile all contracts, or pass contract names or file paths
    /// to restrict the run. A file path and a contract name separated by a
    /// colon (`path/to/File.sol:Name`) selects one contract of one file.
    Compile {
        /// Contract filters.
        contracts: Vec<ContractFilter>,
    },

    /// Deploy the compiled contracts, libraries first.
    Deploy {
        /// The JSON-RPC endpoint of the node.
        #[arg(long, env = "KILN_RPC_URL")]
        rpc_url: Option<url::Url>,

        /// Overall deadline for each contract to be confirmed, in seconds.
        #[arg(long, env = "KILN_CONFIRMATION_TIMEOUT")]
        timeout: Option<u64>,

        /// How the delay between receipt polls evolves.
        #[arg(long, env = "KILN_BACKOFF")]
        backoff: Option<Backoff>,
    },

    /// Print the version of the configured compiler.
    SolcVersion,

    /// Write a default `Kiln.toml` into the project.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}
