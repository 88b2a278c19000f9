use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to a YAML config file. Defaults apply when omitted.
    #[clap(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the search service.
    Serve {
        /// Catalog JSON file.
        #[clap(long, default_value = "catalog.json")]
        catalog: PathBuf,

        /// Listen address, overriding the config file.
        #[clap(long)]
        addr: Option<String>,
    },

    /// Precompute feature vectors for every catalog item.
    Precompute {
        /// Catalog JSON file.
        #[clap(long, default_value = "catalog.json")]
        catalog: PathBuf,
    },

    /// Run one search from the command line.
    Search {
        /// Query image: local path or URL.
        image: String,

        /// Catalog JSON file.
        #[clap(long, default_value = "catalog.json")]
        catalog: PathBuf,

        /// Maximum number of results.
        #[clap(short, long)]
        limit: Option<usize>,

        /// Lower bound for the similarity threshold.
        #[clap(long)]
        floor: Option<f32>,
    },

    /// Manage configuration.
    Config {
        #[clap(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a config file populated with the current defaults.
    Init {
        #[clap(default_value = "lookalike.yaml")]
        path: PathBuf,
    },
}
