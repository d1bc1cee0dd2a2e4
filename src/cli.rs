use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate api docs in markdown format
    #[cfg(feature = "markdown-docs")]
    #[clap(hide = true)]
    MarkdownDocs {},

    /// Group tabs read as a JSON array and print the result.
    Group {
        /// JSON file with tabs, reads stdin when omitted
        #[clap(short, long)]
        input: Option<PathBuf>,

        /// Similarity threshold between 0.0 and 1.0 (exclusive)
        #[clap(short, long)]
        threshold: Option<f32>,

        /// Group by domain only, without loading the model
        #[clap(long, default_value = "false")]
        domain_only: bool,
    },

    /// Initialize the engine and print its status.
    Status {},

    /// Start tabgroup as a service.
    Daemon {
        /// Address to listen on, overrides daemon.listen
        #[clap(short, long)]
        listen: Option<String>,
    },
}
