use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tsforged")]
#[command(author, version, about = "MPEG-TS to fragmented MP4 transmuxer")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transmux a transport stream into fMP4 init and media segments
    Transmux {
        /// URLs or file paths, played back to back as segments of one source
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output directory (defaults to [output] dir)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Segment durations in milliseconds, comma separated
        #[arg(long, value_delimiter = ',')]
        durations: Vec<u64>,

        /// Treat the source as live
        #[arg(long)]
        live: bool,
    },

    /// Probe a transport stream and display its media info
    Probe {
        /// URL or file path
        #[arg(required = true)]
        input: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
