use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sceneforged-player")]
#[command(author, version, about = "Playback session tools for sceneforged streaming")]
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
    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Show the tracks of a media item and the tracks a session would pick
    Info {
        /// Media item ID
        #[arg(required = true)]
        media_id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show transcode progress and whether playback would be admitted
    Status {
        /// Media item ID
        #[arg(required = true)]
        media_id: String,

        /// Audio rendition to query
        #[arg(long, default_value = "0")]
        audio: usize,

        /// Seconds currently buffered ahead of the playhead
        #[arg(long, default_value = "0")]
        buffered: f64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display version information
    Version,
}
