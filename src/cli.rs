use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::LogLevel;
use crate::player::Category;

#[derive(Debug, Parser)]
#[command(
    name = "anistream",
    version,
    about = "Resilient episode playback: source ranking, failover, skip times and progress"
)]
pub(crate) struct Cli {
    #[arg(long, global = true, value_enum, default_value = "warn", help = "Console log level (RUST_LOG wins when set)")]
    pub(crate) log_level: LogLevel,
    #[arg(long, global = true, help = "Alternate config file")]
    pub(crate) config: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    #[command(about = "Print the ranked source list of an episode file")]
    Sources {
        episode: PathBuf,
        #[arg(long, value_enum, default_value = "sub")]
        category: Category,
    },
    #[command(about = "Fetch skip intervals for a content id and episode")]
    Skip {
        id: String,
        episode: String,
        #[arg(long)]
        duration: f64,
    },
    #[command(about = "Play an episode headlessly until one source works or all fail")]
    Probe {
        episode: PathBuf,
        #[arg(long, value_enum, default_value = "sub")]
        category: Category,
        #[arg(long, help = "Resume position in seconds (defaults to the stored checkpoint)")]
        resume: Option<f64>,
        #[arg(long, default_value = "auto", help = "off, auto or a language code")]
        subtitles: String,
        #[arg(long, help = "Write checkpoints to the configured remote store")]
        remote: bool,
        #[arg(long, default_value_t = 20, help = "Seconds without any event before giving up")]
        timeout: u64,
    },
    #[command(about = "List stored checkpoints")]
    Progress,
}
