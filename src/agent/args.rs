use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(version, about)]
pub struct AgentArgs {
    /// Data directory for the store, logs and `config.toml`.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Explicit configuration file. Must exist when given.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Mirrors the log to stdout.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
}
