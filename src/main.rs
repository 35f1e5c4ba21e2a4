//! Verge CLI - Main entry point.

use clap::Parser;
use std::path::PathBuf;
use verge::config::VergeConfig;

/// Edge delivery cache for versioned origin content.
#[derive(Parser, Debug)]
#[command(name = "verge", version, about)]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the development preset (localhost origin, relaxed secret).
    #[arg(long)]
    dev: bool,

    /// Log level when none is configured.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> verge::Result<()> {
    let cli = Cli::parse();

    let config = match (&cli.config, cli.dev) {
        (Some(path), _) => VergeConfig::from_file(path)?,
        (None, true) => VergeConfig::development(),
        (None, false) => {
            eprintln!("either --config <file> or --dev is required");
            std::process::exit(2);
        }
    };

    let mut config = config.apply_env()?;
    if config.observability.log_level.is_empty() {
        config.observability.log_level = cli.log_level;
    }

    verge::run(config).await
}
