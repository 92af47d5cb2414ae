use anyhow::Result;
use gwho::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_ENV: &str = "GWHO_LOG";

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    cli.execute()
}
