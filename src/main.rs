use anyhow::Result;
use callpilot::{
    app,
    cli::{handle_sign_command, Cli, CliCommand},
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("callpilot {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Sign(args)) => {
            handle_sign_command(args, cli.config.as_deref())?;
            return Ok(());
        }
        Some(CliCommand::Serve) | None => {}
    }

    app::run_service(cli.config.as_deref()).await
}
