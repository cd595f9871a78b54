use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "callpilot")]
#[command(about = "Meeting lifecycle service for AI video-call agents", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: <config_dir>/callpilot/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the webhook server and background job runner (default)
    Serve,
    /// Print version information
    Version,
    /// Print the webhook signature for a request body
    Sign(SignCliArgs),
}

#[derive(ClapArgs, Debug)]
pub struct SignCliArgs {
    /// File containing the raw request body
    pub file: PathBuf,
}
