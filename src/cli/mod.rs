use crate::config::Config;
use crate::webhook::SignatureVerifier;
use anyhow::{Context, Result};
use std::path::Path;

pub mod args;

pub use args::{Cli, CliCommand, SignCliArgs};

/// Load the config from an explicit path, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

pub fn handle_sign_command(args: SignCliArgs, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.video.api_secret.is_empty() {
        anyhow::bail!("No video API secret configured, cannot sign");
    }

    let body = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {:?}", args.file))?;
    let verifier = SignatureVerifier::new(&config.video.api_key, &config.video.api_secret);

    println!("{}", verifier.sign(&body));
    Ok(())
}
