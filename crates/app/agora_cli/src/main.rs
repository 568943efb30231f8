// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::io::{self, Write};

use agora_core::config::AgoraConfig;
use clap::Parser;
use cli::{Cli, Commands};

mod cli;
mod commands;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    logging::init()?;

    let args = Cli::parse();
    let mut out = io::stdout();

    match &args.command {
        Commands::Version => {
            writeln!(out, "{} {}", env!("CARGO_PKG_NAME"), agora_core::version())?;
        }
        Commands::Nonce { address } => commands::nonce(&mut out, address)?,
        Commands::Decode { token, file } => {
            commands::decode(&mut out, token.as_deref(), file.as_deref())?
        }
        Commands::Keys { accepted, url } => commands::keys(&mut out, accepted, url.as_deref())?,
        Commands::Config => commands::config(&mut out, &AgoraConfig::from_env()?)?,
    }

    Ok(())
}
