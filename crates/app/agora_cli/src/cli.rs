use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "agora", version, about = "Agora identity and voting toolkit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the version
    Version,

    /// Print the nonce a wallet address must carry in its identity token
    Nonce {
        /// 0x-prefixed 20-byte address
        address: String,
    },

    /// Split an identity token into the parts sent on-chain
    Decode {
        /// Compact token (header.payload.signature)
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        token: Option<String>,

        /// Read the token from a file instead
        #[arg(long, short)]
        file: Option<PathBuf>,
    },

    /// Fetch the provider's signing keys and show which are missing on-chain
    Keys {
        /// Hex modulus already accepted on-chain (repeatable)
        #[arg(long = "accepted", value_name = "HEX")]
        accepted: Vec<String>,

        /// Key set URL (defaults to AGORA_JWKS_URL)
        #[arg(long)]
        url: Option<String>,
    },

    /// Print the resolved configuration with secrets masked
    Config,
}
