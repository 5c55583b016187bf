use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[clap(about = "Orion-style broker agent")]
pub struct Cli {
    /// path to the TOML config file.
    #[clap(short, long, default_value = "broker.toml")]
    pub config: PathBuf,
    /// hex-encoded operator private key; custody never leaves this
    /// process, never delegated to the gateway.
    #[clap(long, env = "BROKER_PRIVATE_KEY")]
    pub private_key: String,
}
