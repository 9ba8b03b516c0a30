//! The pqledger node binary.

use anyhow::Context;
use clap::Parser;
use pqledger_crypto::scheme_by_name;
use pqledger_node::{init_tracing, start};
use pqledger_wallet::config::NodeConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pqledger-node", about = "Permissioned post-quantum ledger node")]
struct Args {
    /// Path to the node configuration file.
    #[arg(short, long, default_value = "pqledger.json")]
    config: PathBuf,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Generate a key pair for the configured scheme, write it back to the
    /// configuration, and exit.
    #[arg(long)]
    generate_keys: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let args = Args::parse();

    if !args.config.exists() {
        NodeConfig::default()
            .save(&args.config)
            .with_context(|| format!("cannot write {}", args.config.display()))?;
        anyhow::bail!(
            "no configuration found; wrote a template to {}",
            args.config.display()
        );
    }

    let mut config = NodeConfig::load(&args.config)
        .with_context(|| format!("cannot read {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.listen_port = port;
    }

    if args.generate_keys {
        let scheme = scheme_by_name(&config.scheme)?;
        let (secret_key, public_key) = scheme.generate_keypair()?;
        config.secret_key = hex::encode(&secret_key);
        config.public_key = hex::encode(&public_key);
        config.save(&args.config)?;
        let wallet_id = pqledger_types::Digest::sha512_of(&public_key)?;
        info!(target: "node", "generated {} keys; node id {}", scheme.name(), wallet_id);
        return Ok(());
    }

    let node = start(config).await?;
    info!(target: "node", "node is running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}
