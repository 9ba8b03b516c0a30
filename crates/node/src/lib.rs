#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! Node assembly: configuration, stores, genesis seeding, and the wiring
//! between the consensus engine, the message processor, and the connection
//! manager.

use anyhow::{bail, Context};
use pqledger_consensus::{ConsensusConfig, ConsensusHandle};
use pqledger_crypto::scheme_by_name;
use pqledger_network::{run_network, MessageProcessor, NetworkConfig, ProcessorQueue};
use pqledger_storage::{AddressStore, BalanceStore, BlocksStore};
use pqledger_types::account::AccountBalance;
use pqledger_types::block::BlockHeader;
use pqledger_types::message::{
    ConnectionRequest, Message, MessageRequest, NodeType, Payload, SendMode,
};
use pqledger_types::transaction::Transaction;
use pqledger_types::Digest;
use pqledger_wallet::config::NodeConfig;
use pqledger_wallet::{TxRecord, Wallet};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Initialize the global tracing subscriber.
pub fn init_tracing() -> Result<(), anyhow::Error> {
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// The operator-facing surface. An external console maps its commands onto
/// these calls; nothing here blocks on consensus.
pub struct NodeHandle {
    wallet: Arc<Mutex<Wallet>>,
    scheme: pqledger_crypto::SchemeHandle,
    consensus: Arc<ConsensusHandle>,
    blocks: Arc<BlocksStore>,
    balances: Arc<BalanceStore>,
    requests: mpsc::Sender<MessageRequest>,
}

impl NodeHandle {
    /// Create, pool, and broadcast a transaction from the local wallet.
    pub fn create_transaction(&self, receiver: Digest, amount: u32) -> anyhow::Result<Digest> {
        let tx = {
            let mut wallet = self
                .wallet
                .lock()
                .map_err(|_| anyhow::anyhow!("wallet lock poisoned"))?;
            wallet.create_transaction(&self.scheme, receiver, amount)?
        };
        let tx_id = tx.id;
        self.consensus.add_transaction(tx.clone());
        let request = MessageRequest {
            mode: SendMode::Broadcast { exclude: None },
            message: Message::new(Payload::Transaction(Transaction::clone(&tx))),
        };
        if self.requests.try_send(request).is_err() {
            warn!(target: "node", "transaction {} created but not broadcast", tx_id.short());
        }
        Ok(tx_id)
    }

    pub fn wallet_id(&self) -> Digest {
        self.wallet
            .lock()
            .map(|w| w.wallet_id())
            .unwrap_or(Digest::ZERO)
    }

    pub fn wallet_records(&self) -> Vec<(Digest, TxRecord)> {
        self.wallet
            .lock()
            .map(|w| w.records().iter().map(|(id, r)| (*id, *r)).collect())
            .unwrap_or_default()
    }

    pub fn block_headers(&self) -> anyhow::Result<Vec<(Digest, BlockHeader)>> {
        Ok(self.blocks.headers()?)
    }

    pub fn block_transactions(&self, block_id: &Digest) -> anyhow::Result<Vec<Digest>> {
        match self.blocks.get(block_id)? {
            Some(block) => Ok(block.body.transactions.iter().map(|t| t.0.id).collect()),
            None => bail!("block {} is not stored", block_id.short()),
        }
    }

    pub fn accounts(&self) -> anyhow::Result<Vec<(Digest, AccountBalance)>> {
        Ok(self.balances.all()?)
    }

    pub fn chain_dump(&self) -> String {
        self.consensus.chain_dump()
    }
}

/// A running node and the means to stop it.
pub struct Node {
    pub handle: NodeHandle,
    consensus: Arc<ConsensusHandle>,
    queue: Arc<ProcessorQueue>,
    processor_thread: Option<std::thread::JoinHandle<()>>,
    network_task: tokio::task::JoinHandle<Result<(), pqledger_types::error::NetworkError>>,
    shutdown: watch::Sender<bool>,
}

impl Node {
    /// Stop every long-running role and join it.
    pub async fn shutdown(mut self) {
        info!(target: "node", "shutting down");
        let _ = self.shutdown.send(true);
        self.consensus.shutdown();
        self.queue.stop();
        if let Some(thread) = self.processor_thread.take() {
            let _ = thread.join();
        }
        match self.network_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target: "node", "network task ended with error: {e}"),
            Err(e) => warn!(target: "node", "network task panicked: {e}"),
        }
        info!(target: "node", "shutdown complete");
    }
}

fn seed_genesis(
    config: &NodeConfig,
    balances: &BalanceStore,
    addresses: &AddressStore,
) -> anyhow::Result<()> {
    if !balances.is_empty()? {
        return Ok(());
    }
    info!(target: "node", "seeding {} genesis accounts", config.genesis_accounts.len());
    for account in &config.genesis_accounts {
        let public_key = hex::decode(account.public_key.trim())
            .context("genesis account public key is not valid hex")?;
        let balance = AccountBalance {
            public_key,
            balance: account.balance,
            tx_sequence: 0,
        };
        let id = balance
            .account_id()
            .context("genesis account key does not hash")?;
        balances.put(&id, &balance)?;
        if !account.addresses.is_empty() {
            addresses.put(&id, &account.addresses)?;
        }
    }
    Ok(())
}

/// Assemble and start every role of the node.
pub async fn start(config: NodeConfig) -> anyhow::Result<Node> {
    let scheme = scheme_by_name(&config.scheme)?;
    info!(target: "node", "signature scheme: {}", scheme.name());

    if !config.has_keys() {
        bail!("configuration carries no key pair; run with --generate-keys first");
    }
    let secret_key = config.secret_key_bytes()?;
    let public_key = config.public_key_bytes()?;

    let validator = match config.node_type.as_str() {
        "validator" => true,
        "server" => false,
        other => bail!("unknown node type: {other}"),
    };
    let node_type = if validator {
        NodeType::Validator
    } else {
        NodeType::Server
    };

    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create data directory {}", config.data_dir.display()))?;
    let blocks = Arc::new(BlocksStore::open(config.data_dir.join("blocks.redb"))?);
    let balances = Arc::new(BalanceStore::open(config.data_dir.join("balances.redb"))?);
    let addresses = Arc::new(AddressStore::open(config.data_dir.join("addresses.redb"))?);

    seed_genesis(&config, &balances, &addresses)?;
    for peer in &config.unl {
        if !peer.addresses.is_empty() {
            addresses.put(&peer.id, &peer.addresses)?;
        }
    }

    let unl_ids = config.unl_ids();
    let mut wallet = Wallet::new(
        secret_key,
        public_key,
        config.addresses.clone(),
        unl_ids.clone(),
    )?;
    let local_id = wallet.wallet_id();
    if let Some(own) = balances.get(&local_id)? {
        wallet.resume_sequence(own.tx_sequence);
    } else {
        warn!(target: "node", "local account {} is not in the seeded state", local_id.short());
    }
    let wallet = Arc::new(Mutex::new(wallet));
    info!(target: "node", "local node id {}", local_id.short());

    let (message_requests_tx, message_requests_rx) = mpsc::channel::<MessageRequest>(1024);
    let (connection_requests_tx, connection_requests_rx) = mpsc::channel::<ConnectionRequest>(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consensus = ConsensusHandle::spawn(
        ConsensusConfig {
            local_id,
            unl: unl_ids.clone(),
            validator,
        },
        scheme.clone(),
        Arc::clone(&wallet),
        Arc::clone(&blocks),
        Arc::clone(&balances),
        message_requests_tx.clone(),
    )?;

    let queue = Arc::new(ProcessorQueue::new());
    let (_processor, processor_thread) = MessageProcessor::spawn(
        Arc::clone(&queue),
        Arc::clone(&consensus),
        Arc::clone(&blocks),
        Arc::clone(&balances),
        Arc::clone(&addresses),
        message_requests_tx.clone(),
        scheme.clone(),
        unl_ids.len() as u32,
        validator,
    )?;

    let network_config = NetworkConfig {
        listen_port: config.listen_port,
        local_id,
        node_type,
        unl: unl_ids.iter().copied().collect::<HashSet<_>>(),
        bootstrap_addresses: config
            .unl
            .iter()
            .map(|p| (p.id, p.addresses.clone()))
            .collect::<HashMap<_, _>>(),
    };
    let network_task = tokio::spawn(run_network(
        network_config,
        Arc::clone(&addresses),
        Arc::clone(&queue),
        message_requests_rx,
        connection_requests_rx,
        shutdown_rx,
    ));

    // Bootstrap: dial every UNL peer; retries are operator-driven.
    for peer in unl_ids {
        if connection_requests_tx
            .send(ConnectionRequest { peer, unl: true })
            .await
            .is_err()
        {
            warn!(target: "net", "connection request queue closed during bootstrap");
            break;
        }
    }

    Ok(Node {
        handle: NodeHandle {
            wallet,
            scheme,
            consensus: Arc::clone(&consensus),
            blocks,
            balances,
            requests: message_requests_tx,
        },
        consensus,
        queue,
        processor_thread: Some(processor_thread),
        network_task,
        shutdown: shutdown_tx,
    })
}
