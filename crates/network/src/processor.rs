//! The late-processing tier: a dedicated thread draining a priority queue.
//!
//! The queue orders by message type value (lower first), so control-plane
//! traffic overtakes bulky content. VERSION and ACK never reach this tier;
//! the connection manager answers them inline.

use crate::inventory::InventoryTracker;
use pqledger_consensus::ConsensusHandle;
use pqledger_crypto::SchemeHandle;
use pqledger_storage::{AddressStore, BalanceStore, BlocksStore};
use pqledger_types::account::Account;
use pqledger_types::block::Block;
use pqledger_types::message::{
    InvItem, InvKind, Message, MessageRequest, Payload, SendMode,
};
use pqledger_types::proposal::ProposalPayload;
use pqledger_types::transaction::Transaction;
use pqledger_types::Digest;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use tracing::{debug, info, trace, warn};

/// One message awaiting late processing.
#[derive(Debug)]
pub struct QueueItem {
    pub peer: Digest,
    pub is_unl: bool,
    pub message: Message,
}

struct Entry {
    priority: u32,
    seq: u64,
    item: QueueItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap: invert so the lowest (priority, seq) pops
    // first, keeping per-type arrival order.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

/// The mutex-and-condvar guarded priority queue between the connection
/// manager and the processor thread.
pub struct ProcessorQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    wake: Condvar,
    run: AtomicBool,
    next_seq: AtomicU64,
}

impl Default for ProcessorQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorQueue {
    pub fn new() -> ProcessorQueue {
        ProcessorQueue {
            heap: Mutex::new(BinaryHeap::new()),
            wake: Condvar::new(),
            run: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn push(&self, item: QueueItem) {
        let entry = Entry {
            priority: item.message.message_type().priority(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            item,
        };
        let mut heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        heap.push(entry);
        drop(heap);
        self.wake.notify_one();
    }

    /// Block until an item is available or the queue is stopped.
    pub(crate) fn pop_blocking(&self) -> Option<QueueItem> {
        let mut heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if let Some(entry) = heap.pop() {
                return Some(entry.item);
            }
            if !self.run.load(Ordering::SeqCst) {
                return None;
            }
            heap = match self.wake.wait(heap) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Unblock the processor thread for shutdown. Pending items are
    /// discarded with the queue.
    pub fn stop(&self) {
        self.run.store(false, Ordering::SeqCst);
        self.wake.notify_all();
    }
}

/// Per-type handlers over storage, consensus, and the wallet.
pub struct MessageProcessor {
    queue: Arc<ProcessorQueue>,
    consensus: Arc<ConsensusHandle>,
    blocks: Arc<BlocksStore>,
    balances: Arc<BalanceStore>,
    addresses: Arc<AddressStore>,
    requests: tokio::sync::mpsc::Sender<MessageRequest>,
    scheme: SchemeHandle,
    inventory: Mutex<InventoryTracker>,
    unl_count: u32,
    /// Whether proposal traffic is processed at all (validators only).
    consensus_messages: AtomicBool,
}

impl MessageProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        queue: Arc<ProcessorQueue>,
        consensus: Arc<ConsensusHandle>,
        blocks: Arc<BlocksStore>,
        balances: Arc<BalanceStore>,
        addresses: Arc<AddressStore>,
        requests: tokio::sync::mpsc::Sender<MessageRequest>,
        scheme: SchemeHandle,
        unl_count: u32,
        consensus_messages: bool,
    ) -> std::io::Result<(Arc<MessageProcessor>, thread::JoinHandle<()>)> {
        let processor = Arc::new(MessageProcessor {
            queue,
            consensus,
            blocks,
            balances,
            addresses,
            requests,
            scheme,
            inventory: Mutex::new(InventoryTracker::new()),
            unl_count,
            consensus_messages: AtomicBool::new(consensus_messages),
        });
        let worker = Arc::clone(&processor);
        let handle = thread::Builder::new()
            .name("msg-processor".into())
            .spawn(move || worker.run())
            ?;
        Ok((processor, handle))
    }

    /// Toggle handling of consensus proposal traffic.
    pub fn set_consensus_messages(&self, enabled: bool) {
        self.consensus_messages.store(enabled, Ordering::SeqCst);
    }

    fn run(&self) {
        info!(target: "net", "message processor started");
        while let Some(item) = self.queue.pop_blocking() {
            self.process(item);
        }
        info!(target: "net", "message processor stopped");
    }

    fn send(&self, mode: SendMode, payload: Payload) {
        let request = MessageRequest {
            mode,
            message: Message::new(payload),
        };
        if self.requests.blocking_send(request).is_err() {
            warn!(target: "net", "network request channel closed");
        }
    }

    fn lock_inventory(&self) -> std::sync::MutexGuard<'_, InventoryTracker> {
        self.inventory.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn process(&self, item: QueueItem) {
        let peer = item.peer;
        match item.message.payload {
            Payload::Transaction(tx) => self.handle_transaction(tx, peer),
            Payload::Proposal(proposal) => self.handle_proposal(proposal),
            Payload::Block(block) => self.handle_block(block),
            Payload::Account(account) => self.handle_account(account, peer),
            Payload::Inventory(items) => self.handle_inventory(items, peer),
            Payload::GetData(items) => self.handle_getdata(items, peer),
            // The manager answers handshake traffic before it gets here.
            Payload::Version(_) | Payload::Ack => {}
        }
    }

    /// TRANSACTION: structural check, sender lookup, signature check, pool
    /// insert, then advertise.
    fn handle_transaction(&self, tx: Transaction, from: Digest) {
        if !tx.check_structure() {
            debug!(target: "net", "malformed transaction from {}", from.short());
            return;
        }
        let sender_balance = match self.balances.get(&tx.data.sender) {
            Ok(Some(balance)) => balance,
            Ok(None) => {
                debug!(target: "net", "transaction {} from unknown sender", tx.id.short());
                return;
            }
            Err(e) => {
                warn!(target: "net", "balance lookup failed: {e}");
                return;
            }
        };
        if tx
            .verify(self.scheme.as_ref(), &sender_balance.public_key)
            .is_err()
        {
            debug!(target: "net", "transaction {} failed signature verification", tx.id.short());
            return;
        }

        let tx_id = tx.id;
        self.lock_inventory().resolve_waiting(&tx_id);
        if self.consensus.add_transaction(Arc::new(tx)) {
            self.send(
                SendMode::Broadcast {
                    exclude: Some(from),
                },
                Payload::Inventory(vec![InvItem {
                    kind: InvKind::Tx,
                    id: tx_id,
                }]),
            );
        }
    }

    /// BLOCK_PROPOSAL: verify the issuer's signature against its stored
    /// public key, then hand to consensus.
    fn handle_proposal(&self, proposal: ProposalPayload) {
        if !self.consensus_messages.load(Ordering::SeqCst) {
            trace!(target: "net", "dropping proposal: consensus traffic disabled");
            return;
        }
        let issuer = match &proposal {
            ProposalPayload::Block(p) => p.issuer,
            ProposalPayload::TxSet(p) => p.issuer,
        };
        let issuer_key = match self.balances.get(&issuer) {
            Ok(Some(balance)) => balance.public_key,
            Ok(None) => {
                debug!(target: "net", "proposal from unknown issuer {}", issuer.short());
                return;
            }
            Err(e) => {
                warn!(target: "net", "issuer lookup failed: {e}");
                return;
            }
        };
        match proposal {
            ProposalPayload::Block(p) => {
                if !p.check() || p.verify(self.scheme.as_ref(), &issuer_key).is_err() {
                    debug!(target: "net", "discarding invalid block proposal from {}", issuer.short());
                    return;
                }
                self.consensus.notify_block_proposal(p);
            }
            ProposalPayload::TxSet(p) => {
                if !p.check() || p.verify(self.scheme.as_ref(), &issuer_key).is_err() {
                    debug!(target: "net", "discarding invalid set proposal from {}", issuer.short());
                    return;
                }
                self.consensus.notify_tx_set_proposal(p);
            }
        }
    }

    /// BLOCK: accept only what we asked for after inventory quorum.
    fn handle_block(&self, block: Block) {
        let block_id = match block.header.hash() {
            Ok(id) => id,
            Err(e) => {
                debug!(target: "net", "unhashable block: {e}");
                return;
            }
        };
        if !self.lock_inventory().take_requested(&block_id) {
            debug!(target: "net", "unsolicited block {}", block_id.short());
            return;
        }
        match self.consensus.execute_external_block(block) {
            Ok(id) => debug!(target: "net", "fetched block {} applied", id.short()),
            Err(e) => warn!(target: "net", "fetched block {} failed to apply: {e}", block_id.short()),
        }
    }

    /// ACCOUNT: persist unknown accounts and re-advertise them.
    fn handle_account(&self, account: Account, from: Digest) {
        let account_id = match account.account_id() {
            Ok(id) => id,
            Err(e) => {
                debug!(target: "net", "account with unusable key: {e}");
                return;
            }
        };
        let was_waiting = self.lock_inventory().resolve_waiting(&account_id);
        let known = match self.balances.get(&account_id) {
            Ok(known) => known.is_some(),
            Err(e) => {
                warn!(target: "net", "account lookup failed: {e}");
                return;
            }
        };
        if !was_waiting && known {
            return;
        }
        if let Err(e) = self.balances.put(&account_id, &account.balance) {
            warn!(target: "net", "account persist failed: {e}");
            return;
        }
        if let Err(e) = self
            .addresses
            .put(&account_id, &account.addresses.addresses)
        {
            warn!(target: "net", "address persist failed: {e}");
        }
        self.send(
            SendMode::Broadcast {
                exclude: Some(from),
            },
            Payload::Inventory(vec![InvItem {
                kind: InvKind::Account,
                id: account_id,
            }]),
        );
    }

    /// INVENTORY: request what we lack, forward what others may lack, and
    /// count block advertisements toward the fetch quorum.
    fn handle_inventory(&self, items: Vec<InvItem>, from: Digest) {
        let mut wanted = Vec::new();
        for item in items {
            match item.kind {
                // Forwarding is tied to first sight, so an advertisement
                // crosses each node at most once.
                InvKind::Tx => {
                    if !self.consensus.transaction_in_pool(&item.id)
                        && self.lock_inventory().begin_waiting(item.id)
                    {
                        wanted.push(item);
                        self.forward_inventory(item, from);
                    }
                }
                InvKind::Account => {
                    let known = matches!(self.balances.get(&item.id), Ok(Some(_)));
                    if !known && self.lock_inventory().begin_waiting(item.id) {
                        wanted.push(item);
                        self.forward_inventory(item, from);
                    }
                }
                InvKind::Block => {
                    // Block advertisements are not forwarded: every re-send
                    // would count into some peer's quorum.
                    let have = matches!(self.blocks.contains(&item.id), Ok(true));
                    if self
                        .lock_inventory()
                        .note_block_inventory(item.id, self.unl_count, have)
                    {
                        debug!(target: "net", "inventory quorum reached for block {}", item.id.short());
                        wanted.push(item);
                    }
                }
            }
        }
        if !wanted.is_empty() {
            self.send(SendMode::One(from), Payload::GetData(wanted));
        }
    }

    fn forward_inventory(&self, item: InvItem, from: Digest) {
        self.send(
            SendMode::Broadcast {
                exclude: Some(from),
            },
            Payload::Inventory(vec![item]),
        );
    }

    /// GETDATA: answer from the pool and the stores; unknown items are
    /// silently skipped.
    fn handle_getdata(&self, items: Vec<InvItem>, from: Digest) {
        for item in items {
            match item.kind {
                InvKind::Tx => {
                    if let Some(tx) = self.consensus.pool_transaction(&item.id) {
                        self.send(
                            SendMode::One(from),
                            Payload::Transaction(Transaction::clone(&tx)),
                        );
                    }
                }
                InvKind::Block => match self.blocks.get(&item.id) {
                    Ok(Some(block)) => self.send(SendMode::One(from), Payload::Block(block)),
                    Ok(None) => {}
                    Err(e) => warn!(target: "net", "block lookup failed: {e}"),
                },
                InvKind::Account => {
                    let balance = match self.balances.get(&item.id) {
                        Ok(Some(balance)) => balance,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(target: "net", "account lookup failed: {e}");
                            continue;
                        }
                    };
                    let addresses = self.addresses.get(&item.id).ok().flatten().unwrap_or_default();
                    self.send(
                        SendMode::One(from),
                        Payload::Account(Account {
                            balance,
                            addresses: pqledger_types::account::AccountAddresses { addresses },
                        }),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqledger_types::message::{NodeType, VersionPayload, PROTOCOL_VERSION};

    fn item(msg_type_payload: Payload, seq_tag: u8) -> QueueItem {
        QueueItem {
            peer: Digest::sha512_of(&[seq_tag]).unwrap(),
            is_unl: true,
            message: Message::new(msg_type_payload),
        }
    }

    #[test]
    fn queue_orders_by_priority_then_arrival() {
        let queue = ProcessorQueue::new();
        queue.push(item(Payload::Block(Block::genesis()), 1));
        queue.push(item(
            Payload::Inventory(vec![InvItem {
                kind: InvKind::Tx,
                id: Digest::sha512_of(b"x").unwrap(),
            }]),
            2,
        ));
        queue.push(item(
            Payload::Version(VersionPayload {
                version: PROTOCOL_VERSION,
                node_type: NodeType::Server,
                peer_id: Digest::sha512_of(b"p").unwrap(),
            }),
            3,
        ));
        queue.push(item(
            Payload::GetData(vec![InvItem {
                kind: InvKind::Block,
                id: Digest::sha512_of(b"y").unwrap(),
            }]),
            4,
        ));

        let order: Vec<_> = (0..4)
            .map(|_| queue.pop_blocking().unwrap().message.message_type())
            .collect();
        assert_eq!(
            order,
            vec![
                pqledger_types::message::MessageType::Version,
                pqledger_types::message::MessageType::Inventory,
                pqledger_types::message::MessageType::GetData,
                pqledger_types::message::MessageType::Block,
            ]
        );
    }

    #[test]
    fn same_priority_keeps_arrival_order() {
        let queue = ProcessorQueue::new();
        let a = Digest::sha512_of(b"a").unwrap();
        let b = Digest::sha512_of(b"b").unwrap();
        queue.push(QueueItem {
            peer: a,
            is_unl: false,
            message: Message::new(Payload::Ack),
        });
        queue.push(QueueItem {
            peer: b,
            is_unl: false,
            message: Message::new(Payload::Ack),
        });
        assert_eq!(queue.pop_blocking().unwrap().peer, a);
        assert_eq!(queue.pop_blocking().unwrap().peer, b);
    }

    #[test]
    fn stopped_queue_drains_to_none() {
        let queue = ProcessorQueue::new();
        queue.push(item(Payload::Ack, 1));
        queue.stop();
        // The queued item is still served, then the thread would exit.
        assert!(queue.pop_blocking().is_some());
        assert!(queue.pop_blocking().is_none());
    }
}
