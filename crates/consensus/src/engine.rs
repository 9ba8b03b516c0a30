//! The round-based consensus engine and its driver thread.
//!
//! One mutex guards the whole engine: the transaction pool, the chain tree,
//! and the state of the open round. The driver thread wakes whenever the
//! pool is non-empty, runs one `timer_entry`, and sleeps a second; external
//! inputs (inbound transactions and proposals) take the same mutex briefly
//! from the processor thread.

use crate::chain::ChainTree;
use crate::dispute::DisputeTx;
use crate::executor;
use pqledger_crypto::SchemeHandle;
use pqledger_storage::{BalanceStore, BlocksStore};
use pqledger_types::block::{Block, BlockBody, BlockHeader, BLOCK_VERSION};
use pqledger_types::error::ConsensusError;
use pqledger_types::merkle;
use pqledger_types::message::{Message, MessageRequest, Payload, SendMode};
use pqledger_types::proposal::{BlockProposal, ProposalPayload, TxSetProposal};
use pqledger_types::transaction::{OrderedTx, TransactionPool, TransactionSet, TxPtr};
use pqledger_types::Digest;
use pqledger_wallet::Wallet;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace, warn};

/// Positions and acquired sets older than this are stale.
const PROPOSAL_FRESHNESS_SECS: i64 = 20;

/// The pool idling longer than this resets the round.
const IDLE_RESET: Duration = Duration::from_secs(3);

/// Initial estimate for the previous round duration.
const INITIAL_ROUND_TIME: Duration = Duration::from_secs(15);

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Establish,
    Accepted,
}

/// A peer's latest transaction-set position.
struct PeerPosition {
    set_id: Digest,
    time: i64,
    seq: u32,
}

/// A resolved transaction-set body.
struct AcquiredSet {
    set: TransactionSet,
    time: i64,
}

/// Everything a single round accumulates.
struct RoundResult {
    txns: TransactionSet,
    proposal: TxSetProposal,
    disputes: HashMap<Digest, DisputeTx>,
    /// Set ids already compared against our position.
    compares: HashSet<Digest>,
    round_time: Duration,
}

impl RoundResult {
    fn new() -> RoundResult {
        RoundResult {
            txns: TransactionSet::new(),
            proposal: TxSetProposal::default(),
            disputes: HashMap::new(),
            compares: HashSet::new(),
            round_time: Duration::ZERO,
        }
    }

    fn reset(&mut self) {
        self.txns.clear();
        self.proposal = TxSetProposal::default();
        self.disputes.clear();
        self.compares.clear();
        self.round_time = Duration::ZERO;
    }
}

/// Collaborators the engine calls out to. Held outside the state mutex.
struct Ctx {
    local_id: Digest,
    unl_count: u32,
    scheme: SchemeHandle,
    wallet: Arc<Mutex<Wallet>>,
    blocks: Arc<BlocksStore>,
    balances: Arc<BalanceStore>,
    requests: tokio::sync::mpsc::Sender<MessageRequest>,
}

impl Ctx {
    fn broadcast(&self, payload: Payload) {
        let request = MessageRequest {
            mode: SendMode::Broadcast { exclude: None },
            message: Message::new(payload),
        };
        if self.requests.blocking_send(request).is_err() {
            warn!(target: "consensus", "network request channel closed");
        }
    }

    fn secret_key(&self) -> Vec<u8> {
        self.wallet
            .lock()
            .map(|w| w.secret_key().to_vec())
            .unwrap_or_default()
    }
}

struct Engine {
    pool: TransactionPool,
    chain: ChainTree,
    phase: Phase,
    /// Header and id of the block this round builds on (the preferred
    /// block as of the last reset).
    prev_header: BlockHeader,
    prev_id: Digest,
    /// The block this node accepted for the working sequence, kept until
    /// quorum lets it execute.
    curr_block: Option<Block>,
    curr_id: Digest,
    result: RoundResult,
    peer_positions: HashMap<Digest, PeerPosition>,
    acquired_sets: HashMap<Digest, AcquiredSet>,
    converge: f64,
    prev_round_time: Duration,
    open_time: Instant,
    close_time: Instant,
}

impl Engine {
    fn new(unl_count: u32) -> Result<Engine, ConsensusError> {
        let chain = ChainTree::new(unl_count)?;
        let prev_header = chain.valid_header();
        let prev_id = chain.valid_id();
        Ok(Engine {
            pool: TransactionPool::new(),
            chain,
            phase: Phase::Open,
            prev_header,
            prev_id,
            curr_block: None,
            curr_id: Digest::ZERO,
            result: RoundResult::new(),
            peer_positions: HashMap::new(),
            acquired_sets: HashMap::new(),
            converge: 0.0,
            prev_round_time: INITIAL_ROUND_TIME,
            open_time: Instant::now(),
            close_time: Instant::now(),
        })
    }

    /// The height the open round is deciding.
    fn working_sequence(&self) -> u32 {
        match &self.curr_block {
            Some(block) => block.header.sequence,
            None => self.prev_header.sequence + 1,
        }
    }

    fn begin_round(&mut self) {
        self.phase = Phase::Open;
        self.result.reset();
        self.converge = 0.0;
        self.open_time = Instant::now();
        self.peer_positions.clear();
        self.acquired_sets.clear();
        trace!(target: "consensus", "round restarted on {}", self.prev_id.short());
    }

    fn timer_entry(&mut self, ctx: &Ctx) {
        if self.phase == Phase::Accepted {
            return;
        }

        let (preferred_id, preferred_header) = self.chain.preferred();
        if preferred_id != self.prev_id {
            self.prev_id = preferred_id;
            self.prev_header = preferred_header;
            self.begin_round();
        }
        trace!(target: "consensus",
            "preferred block {} at sequence {}",
            preferred_id.short(), self.prev_header.sequence);

        match self.phase {
            Phase::Open => {
                if self.open_time.elapsed() >= self.prev_round_time / 2 {
                    self.phase = Phase::Establish;
                    self.close_block(ctx);
                }
            }
            Phase::Establish => {
                self.result.round_time = self.close_time.elapsed();
                let floor = self.prev_round_time.max(Duration::from_secs(5));
                self.converge = self.result.round_time.as_secs_f64() / floor.as_secs_f64();
                self.update_proposals(ctx);
                if self.have_consensus(ctx) {
                    self.phase = Phase::Accepted;
                    self.on_accept(ctx);
                }
            }
            Phase::Accepted => {}
        }
    }

    /// Snapshot the pool into this round's position, broadcast it, and open
    /// disputes against every position already observed.
    fn close_block(&mut self, ctx: &Ctx) {
        let txns: TransactionSet = self
            .pool
            .values()
            .cloned()
            .map(OrderedTx)
            .collect();
        let set_id = match merkle::tx_set_root(&txns) {
            Ok(root) => root,
            Err(e) => {
                error!(target: "consensus", "failed to hash the closed set: {e}");
                return;
            }
        };
        let now = unix_now();
        self.result.txns = txns.clone();
        self.result.disputes.clear();
        self.result.compares.clear();

        self.result.proposal = TxSetProposal {
            seq: 0,
            timestamp: now,
            issuer: ctx.local_id,
            set_id,
            previous_block: self.prev_id,
            signature: Vec::new(),
            body: BlockBody {
                transactions: txns.clone(),
            },
        };
        self.share_position(ctx);
        self.close_time = Instant::now();

        self.acquired_sets
            .insert(set_id, AcquiredSet { set: txns, time: now });

        let known: Vec<Digest> = self
            .peer_positions
            .values()
            .map(|pos| pos.set_id)
            .filter(|id| self.acquired_sets.contains_key(id))
            .collect();
        for peer_set in known {
            self.create_disputes(peer_set);
        }
        debug!(target: "consensus",
            "closed set {} at sequence {}",
            set_id.short(), self.working_sequence());
    }

    /// Sign and broadcast the current position.
    fn share_position(&mut self, ctx: &Ctx) {
        let secret_key = ctx.secret_key();
        if let Err(e) = self
            .result
            .proposal
            .sign(ctx.scheme.as_ref(), &secret_key)
        {
            error!(target: "consensus", "failed to sign position: {e}");
            return;
        }
        ctx.broadcast(Payload::Proposal(ProposalPayload::TxSet(
            self.result.proposal.clone(),
        )));
    }

    /// Handle a peer's transaction-set position.
    fn got_tx_set(&mut self, prop: TxSetProposal) {
        if self.phase == Phase::Accepted {
            return;
        }
        if prop.previous_block != self.prev_id {
            return;
        }
        let peer = prop.issuer;
        if let Some(pos) = self.peer_positions.get(&peer) {
            if prop.seq <= pos.seq {
                return;
            }
        }

        let set_id = prop.set_id;
        self.peer_positions.insert(
            peer,
            PeerPosition {
                set_id,
                time: prop.timestamp,
                seq: prop.seq,
            },
        );
        debug!(target: "consensus",
            "position {} from peer {}", set_id.short(), peer.short());

        if let Some(existing) = self.acquired_sets.get_mut(&set_id) {
            existing.time = prop.timestamp;
            return;
        }
        // The carried body must actually hash to the advertised id.
        match merkle::tx_set_root(&prop.body.transactions) {
            Ok(root) if root == set_id => {}
            Ok(_) => {
                warn!(target: "consensus",
                    "peer {} advertised a set that does not match its body", peer.short());
                return;
            }
            Err(e) => {
                warn!(target: "consensus", "failed to hash peer set: {e}");
                return;
            }
        }
        self.acquired_sets.insert(
            set_id,
            AcquiredSet {
                set: prop.body.transactions,
                time: prop.timestamp,
            },
        );

        if self.result.proposal.set_id.is_zero() {
            trace!(target: "consensus", "no local position yet; disputes deferred");
            return;
        }
        let holders: Vec<Digest> = self
            .peer_positions
            .iter()
            .filter(|(_, pos)| pos.set_id == set_id)
            .map(|(peer, _)| *peer)
            .collect();
        for holder in holders {
            self.update_disputes(holder, set_id);
        }
    }

    /// Open disputes for every transaction differing between our position
    /// and `set_id`, seeding them with each peer's current vote.
    fn create_disputes(&mut self, set_id: Digest) {
        if !self.result.compares.insert(set_id) {
            return;
        }
        if set_id == self.result.proposal.set_id {
            return;
        }
        let diff: Vec<TxPtr> = match self.acquired_sets.get(&set_id) {
            Some(acquired) => self
                .result
                .txns
                .symmetric_difference(&acquired.set)
                .map(|t| t.0.clone())
                .collect(),
            None => return,
        };
        for tx in diff {
            if self.result.disputes.contains_key(&tx.id) {
                continue;
            }
            let ours = self.result.txns.contains(&OrderedTx(tx.clone()));
            let mut dispute = DisputeTx::new(tx.clone(), ours);
            for (peer, pos) in &self.peer_positions {
                if let Some(peer_set) = self.acquired_sets.get(&pos.set_id) {
                    dispute.set_vote(*peer, peer_set.set.contains(&OrderedTx(tx.clone())));
                }
            }
            trace!(target: "consensus", "disputed transaction {}", tx.id.short());
            self.result.disputes.insert(tx.id, dispute);
        }
    }

    /// Refresh every dispute with `peer`'s vote as implied by `set_id`.
    fn update_disputes(&mut self, peer: Digest, set_id: Digest) {
        if !self.result.compares.contains(&set_id) {
            self.create_disputes(set_id);
        }
        let Some(acquired) = self.acquired_sets.get(&set_id) else {
            return;
        };
        for dispute in self.result.disputes.values_mut() {
            let vote = acquired.set.contains(&OrderedTx(dispute.tx().clone()));
            dispute.set_vote(peer, vote);
        }
    }

    /// Expire stale positions, apply flipped dispute votes, and re-propose
    /// when our set changed.
    fn update_proposals(&mut self, ctx: &Ctx) {
        let now = unix_now();

        let stale: Vec<Digest> = self
            .peer_positions
            .iter()
            .filter(|(_, pos)| now - pos.time >= PROPOSAL_FRESHNESS_SECS)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in stale {
            debug!(target: "consensus", "dropping stale position of {}", peer.short());
            for dispute in self.result.disputes.values_mut() {
                dispute.unvote(&peer);
            }
            self.peer_positions.remove(&peer);
        }
        self.acquired_sets
            .retain(|_, set| now - set.time < PROPOSAL_FRESHNESS_SECS);

        let mut updated = self.result.txns.clone();
        for dispute in self.result.disputes.values_mut() {
            if dispute.update_vote(self.converge) {
                if dispute.our_vote() {
                    updated.insert(OrderedTx(dispute.tx().clone()));
                } else {
                    updated.remove(&OrderedTx(dispute.tx().clone()));
                }
            }
        }
        if updated == self.result.txns {
            return;
        }

        self.result.txns = updated.clone();
        let set_id = match merkle::tx_set_root(&updated) {
            Ok(root) => root,
            Err(e) => {
                error!(target: "consensus", "failed to hash the updated set: {e}");
                return;
            }
        };
        self.result.proposal.seq += 1;
        self.result.proposal.timestamp = now;
        self.result.proposal.set_id = set_id;
        self.result.proposal.previous_block = self.prev_id;
        self.result.proposal.body = BlockBody {
            transactions: updated.clone(),
        };
        self.share_position(ctx);

        let newly_acquired = !self.acquired_sets.contains_key(&set_id);
        self.acquired_sets
            .insert(set_id, AcquiredSet { set: updated, time: now });
        if newly_acquired {
            let holders: Vec<Digest> = self
                .peer_positions
                .iter()
                .filter(|(_, pos)| pos.set_id == set_id)
                .map(|(peer, _)| *peer)
                .collect();
            for holder in holders {
                self.update_disputes(holder, set_id);
            }
        }
        debug!(target: "consensus", "position moved to {}", set_id.short());
    }

    /// Agreement holds when strictly more than 80% of UNL + self share our
    /// set id (rational comparison, no division).
    fn have_consensus(&mut self, ctx: &Ctx) -> bool {
        if self.result.proposal.set_id.is_zero() {
            return false;
        }
        let agree = self
            .peer_positions
            .values()
            .filter(|pos| pos.set_id == self.result.proposal.set_id)
            .count() as u64;
        let reached = (agree + 1) * 5 > (u64::from(ctx.unl_count) + 1) * 4;
        if reached {
            debug!(target: "consensus",
                "consensus reached on {} with {} peers agreeing",
                self.result.proposal.set_id.short(), agree);
        }
        reached
    }

    /// Materialize the agreed block, propose it, and start the next round.
    fn on_accept(&mut self, ctx: &Ctx) {
        let mut block = Block {
            header: BlockHeader {
                version: BLOCK_VERSION,
                sequence: self.prev_header.sequence + 1,
                size: 0,
                tx_root: self.result.proposal.set_id,
                previous: self.prev_id,
                account_root: Digest::ZERO,
            },
            body: BlockBody {
                transactions: self.result.txns.clone(),
            },
        };
        block.header.size = match block.compute_size() {
            Ok(size) => size,
            Err(e) => {
                error!(target: "consensus", "failed to size the accepted block: {e}");
                self.begin_round();
                return;
            }
        };
        let block_id = match block.header.hash() {
            Ok(id) => id,
            Err(e) => {
                error!(target: "consensus", "failed to hash the accepted block: {e}");
                self.begin_round();
                return;
            }
        };
        self.curr_id = block_id;

        let mut proposal = BlockProposal {
            issuer: ctx.local_id,
            block_id,
            signature: Vec::new(),
            header: block.header,
        };
        let secret_key = ctx.secret_key();
        match proposal.sign(ctx.scheme.as_ref(), &secret_key) {
            Ok(()) => ctx.broadcast(Payload::Proposal(ProposalPayload::Block(proposal))),
            Err(e) => error!(target: "consensus", "failed to sign block proposal: {e}"),
        }

        info!(target: "consensus",
            "accepted block {} at sequence {} with {} transactions",
            block_id.short(), block.header.sequence, block.body.transaction_count());

        self.prev_header = block.header;
        self.prev_id = block_id;
        self.prev_round_time = self.result.round_time;

        let header = block.header;
        self.curr_block = Some(block);
        if let Err(e) = self.chain.insert(ctx.local_id, header, true) {
            warn!(target: "consensus", "own header rejected by the chain: {e}");
        }
        if self.chain.update_valid_block(&block_id) {
            if let Some(agreed) = self.curr_block.take() {
                self.execute_block(ctx, agreed);
            }
        }
        self.begin_round();
    }

    /// Handle a peer's block proposal for the working sequence.
    fn peer_proposal(&mut self, ctx: &Ctx, prop: BlockProposal) {
        debug!(target: "consensus",
            "block proposal {} at sequence {} from {}",
            prop.block_id.short(), prop.header.sequence, prop.issuer.short());
        if prop.header.sequence != self.working_sequence() {
            trace!(target: "consensus",
                "ignoring proposal at sequence {}, working on {}",
                prop.header.sequence, self.working_sequence());
            return;
        }
        if let Err(e) = self.chain.insert(prop.issuer, prop.header, false) {
            warn!(target: "consensus", "peer header rejected by the chain: {e}");
            return;
        }
        let working = self.curr_id;
        if !working.is_zero() && self.chain.update_valid_block(&working) {
            if let Some(block) = self.curr_block.take() {
                self.execute_block(ctx, block);
            }
        }
    }

    /// Apply a quorum-valid block: balances, pool, account Merkle, chain
    /// re-key, persistence.
    fn execute_block(&mut self, ctx: &Ctx, mut block: Block) {
        let deltas = match executor::account_differences(
            &ctx.balances,
            &ctx.wallet,
            &ctx.local_id,
            &block.body.transactions,
        ) {
            Ok(deltas) => deltas,
            Err(e) => {
                error!(target: "consensus", "balance validation failed: {e}");
                return;
            }
        };
        if let Err(e) = ctx.balances.apply_differences(&deltas) {
            error!(target: "consensus", "balance batch write failed: {e}");
            return;
        }
        for tx in &block.body.transactions {
            self.pool.remove(&tx.0.id);
        }
        let account_root = match ctx.balances.merkle_root() {
            Ok(root) => root,
            Err(e) => {
                error!(target: "consensus", "account merkle recomputation failed: {e}");
                return;
            }
        };
        block.header.account_root = account_root;
        if let Err(e) = self.chain.assign_account_hash_to_valid(account_root) {
            warn!(target: "consensus", "could not re-key the valid block: {e}");
        }
        match ctx.blocks.put(&block) {
            Ok(id) => info!(target: "consensus", "block {} executed and persisted", id.short()),
            Err(e) => error!(target: "consensus", "block persistence failed: {e}"),
        }
    }
}

/// Static configuration of the consensus subsystem.
pub struct ConsensusConfig {
    pub local_id: Digest,
    pub unl: Vec<Digest>,
    /// Validators drive rounds; servers only serve the pool and execute
    /// fetched blocks.
    pub validator: bool,
}

/// Shared, thread-safe entry point to the consensus engine.
pub struct ConsensusHandle {
    ctx: Ctx,
    state: Mutex<Engine>,
    wake: Condvar,
    run: AtomicBool,
    validator: bool,
    driver: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ConsensusHandle {
    /// Build the engine and, on validators, start the driver thread.
    pub fn spawn(
        config: ConsensusConfig,
        scheme: SchemeHandle,
        wallet: Arc<Mutex<Wallet>>,
        blocks: Arc<BlocksStore>,
        balances: Arc<BalanceStore>,
        requests: tokio::sync::mpsc::Sender<MessageRequest>,
    ) -> Result<Arc<ConsensusHandle>, ConsensusError> {
        let unl_count = config.unl.len() as u32;
        let handle = Arc::new(ConsensusHandle {
            ctx: Ctx {
                local_id: config.local_id,
                unl_count,
                scheme,
                wallet,
                blocks,
                balances,
                requests,
            },
            state: Mutex::new(Engine::new(unl_count)?),
            wake: Condvar::new(),
            run: AtomicBool::new(true),
            validator: config.validator,
            driver: Mutex::new(None),
        });

        if config.validator {
            let worker = Arc::clone(&handle);
            let thread = thread::Builder::new()
                .name("consensus".into())
                .spawn(move || worker.drive())
                .map_err(|e| ConsensusError::Internal(format!("failed to start driver: {e}")))?;
            if let Ok(mut slot) = handle.driver.lock() {
                *slot = Some(thread);
            }
        }
        Ok(handle)
    }

    fn lock_state(&self) -> MutexGuard<'_, Engine> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Driver loop: wake on pool activity, step the round, sleep a second.
    fn drive(&self) {
        info!(target: "consensus", "consensus driver started");
        let mut last_entry = Instant::now();
        loop {
            let mut state = self.lock_state();
            let wait = self
                .wake
                .wait_while(state, |engine| {
                    engine.pool.is_empty() && self.run.load(Ordering::SeqCst)
                });
            state = match wait {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !self.run.load(Ordering::SeqCst) {
                break;
            }
            if last_entry.elapsed() > IDLE_RESET {
                debug!(target: "consensus", "pool was idle; restarting the round");
                state.begin_round();
            }
            state.timer_entry(&self.ctx);
            drop(state);
            last_entry = Instant::now();
            thread::sleep(Duration::from_secs(1));
        }
        info!(target: "consensus", "consensus driver stopped");
    }

    pub fn is_validator(&self) -> bool {
        self.validator
    }

    /// Add a transaction to the pool; false when already present.
    pub fn add_transaction(&self, tx: TxPtr) -> bool {
        let mut state = self.lock_state();
        if state.pool.contains_key(&tx.id) {
            return false;
        }
        state.pool.insert(tx.id, tx);
        drop(state);
        self.wake.notify_one();
        true
    }

    pub fn transaction_in_pool(&self, tx_id: &Digest) -> bool {
        self.lock_state().pool.contains_key(tx_id)
    }

    pub fn pool_transaction(&self, tx_id: &Digest) -> Option<TxPtr> {
        self.lock_state().pool.get(tx_id).cloned()
    }

    pub fn remove_transaction(&self, tx_id: &Digest) {
        self.lock_state().pool.remove(tx_id);
    }

    /// Inbound transaction-set position.
    pub fn notify_tx_set_proposal(&self, prop: TxSetProposal) {
        self.lock_state().got_tx_set(prop);
    }

    /// Inbound block proposal.
    pub fn notify_block_proposal(&self, prop: BlockProposal) {
        let mut state = self.lock_state();
        state.peer_proposal(&self.ctx, prop);
    }

    /// Server path: a block fetched after inventory quorum is applied and
    /// persisted without chain-tree participation.
    pub fn execute_external_block(&self, mut block: Block) -> Result<Digest, ConsensusError> {
        let mut state = self.lock_state();
        let deltas = executor::account_differences(
            &self.ctx.balances,
            &self.ctx.wallet,
            &self.ctx.local_id,
            &block.body.transactions,
        )?;
        self.ctx.balances.apply_differences(&deltas)?;
        for tx in &block.body.transactions {
            state.pool.remove(&tx.0.id);
        }
        block.header.account_root = self.ctx.balances.merkle_root()?;
        let id = self.ctx.blocks.put(&block)?;
        info!(target: "consensus", "fetched block {} executed and persisted", id.short());
        Ok(id)
    }

    /// Operator surface: render the chain tree.
    pub fn chain_dump(&self) -> String {
        self.lock_state().chain.dump()
    }

    /// Stop the driver thread and join it.
    pub fn shutdown(&self) {
        self.run.store(false, Ordering::SeqCst);
        self.wake.notify_all();
        if let Ok(mut slot) = self.driver.lock() {
            if let Some(thread) = slot.take() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqledger_crypto::scheme_by_name;
    use pqledger_types::account::AccountBalance;
    use pqledger_types::transaction::{Transaction, TransactionData, TX_VERSION};
    use tempfile::TempDir;

    struct Rig {
        _dir: TempDir,
        ctx: Ctx,
        requests: tokio::sync::mpsc::Receiver<MessageRequest>,
        engine: Engine,
        sender_id: Digest,
    }

    /// An engine over real stores with one funded account to spend from.
    fn rig(unl_count: u32) -> Rig {
        let dir = TempDir::new().unwrap();
        let scheme = scheme_by_name("ed25519").unwrap();
        let wallet = Wallet::generate(&scheme, vec![], vec![]).unwrap();
        let local_id = wallet.wallet_id();

        let blocks = Arc::new(BlocksStore::open(dir.path().join("blocks.redb")).unwrap());
        let balances = Arc::new(BalanceStore::open(dir.path().join("balances.redb")).unwrap());
        let funded = AccountBalance {
            public_key: vec![0xaa; 33],
            balance: 1_000,
            tx_sequence: 0,
        };
        let sender_id = funded.account_id().unwrap();
        balances.put(&sender_id, &funded).unwrap();
        let receiver = AccountBalance {
            public_key: vec![0xbb; 33],
            balance: 0,
            tx_sequence: 0,
        };
        balances.put(&receiver.account_id().unwrap(), &receiver).unwrap();

        let (requests_tx, requests_rx) = tokio::sync::mpsc::channel(64);
        Rig {
            _dir: dir,
            ctx: Ctx {
                local_id,
                unl_count,
                scheme,
                wallet: Arc::new(Mutex::new(wallet)),
                blocks,
                balances,
                requests: requests_tx,
            },
            requests: requests_rx,
            engine: Engine::new(unl_count).unwrap(),
            sender_id,
        }
    }

    fn pooled_tx(sender: Digest, seq: u32) -> TxPtr {
        let mut tx = Transaction {
            data: TransactionData {
                version: TX_VERSION,
                sequence: seq,
                amount: 10,
                timestamp: 1_700_000_000,
                sender,
                receiver: Digest::sha512_of(&[0xbb; 33]).unwrap(),
            },
            id: Digest::ZERO,
            signature: vec![0x44; 64],
        };
        tx.seal().unwrap();
        Arc::new(tx)
    }

    fn peer(tag: &[u8]) -> Digest {
        Digest::sha512_of(tag).unwrap()
    }

    fn position_from(rig: &Rig, issuer: Digest, extra: Option<TxPtr>) -> TxSetProposal {
        let mut set = rig.engine.result.txns.clone();
        if let Some(tx) = extra {
            set.insert(OrderedTx(tx));
        }
        TxSetProposal {
            seq: 0,
            timestamp: unix_now(),
            issuer,
            set_id: merkle::tx_set_root(&set).unwrap(),
            previous_block: rig.engine.prev_id,
            signature: vec![0x55; 64],
            body: BlockBody { transactions: set },
        }
    }

    #[test]
    fn close_block_broadcasts_a_signed_position() {
        let mut rig = rig(3);
        let tx = pooled_tx(rig.sender_id, 1);
        rig.engine.pool.insert(tx.id, tx);
        rig.engine.close_block(&rig.ctx);

        assert!(!rig.engine.result.proposal.set_id.is_zero());
        assert_eq!(rig.engine.result.proposal.seq, 0);
        assert_eq!(rig.engine.result.txns.len(), 1);

        let sent = rig.requests.try_recv().unwrap();
        match sent.message.payload {
            Payload::Proposal(ProposalPayload::TxSet(p)) => {
                assert_eq!(p.set_id, rig.engine.result.proposal.set_id);
                assert!(!p.signature.is_empty());
            }
            other => panic!("unexpected broadcast: {other:?}"),
        }
    }

    #[test]
    fn differing_peer_position_opens_disputes() {
        let mut rig = rig(3);
        let ours = pooled_tx(rig.sender_id, 1);
        rig.engine.pool.insert(ours.id, ours.clone());
        rig.engine.close_block(&rig.ctx);

        let theirs = pooled_tx(rig.sender_id, 2);
        let mut prop = position_from(&rig, peer(b"p1"), Some(theirs.clone()));
        // Their set also lacks nothing of ours, so only their extra
        // transaction is in dispute, and we vote against it.
        rig.engine.got_tx_set(prop.clone());
        assert_eq!(rig.engine.result.disputes.len(), 1);
        let dispute = rig.engine.result.disputes.get(&theirs.id).unwrap();
        assert!(!dispute.our_vote());

        // A replayed position with the same sequence is ignored.
        prop.timestamp += 1;
        rig.engine.got_tx_set(prop);
        assert_eq!(rig.engine.peer_positions.len(), 1);
    }

    #[test]
    fn mismatched_previous_block_is_ignored() {
        let mut rig = rig(3);
        rig.engine.close_block(&rig.ctx);
        let mut prop = position_from(&rig, peer(b"p1"), None);
        prop.previous_block = Digest::sha512_of(b"a different chain").unwrap();
        rig.engine.got_tx_set(prop);
        assert!(rig.engine.peer_positions.is_empty());
    }

    #[test]
    fn agreement_needs_over_eighty_percent() {
        let mut rig = rig(4);
        rig.engine.close_block(&rig.ctx);
        let _ = rig.requests.try_recv();

        for tag in [b"p1" as &[u8], b"p2", b"p3"] {
            rig.engine.got_tx_set(position_from(&rig, peer(tag), None));
        }
        // 3 of 4 agreeing: (3+1)*5 is not above (4+1)*4.
        assert!(!rig.engine.have_consensus(&rig.ctx));

        rig.engine.got_tx_set(position_from(&rig, peer(b"p4"), None));
        assert!(rig.engine.have_consensus(&rig.ctx));
    }

    #[test]
    fn accept_and_peer_quorum_execute_the_block() {
        let mut rig = rig(1);
        let tx = pooled_tx(rig.sender_id, 1);
        rig.engine.pool.insert(tx.id, tx.clone());
        rig.engine.close_block(&rig.ctx);
        rig.engine.on_accept(&rig.ctx);

        // Accepted but not yet promoted: a single local vote carries no
        // tip-support.
        let block_id = rig.engine.curr_id;
        assert!(!block_id.is_zero());
        assert!(rig.engine.curr_block.is_some());
        assert_eq!(rig.engine.pool.len(), 1);

        // One UNL peer proposing the same header reaches the 80% quorum.
        let header = rig.engine.curr_block.as_ref().unwrap().header;
        rig.engine.peer_proposal(
            &rig.ctx,
            BlockProposal {
                issuer: peer(b"p1"),
                block_id,
                signature: vec![0x66; 64],
                header,
            },
        );

        assert!(rig.engine.curr_block.is_none());
        assert!(rig.engine.pool.is_empty());
        assert_eq!(rig.ctx.blocks.headers().unwrap().len(), 1);
        let spent = rig.ctx.balances.get(&rig.sender_id).unwrap().unwrap();
        assert_eq!(spent.balance, 990);
        assert_eq!(spent.tx_sequence, 1);

        // The persisted block carries the recomputed account root.
        let (_, stored) = rig.ctx.blocks.headers().unwrap().remove(0);
        assert_eq!(stored.account_root, rig.ctx.balances.merkle_root().unwrap());
        assert_eq!(stored.sequence, 1);
    }

    #[test]
    fn open_phase_closes_after_half_the_previous_round() {
        let mut rig = rig(1);
        let tx = pooled_tx(rig.sender_id, 1);
        rig.engine.pool.insert(tx.id, tx);

        // A zero previous round time closes immediately.
        rig.engine.prev_round_time = Duration::ZERO;
        assert_eq!(rig.engine.phase, Phase::Open);
        rig.engine.timer_entry(&rig.ctx);
        assert_eq!(rig.engine.phase, Phase::Establish);

        // With our single peer agreeing, the next tick accepts.
        rig.engine.got_tx_set(position_from(&rig, peer(b"p1"), None));
        rig.engine.timer_entry(&rig.ctx);
        // on_accept starts the next round straight away.
        assert_eq!(rig.engine.phase, Phase::Open);
        assert!(rig.engine.curr_block.is_some());
    }

    #[test]
    fn stale_positions_expire() {
        let mut rig = rig(3);
        rig.engine.close_block(&rig.ctx);
        let mut prop = position_from(&rig, peer(b"p1"), None);
        prop.timestamp = unix_now() - PROPOSAL_FRESHNESS_SECS - 1;
        rig.engine.got_tx_set(prop);
        assert_eq!(rig.engine.peer_positions.len(), 1);

        rig.engine.update_proposals(&rig.ctx);
        assert!(rig.engine.peer_positions.is_empty());
    }
}
