//! Inventory bookkeeping: what we are waiting for, and how many peers have
//! advertised each block.

use pqledger_types::Digest;
use std::collections::{HashMap, HashSet};

/// Fetch state of an advertised block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockFetchState {
    /// Advertisements seen so far.
    Counting(u32),
    /// GETDATA was sent; the block is on its way.
    Requested,
}

/// Tracks outstanding GETDATA requests and per-block inventory quorums.
#[derive(Default)]
pub struct InventoryTracker {
    block_quorum: HashMap<Digest, BlockFetchState>,
    waiting: HashSet<Digest>,
}

impl InventoryTracker {
    pub fn new() -> InventoryTracker {
        InventoryTracker::default()
    }

    /// Mark `id` as awaited. Returns false when a GETDATA is already out.
    pub fn begin_waiting(&mut self, id: Digest) -> bool {
        self.waiting.insert(id)
    }

    /// The awaited item arrived. Returns true if we were waiting on it.
    pub fn resolve_waiting(&mut self, id: &Digest) -> bool {
        self.waiting.remove(id)
    }

    /// Count one block advertisement. Returns true exactly once: when the
    /// quorum of >= 80% of the UNL is reached and a GETDATA should go out.
    pub fn note_block_inventory(&mut self, id: Digest, unl_count: u32, have_block: bool) -> bool {
        if have_block {
            return false;
        }
        let state = self
            .block_quorum
            .entry(id)
            .or_insert(BlockFetchState::Counting(0));
        match *state {
            BlockFetchState::Requested => false,
            BlockFetchState::Counting(seen) => {
                let seen = seen + 1;
                if u64::from(seen) * 5 >= u64::from(unl_count) * 4 {
                    *state = BlockFetchState::Requested;
                    true
                } else {
                    *state = BlockFetchState::Counting(seen);
                    false
                }
            }
        }
    }

    /// The block arrived. True only if it was actually requested; the entry
    /// is consumed either way.
    pub fn take_requested(&mut self, id: &Digest) -> bool {
        matches!(
            self.block_quorum.remove(id),
            Some(BlockFetchState::Requested)
        )
    }
}
