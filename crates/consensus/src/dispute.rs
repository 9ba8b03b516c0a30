//! Disputed transactions: present in some observed positions but not all.
//!
//! Each dispute tracks the local vote and every peer's vote. The local vote
//! flips toward the majority, with the bar rising as the round converges so
//! late rounds prefer dropping contested transactions over stalling.

use pqledger_types::transaction::TxPtr;
use pqledger_types::Digest;
use std::collections::HashMap;

/// One disputed transaction and the votes around it.
pub struct DisputeTx {
    tx: TxPtr,
    our_vote: bool,
    yays: u32,
    nays: u32,
    votes: HashMap<Digest, bool>,
}

impl DisputeTx {
    pub fn new(tx: TxPtr, our_vote: bool) -> DisputeTx {
        DisputeTx {
            tx,
            our_vote,
            yays: 0,
            nays: 0,
            votes: HashMap::new(),
        }
    }

    pub fn tx(&self) -> &TxPtr {
        &self.tx
    }

    pub fn our_vote(&self) -> bool {
        self.our_vote
    }

    /// Record `peer`'s vote, replacing any previous one.
    pub fn set_vote(&mut self, peer: Digest, vote: bool) {
        match self.votes.insert(peer, vote) {
            None => {
                if vote {
                    self.yays += 1;
                } else {
                    self.nays += 1;
                }
            }
            Some(previous) if previous != vote => {
                if vote {
                    self.nays = self.nays.saturating_sub(1);
                    self.yays += 1;
                } else {
                    self.yays = self.yays.saturating_sub(1);
                    self.nays += 1;
                }
            }
            Some(_) => {}
        }
    }

    /// Remove `peer`'s vote, e.g. when its position went stale.
    pub fn unvote(&mut self, peer: &Digest) {
        if let Some(vote) = self.votes.remove(peer) {
            if vote {
                self.yays = self.yays.saturating_sub(1);
            } else {
                self.nays = self.nays.saturating_sub(1);
            }
        }
    }

    /// The yes-bar for the current convergence ratio.
    fn threshold(converge: f64) -> f64 {
        if converge < 0.5 {
            0.50
        } else if converge < 0.85 {
            0.65
        } else if converge < 2.0 {
            0.70
        } else {
            0.95
        }
    }

    /// Re-derive the local vote from the tally. Returns true when the vote
    /// flipped.
    pub fn update_vote(&mut self, converge: f64) -> bool {
        let weight = f64::from(self.yays) + if self.our_vote { 1.0 } else { 0.0 };
        let total = f64::from(self.yays) + f64::from(self.nays) + 1.0;
        let new_vote = weight / total > Self::threshold(converge);
        if new_vote != self.our_vote {
            self.our_vote = new_vote;
            return true;
        }
        false
    }
}
