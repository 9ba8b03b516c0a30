//! The chain tree: every proposed block header this node has seen, with
//! tip-support accounting and valid-block promotion.
//!
//! Nodes live in an arena indexed by position; the id map and the per-issuer
//! position map point into it. A node's id is the hash of its header with
//! the account root still zero; execution later fills the root and re-keys
//! the node.

use pqledger_types::block::{Block, BlockHeader};
use pqledger_types::error::ChainError;
use pqledger_types::Digest;
use std::collections::HashMap;
use tracing::{debug, trace};

struct ChainNode {
    id: Digest,
    header: BlockHeader,
    parent: Option<usize>,
    /// Children in first-insertion order; ties in support resolve by this.
    children: Vec<usize>,
    valid_child: Option<usize>,
    tip_support: u32,
}

pub struct ChainTree {
    nodes: Vec<ChainNode>,
    index: HashMap<Digest, usize>,
    /// Last header each issuer voted for.
    positions: HashMap<Digest, usize>,
    valid: usize,
    unl_count: u32,
}

impl ChainTree {
    /// A fresh tree holding only the genesis header as the valid block.
    pub fn new(unl_count: u32) -> Result<ChainTree, ChainError> {
        let genesis = Block::genesis().header;
        let id = genesis.hash()?;
        let root = ChainNode {
            id,
            header: genesis,
            parent: None,
            children: Vec::new(),
            valid_child: None,
            tip_support: 0,
        };
        let mut index = HashMap::new();
        index.insert(id, 0);
        Ok(ChainTree {
            nodes: vec![root],
            index,
            positions: HashMap::new(),
            valid: 0,
            unl_count,
        })
    }

    fn node(&self, idx: usize) -> Option<&ChainNode> {
        self.nodes.get(idx)
    }

    pub fn valid_id(&self) -> Digest {
        self.node(self.valid).map(|n| n.id).unwrap_or(Digest::ZERO)
    }

    pub fn valid_header(&self) -> BlockHeader {
        self.node(self.valid)
            .map(|n| n.header)
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &Digest) -> bool {
        self.index.contains_key(id)
    }

    /// Record `issuer`'s vote for `header`.
    ///
    /// A repeated header bumps its tip-support; a new header is linked under
    /// its parent, which must already be in the tree. Local insertions never
    /// contribute tip-support (the header is counted through the issuer's
    /// broadcast proposal instead).
    pub fn insert(
        &mut self,
        issuer: Digest,
        header: BlockHeader,
        local: bool,
    ) -> Result<(), ChainError> {
        let id = header.hash()?;

        let target = match self.index.get(&id).copied() {
            Some(existing) => existing,
            None => {
                let parent = self
                    .index
                    .get(&header.previous)
                    .copied()
                    .ok_or_else(|| ChainError::UnknownParent(header.previous.short()))?;
                let idx = self.nodes.len();
                self.nodes.push(ChainNode {
                    id,
                    header,
                    parent: Some(parent),
                    children: Vec::new(),
                    valid_child: None,
                    tip_support: 0,
                });
                if let Some(p) = self.nodes.get_mut(parent) {
                    p.children.push(idx);
                }
                self.index.insert(id, idx);
                idx
            }
        };

        // Move the issuer's vote: release the previous position, then count
        // the new one. Local votes carry no tip-support.
        if !local {
            if let Some(&prev) = self.positions.get(&issuer) {
                if let Some(prev_node) = self.nodes.get_mut(prev) {
                    prev_node.tip_support = prev_node.tip_support.saturating_sub(1);
                }
            }
            if let Some(node) = self.nodes.get_mut(target) {
                node.tip_support += 1;
            }
        }
        self.positions.insert(issuer, target);

        trace!(target: "chain",
            "{} voted for block {} (tip-support {})",
            issuer.short(), id.short(),
            self.node(target).map(|n| n.tip_support).unwrap_or(0));
        Ok(())
    }

    /// Promote `candidate` to valid if its tip-support exceeds 80% of the
    /// UNL and its height is beyond the current valid block.
    pub fn update_valid_block(&mut self, candidate: &Digest) -> bool {
        let Some(&idx) = self.index.get(candidate) else {
            return false;
        };
        let (support, sequence) = match self.node(idx) {
            Some(n) => (n.tip_support, n.header.sequence),
            None => return false,
        };
        let valid_sequence = self.node(self.valid).map(|n| n.header.sequence).unwrap_or(0);
        // Strict 80% quorum, kept in integers.
        if u64::from(support) * 5 > u64::from(self.unl_count) * 4 && sequence > valid_sequence {
            self.valid = idx;
            debug!(target: "chain", "new valid block {} with tip-support {}", candidate.short(), support);
            true
        } else {
            trace!(target: "chain", "quorum not reached for {} (tip-support {})", candidate.short(), support);
            false
        }
    }

    /// After executing the valid block, fill its account root, recompute its
    /// id, and re-key the node. The stale pre-execution id leaves the index.
    pub fn assign_account_hash_to_valid(
        &mut self,
        account_root: Digest,
    ) -> Result<Digest, ChainError> {
        let idx = self.valid;
        let (old_id, new_id) = {
            let node = self
                .nodes
                .get_mut(idx)
                .ok_or_else(|| ChainError::UnknownBlock("valid block".into()))?;
            let old_id = node.id;
            node.header.account_root = account_root;
            let new_id = node.header.hash()?;
            node.id = new_id;
            (old_id, new_id)
        };
        self.index.remove(&old_id);
        self.index.insert(new_id, idx);
        if let Some(parent) = self.node(idx).and_then(|n| n.parent) {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.valid_child = Some(idx);
            }
        }
        debug!(target: "chain", "valid block re-keyed {} -> {}", old_id.short(), new_id.short());
        Ok(new_id)
    }

    /// Tip-support of `idx` plus all of its descendants.
    fn subtree_support(&self, idx: usize) -> u32 {
        let mut total = 0;
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            if let Some(n) = self.node(i) {
                total += n.tip_support;
                stack.extend(n.children.iter().copied());
            }
        }
        total
    }

    /// UNL voters that have not yet committed to any header at or beyond
    /// `sequence`.
    fn uncommitted(&self, sequence: u32) -> u32 {
        let committed = self
            .positions
            .values()
            .filter(|&&i| {
                self.node(i)
                    .map(|n| n.header.sequence >= sequence)
                    .unwrap_or(false)
            })
            .count() as u32;
        self.unl_count.saturating_sub(committed)
    }

    /// The header the local consensus should build on, found by descending
    /// from the valid block toward the best-supported child while that lead
    /// cannot be overturned by uncommitted voters.
    pub fn preferred(&self) -> (Digest, BlockHeader) {
        let mut current = self.valid;
        loop {
            let Some(node) = self.node(current) else {
                break;
            };
            if node.children.is_empty() {
                break;
            }

            // Best and runner-up by subtree support; first insertion wins a
            // tie.
            let mut best = None;
            let mut best_support = 0u32;
            let mut second_support = 0u32;
            for &child in &node.children {
                let support = self.subtree_support(child);
                if best.is_none() || support > best_support {
                    second_support = best_support;
                    best_support = support;
                    best = Some(child);
                } else if support > second_support {
                    second_support = support;
                }
            }
            let Some(best) = best else {
                break;
            };
            let best_sequence = self
                .node(best)
                .map(|n| n.header.sequence)
                .unwrap_or(u32::MAX);
            let uncommitted = self.uncommitted(best_sequence);

            if uncommitted >= best_support {
                break;
            }
            if second_support + uncommitted >= best_support {
                break;
            }
            current = best;
        }
        self.node(current)
            .map(|n| (n.id, n.header))
            .unwrap_or((Digest::ZERO, BlockHeader::default()))
    }

    /// Sum of tip-support over the whole tree. Equals the number of
    /// distinct non-local issuers with a recorded position.
    pub fn tip_support_total(&self) -> u32 {
        self.nodes.iter().map(|n| n.tip_support).sum()
    }

    /// Text rendering of the agreed chain and its side branches. Operator
    /// surface.
    pub fn dump(&self) -> String {
        let mut out = String::from("genesis\n");
        let mut current = Some(0usize);
        while let Some(idx) = current {
            let Some(node) = self.node(idx) else { break };
            for &child in &node.children {
                if let Some(c) = self.node(child) {
                    out.push_str(&format!(
                        " | -> {} (seq {}, tip-support {})\n",
                        c.id.to_hex(),
                        c.header.sequence,
                        c.tip_support
                    ));
                }
            }
            current = node.valid_child;
            if let Some(next) = current.and_then(|i| self.node(i)) {
                out.push_str(&format!(" v\n{}\n", next.id.to_hex()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqledger_types::block::GENESIS_BLOCK_ID;

    fn issuer(tag: &[u8]) -> Digest {
        Digest::sha512_of(tag).unwrap()
    }

    fn header(sequence: u32, previous: Digest, salt: u8) -> BlockHeader {
        BlockHeader {
            version: 1,
            sequence,
            size: 0,
            tx_root: Digest::sha512_of(&[salt]).unwrap(),
            previous,
            account_root: Digest::ZERO,
        }
    }

    #[test]
    fn tip_support_total_tracks_distinct_issuers() {
        let mut tree = ChainTree::new(5).unwrap();
        let h = header(1, *GENESIS_BLOCK_ID, 1);

        tree.insert(issuer(b"a"), h, false).unwrap();
        tree.insert(issuer(b"b"), h, false).unwrap();
        assert_eq!(tree.tip_support_total(), 2);

        // A re-vote by the same issuer moves support, never grows it.
        let h2 = header(1, *GENESIS_BLOCK_ID, 2);
        tree.insert(issuer(b"a"), h2, false).unwrap();
        assert_eq!(tree.tip_support_total(), 2);

        // Local insertions add no support.
        tree.insert(issuer(b"me"), h, true).unwrap();
        assert_eq!(tree.tip_support_total(), 2);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut tree = ChainTree::new(5).unwrap();
        let orphan = header(2, Digest::sha512_of(b"never-seen").unwrap(), 1);
        assert!(matches!(
            tree.insert(issuer(b"a"), orphan, false),
            Err(ChainError::UnknownParent(_))
        ));
        assert_eq!(tree.tip_support_total(), 0);
    }

    #[test]
    fn promotion_needs_quorum_and_higher_sequence() {
        let mut tree = ChainTree::new(5).unwrap();
        let h = header(1, *GENESIS_BLOCK_ID, 1);
        let id = h.hash().unwrap();

        for tag in [b"a" as &[u8], b"b", b"c", b"d"] {
            tree.insert(issuer(tag), h, false).unwrap();
        }
        // 4 of 5 is not strictly more than 80%.
        assert!(!tree.update_valid_block(&id));

        tree.insert(issuer(b"e"), h, false).unwrap();
        assert!(tree.update_valid_block(&id));
        assert_eq!(tree.valid_id(), id);

        // A second promotion must advance the sequence.
        assert!(!tree.update_valid_block(&id));
    }

    #[test]
    fn promotions_are_monotonic_in_sequence() {
        let mut tree = ChainTree::new(1).unwrap();
        let h1 = header(1, *GENESIS_BLOCK_ID, 1);
        let id1 = h1.hash().unwrap();
        tree.insert(issuer(b"a"), h1, false).unwrap();
        assert!(tree.update_valid_block(&id1));

        let h2 = header(2, id1, 2);
        let id2 = h2.hash().unwrap();
        tree.insert(issuer(b"a"), h2, false).unwrap();
        assert!(tree.update_valid_block(&id2));
        assert!(tree.valid_header().sequence > h1.sequence - 1);
        assert_eq!(tree.valid_header().sequence, 2);
    }

    #[test]
    fn rekey_after_execution_updates_lookup() {
        let mut tree = ChainTree::new(1).unwrap();
        let h = header(1, *GENESIS_BLOCK_ID, 1);
        let id = h.hash().unwrap();
        tree.insert(issuer(b"a"), h, false).unwrap();
        assert!(tree.update_valid_block(&id));

        let root = Digest::sha512_of(b"account-root").unwrap();
        let new_id = tree.assign_account_hash_to_valid(root).unwrap();
        assert_ne!(new_id, id);
        assert!(tree.contains(&new_id));
        assert!(!tree.contains(&id));

        let (preferred, preferred_header) = tree.preferred();
        assert_eq!(preferred, new_id);
        assert_eq!(preferred_header.account_root, root);
    }

    #[test]
    fn preferred_stays_put_under_contention() {
        // Spec scenario: children c1 (support 3) and c2 (support 2), UNL 6,
        // one uncommitted voter. second(2) + u(1) >= best(3), so the valid
        // tip itself stays preferred.
        let mut tree = ChainTree::new(6).unwrap();
        let c1 = header(1, *GENESIS_BLOCK_ID, 1);
        let c2 = header(1, *GENESIS_BLOCK_ID, 2);

        for tag in [b"a" as &[u8], b"b", b"c"] {
            tree.insert(issuer(tag), c1, false).unwrap();
        }
        for tag in [b"d" as &[u8], b"e"] {
            tree.insert(issuer(tag), c2, false).unwrap();
        }
        // Issuer f never voted: uncommitted = 1.
        let (preferred, _) = tree.preferred();
        assert_eq!(preferred, tree.valid_id());
    }

    #[test]
    fn preferred_descends_once_lead_is_safe() {
        let mut tree = ChainTree::new(6).unwrap();
        let c1 = header(1, *GENESIS_BLOCK_ID, 1);
        let c2 = header(1, *GENESIS_BLOCK_ID, 2);

        for tag in [b"a" as &[u8], b"b", b"c", b"d", b"e"] {
            tree.insert(issuer(tag), c1, false).unwrap();
        }
        tree.insert(issuer(b"f"), c2, false).unwrap();
        // best 5, second 1, uncommitted 0: the lead cannot be overturned.
        let (preferred, _) = tree.preferred();
        assert_eq!(preferred, c1.hash().unwrap());
    }

    #[test]
    fn preferred_counts_descendant_support() {
        let mut tree = ChainTree::new(4).unwrap();
        let child = header(1, *GENESIS_BLOCK_ID, 1);
        let child_id = child.hash().unwrap();
        let grandchild = header(2, child_id, 2);

        tree.insert(issuer(b"a"), child, false).unwrap();
        tree.insert(issuer(b"b"), grandchild, false).unwrap();
        tree.insert(issuer(b"c"), grandchild, false).unwrap();
        tree.insert(issuer(b"d"), grandchild, false).unwrap();
        // Subtree support of `child` is 4 (1 own + 3 below); no voter is
        // uncommitted, so the walk descends.
        let (preferred, _) = tree.preferred();
        assert_eq!(preferred, grandchild.hash().unwrap());
    }
}
