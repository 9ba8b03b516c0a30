//! Merkle root computation over an ordered sequence of digests.
//!
//! Interior nodes are SHA-512 of the concatenation of the two children; an
//! odd level duplicates its last element. The empty set hashes to
//! SHA-512(""), and so does a single-element set — downstream code depends
//! on the single-leaf value, so it is preserved exactly.

use crate::digest::Digest;
use crate::transaction::TransactionSet;
use pqledger_crypto::CryptoError;

/// Merkle root of an ordered sequence of leaf digests.
pub fn merkle_root(leaves: &[Digest]) -> Result<Digest, CryptoError> {
    if leaves.len() <= 1 {
        return Digest::sha512_of(b"");
    }
    let mut level: Vec<Digest> = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().copied() {
                level.push(last);
            }
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            if let [a, b] = pair {
                next.push(Digest::hash_pair(a, b)?);
            }
        }
        level = next;
    }
    match level.first() {
        Some(root) => Ok(*root),
        None => Digest::sha512_of(b""),
    }
}

/// Merkle root of a transaction set in canonical order.
pub fn tx_set_root(set: &TransactionSet) -> Result<Digest, CryptoError> {
    let ids: Vec<Digest> = set.iter().map(|tx| tx.0.id).collect();
    merkle_root(&ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tag: &[u8]) -> Digest {
        Digest::sha512_of(tag).unwrap()
    }

    fn empty_hash() -> Digest {
        Digest::sha512_of(b"").unwrap()
    }

    #[test]
    fn empty_set_hashes_to_empty_string() {
        assert_eq!(merkle_root(&[]).unwrap(), empty_hash());
    }

    #[test]
    fn single_leaf_hashes_to_empty_string() {
        // Established behavior: a one-element set does not return the
        // element itself.
        assert_eq!(merkle_root(&[leaf(b"only")]).unwrap(), empty_hash());
    }

    #[test]
    fn two_leaves_hash_pairwise() {
        let (a, b) = (leaf(b"a"), leaf(b"b"));
        let expected = Digest::hash_pair(&a, &b).unwrap();
        assert_eq!(merkle_root(&[a, b]).unwrap(), expected);
    }

    #[test]
    fn odd_level_duplicates_last_leaf() {
        let (a, b, c) = (leaf(b"a"), leaf(b"b"), leaf(b"c"));
        let left = Digest::hash_pair(&a, &b).unwrap();
        let right = Digest::hash_pair(&c, &c).unwrap();
        let expected = Digest::hash_pair(&left, &right).unwrap();
        assert_eq!(merkle_root(&[a, b, c]).unwrap(), expected);
    }

    #[test]
    fn pure_function_of_input() {
        let leaves = [leaf(b"x"), leaf(b"y"), leaf(b"z"), leaf(b"w")];
        assert_eq!(merkle_root(&leaves).unwrap(), merkle_root(&leaves).unwrap());

        let reordered = [leaf(b"y"), leaf(b"x"), leaf(b"z"), leaf(b"w")];
        assert_ne!(merkle_root(&leaves).unwrap(), merkle_root(&reordered).unwrap());
    }
}
