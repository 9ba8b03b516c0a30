//! Blocks: header, body, and the genesis constant.

use crate::codec::{read_digest, read_u32, write_digest, write_u32, Encodable};
use crate::digest::{Digest, DIGEST_LEN};
use crate::error::CodecError;
use crate::merkle;
use crate::transaction::{OrderedTx, Transaction, TransactionSet};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Current block format version.
pub const BLOCK_VERSION: u32 = 1;

/// Maximum serialized block size in bytes (1 MiB). Also the upper bound for
/// a logical wire message.
pub const MAX_BLOCK_SIZE: usize = 1_048_576;

/// Block header. Its hash (with whatever account root it currently carries)
/// is the block id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub version: u32,
    /// Block height.
    pub sequence: u32,
    /// Total serialized block size in bytes.
    pub size: u32,
    /// Merkle root over the ordered transaction-id set.
    pub tx_root: Digest,
    /// Id of the previous block.
    pub previous: Digest,
    /// Merkle root over the account balance projections. Zero until the
    /// block has been executed against storage.
    pub account_root: Digest,
}

impl BlockHeader {
    pub const ENCODED_LEN: usize = 3 * 4 + 3 * DIGEST_LEN;

    /// The block id: SHA-512 of the encoded header.
    pub fn hash(&self) -> Result<Digest, CodecError> {
        let bytes = self.encode_to_vec()?;
        Ok(Digest::sha512_of(&bytes)?)
    }
}

impl Encodable for BlockHeader {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        Ok(Self::ENCODED_LEN)
    }

    // Headers encode without field checks: a header is hashed into the chain
    // tree while its account root is still zero.
    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        write_u32(buf, offset, self.version)?;
        write_u32(buf, offset, self.sequence)?;
        write_u32(buf, offset, self.size)?;
        write_digest(buf, offset, &self.tx_root)?;
        write_digest(buf, offset, &self.previous)?;
        write_digest(buf, offset, &self.account_root)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        Ok(BlockHeader {
            version: read_u32(buf, offset)?,
            sequence: read_u32(buf, offset)?,
            size: read_u32(buf, offset)?,
            tx_root: read_digest(buf, offset)?,
            previous: read_digest(buf, offset)?,
            account_root: read_digest(buf, offset)?,
        })
    }
}

/// Block body: the ordered transaction set.
#[derive(Debug, Clone, Default)]
pub struct BlockBody {
    pub transactions: TransactionSet,
}

impl BlockBody {
    pub fn transaction_count(&self) -> u32 {
        self.transactions.len() as u32
    }
}

impl Encodable for BlockBody {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        let mut len = 4usize;
        for tx in &self.transactions {
            len = len
                .checked_add(tx.0.encoded_len()?)
                .ok_or(CodecError::BufferTooSmall)?;
        }
        Ok(len)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        write_u32(buf, offset, self.transaction_count())?;
        for tx in &self.transactions {
            tx.0.encode_into(buf, offset)?;
        }
        Ok(())
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        let count = read_u32(buf, offset)?;
        let mut transactions = TransactionSet::new();
        for _ in 0..count {
            let tx = Transaction::decode_from(buf, offset)?;
            transactions.insert(OrderedTx(Arc::new(tx)));
        }
        if transactions.len() != count as usize {
            return Err(CodecError::InvalidValue(
                "duplicate transactions in block body".into(),
            ));
        }
        Ok(BlockBody { transactions })
    }
}

/// A full block.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    /// The all-zero genesis block shared by every node.
    pub fn genesis() -> Block {
        Block::default()
    }

    /// Serialized size of the whole block, the value of `header.size`.
    pub fn compute_size(&self) -> Result<u32, CodecError> {
        let len = BlockHeader::ENCODED_LEN
            .checked_add(self.body.encoded_len()?)
            .ok_or(CodecError::BufferTooSmall)?;
        Ok(len as u32)
    }

    /// Merkle root of the block's transactions in canonical order.
    pub fn tx_merkle_root(&self) -> Result<Digest, CodecError> {
        Ok(merkle::tx_set_root(&self.body.transactions)?)
    }
}

impl Encodable for Block {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        BlockHeader::ENCODED_LEN
            .checked_add(self.body.encoded_len()?)
            .ok_or(CodecError::BufferTooSmall)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        // A full block only serializes once every Merkle commitment is in
        // place; headers alone (proposals, hashing) have no such gate.
        if self.header.tx_root.is_zero() {
            return Err(CodecError::MissingField("transaction merkle root"));
        }
        if self.header.previous.is_zero() {
            return Err(CodecError::MissingField("previous block id"));
        }
        if self.header.account_root.is_zero() {
            return Err(CodecError::MissingField("account merkle root"));
        }
        self.header.encode_into(buf, offset)?;
        self.body.encode_into(buf, offset)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        Ok(Block {
            header: BlockHeader::decode_from(buf, offset)?,
            body: BlockBody::decode_from(buf, offset)?,
        })
    }
}

/// Id of the genesis block: the hash of the all-zero header. Every node
/// derives the same constant.
pub static GENESIS_BLOCK_ID: Lazy<Digest> =
    Lazy::new(|| Block::genesis().header.hash().unwrap_or(Digest::ZERO));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TransactionData, TX_VERSION};

    fn sealed_tx(seq: u32, sender: &[u8]) -> Transaction {
        let mut tx = Transaction {
            data: TransactionData {
                version: TX_VERSION,
                sequence: seq,
                amount: 10,
                timestamp: 1_700_000_000,
                sender: Digest::sha512_of(sender).unwrap(),
                receiver: Digest::sha512_of(b"receiver").unwrap(),
            },
            id: Digest::ZERO,
            signature: vec![0x11; 96],
        };
        tx.seal().unwrap();
        tx
    }

    fn populated_block() -> Block {
        let mut block = Block::genesis();
        block.header.version = BLOCK_VERSION;
        block.header.sequence = 1;
        block.header.previous = *GENESIS_BLOCK_ID;
        block
            .body
            .transactions
            .insert(OrderedTx(Arc::new(sealed_tx(1, b"alice"))));
        block
            .body
            .transactions
            .insert(OrderedTx(Arc::new(sealed_tx(2, b"alice"))));
        block.header.tx_root = block.tx_merkle_root().unwrap();
        block.header.account_root = Digest::sha512_of(b"account-root").unwrap();
        block.header.size = block.compute_size().unwrap();
        block
    }

    #[test]
    fn roundtrip() {
        let block = populated_block();
        let bytes = block.encode_to_vec().unwrap();
        assert_eq!(bytes.len(), block.header.size as usize);
        let back = Block::decode_exact(&bytes).unwrap();
        assert_eq!(back.header, block.header);
        assert_eq!(back.body.transaction_count(), 2);
    }

    #[test]
    fn missing_merkle_field_refuses_to_encode() {
        let mut block = populated_block();
        block.header.account_root = Digest::ZERO;
        assert!(matches!(
            block.encode_to_vec(),
            Err(CodecError::MissingField("account merkle root"))
        ));
    }

    #[test]
    fn header_hash_depends_on_every_field() {
        let block = populated_block();
        let base = block.header.hash().unwrap();

        let mut h = block.header;
        h.account_root = Digest::sha512_of(b"different").unwrap();
        assert_ne!(h.hash().unwrap(), base);

        let mut h = block.header;
        h.sequence += 1;
        assert_ne!(h.hash().unwrap(), base);
    }

    #[test]
    fn short_buffer_fails_cleanly() {
        let bytes = populated_block().encode_to_vec().unwrap();
        assert!(Block::decode_exact(&bytes[..100]).is_err());
    }

    #[test]
    fn genesis_id_is_stable() {
        assert_eq!(*GENESIS_BLOCK_ID, Block::genesis().header.hash().unwrap());
        assert!(!GENESIS_BLOCK_ID.is_zero());
    }
}
