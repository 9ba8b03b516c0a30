//! Value-transfer transactions.

use crate::codec::{
    read_bytes, read_digest, read_i64, read_u32, write_bytes, write_digest, write_i64, write_u32,
    Encodable,
};
use crate::digest::{Digest, DIGEST_LEN};
use crate::error::CodecError;
use pqledger_crypto::{CryptoError, SignatureScheme};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Current transaction format version.
pub const TX_VERSION: u32 = 1;

/// The canonical transaction body. Its encoding is what gets hashed into the
/// transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionData {
    pub version: u32,
    /// Strictly increasing per sender.
    pub sequence: u32,
    /// Transferred amount.
    pub amount: u32,
    /// Creation time, seconds since the Unix epoch.
    pub timestamp: i64,
    /// Account id of the sender (digest of its public key).
    pub sender: Digest,
    /// Account id of the receiver.
    pub receiver: Digest,
}

impl TransactionData {
    /// Canonical body size: three u32 words, one i64, two digests.
    pub const ENCODED_LEN: usize = 4 + 4 + 4 + 8 + 2 * DIGEST_LEN;
}

impl Encodable for TransactionData {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        Ok(Self::ENCODED_LEN)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        if self.sender.is_zero() {
            return Err(CodecError::MissingField("sender"));
        }
        if self.receiver.is_zero() {
            return Err(CodecError::MissingField("receiver"));
        }
        write_u32(buf, offset, self.version)?;
        write_u32(buf, offset, self.sequence)?;
        write_u32(buf, offset, self.amount)?;
        write_i64(buf, offset, self.timestamp)?;
        write_digest(buf, offset, &self.sender)?;
        write_digest(buf, offset, &self.receiver)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        Ok(TransactionData {
            version: read_u32(buf, offset)?,
            sequence: read_u32(buf, offset)?,
            amount: read_u32(buf, offset)?,
            timestamp: read_i64(buf, offset)?,
            sender: read_digest(buf, offset)?,
            receiver: read_digest(buf, offset)?,
        })
    }
}

/// A transaction: canonical body, its id, and the sender's signature over
/// the id.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub data: TransactionData,
    /// SHA-512 of the encoded body.
    pub id: Digest,
    /// Signature over `id`, produced by the sender's secret key.
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Hash the canonical body into the transaction id.
    pub fn compute_id(&self) -> Result<Digest, CodecError> {
        let body = self.data.encode_to_vec()?;
        Ok(Digest::sha512_of(&body)?)
    }

    /// Fill `id` from the current body.
    pub fn seal(&mut self) -> Result<(), CodecError> {
        self.id = self.compute_id()?;
        Ok(())
    }

    /// Sign the (sealed) transaction id.
    pub fn sign(
        &mut self,
        scheme: &dyn SignatureScheme,
        secret_key: &[u8],
    ) -> Result<(), CodecError> {
        if self.id.is_zero() {
            return Err(CodecError::MissingField("id"));
        }
        self.signature = scheme
            .sign(secret_key, self.id.as_bytes())
            .map_err(CodecError::from)?;
        Ok(())
    }

    /// Verify the signature over the id against the sender's public key.
    pub fn verify(
        &self,
        scheme: &dyn SignatureScheme,
        public_key: &[u8],
    ) -> Result<(), CryptoError> {
        scheme.verify(public_key, &self.signature, self.id.as_bytes())
    }

    /// Structural validity: every required field is set and the id matches
    /// the body.
    pub fn check_structure(&self) -> bool {
        if self.data.sender.is_zero()
            || self.data.receiver.is_zero()
            || self.id.is_zero()
            || self.signature.is_empty()
        {
            return false;
        }
        matches!(self.compute_id(), Ok(id) if id == self.id)
    }
}

impl Encodable for Transaction {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        if self.signature.is_empty() {
            return Err(CodecError::MissingField("signature"));
        }
        Ok(TransactionData::ENCODED_LEN + DIGEST_LEN + 4 + self.signature.len())
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        if self.id.is_zero() {
            return Err(CodecError::MissingField("id"));
        }
        if self.signature.is_empty() {
            return Err(CodecError::MissingField("signature"));
        }
        self.data.encode_into(buf, offset)?;
        write_digest(buf, offset, &self.id)?;
        write_u32(buf, offset, self.signature.len() as u32)?;
        write_bytes(buf, offset, &self.signature)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        let data = TransactionData::decode_from(buf, offset)?;
        let id = read_digest(buf, offset)?;
        let sig_len = read_u32(buf, offset)? as usize;
        let signature = read_bytes(buf, offset, sig_len)?;
        Ok(Transaction {
            data,
            id,
            signature,
        })
    }
}

/// Shared transaction handle. A transaction is referenced from the pool,
/// proposals, and blocks at the same time; it is dropped only when the last
/// holder lets go.
pub type TxPtr = Arc<Transaction>;

/// Canonical-order wrapper: transactions sort by (sender, sequence, id).
/// The id tiebreak keeps the order total, so a set can hold the two
/// conflicting same-sequence transactions execution later drops.
#[derive(Debug, Clone)]
pub struct OrderedTx(pub TxPtr);

impl OrderedTx {
    fn key(&self) -> (&Digest, u32, &Digest) {
        (&self.0.data.sender, self.0.data.sequence, &self.0.id)
    }
}

impl PartialEq for OrderedTx {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for OrderedTx {}

impl PartialOrd for OrderedTx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedTx {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Transactions in canonical block order.
pub type TransactionSet = BTreeSet<OrderedTx>;

/// The in-flight pool, keyed by transaction id.
pub type TransactionPool = BTreeMap<Digest, TxPtr>;

#[cfg(test)]
mod tests {
    use super::*;
    use pqledger_crypto::scheme_by_name;

    fn sample_tx(seq: u32) -> Transaction {
        let mut tx = Transaction {
            data: TransactionData {
                version: TX_VERSION,
                sequence: seq,
                amount: 100,
                timestamp: 1_700_000_000,
                sender: Digest::sha512_of(b"sender-key").unwrap(),
                receiver: Digest::sha512_of(b"receiver-key").unwrap(),
            },
            id: Digest::ZERO,
            signature: vec![0xab; 64],
        };
        tx.seal().unwrap();
        tx
    }

    #[test]
    fn roundtrip() {
        let tx = sample_tx(7);
        let bytes = tx.encode_to_vec().unwrap();
        let back = Transaction::decode_exact(&bytes).unwrap();
        assert_eq!(back.data, tx.data);
        assert_eq!(back.id, tx.id);
        assert_eq!(back.signature, tx.signature);
    }

    #[test]
    fn unsigned_transaction_refuses_to_encode() {
        let mut tx = sample_tx(1);
        tx.signature.clear();
        assert!(matches!(
            tx.encode_to_vec(),
            Err(CodecError::MissingField("signature"))
        ));
    }

    #[test]
    fn unset_sender_refuses_to_encode() {
        let mut tx = sample_tx(1);
        tx.data.sender = Digest::ZERO;
        assert!(tx.data.encode_to_vec().is_err());
    }

    #[test]
    fn short_buffer_fails_cleanly() {
        let bytes = sample_tx(1).encode_to_vec().unwrap();
        let truncated = &bytes[..bytes.len() - 5];
        assert!(Transaction::decode_exact(truncated).is_err());
    }

    #[test]
    fn id_covers_every_body_byte() {
        let tx = sample_tx(1);
        let mut altered = tx.clone();
        altered.data.amount += 1;
        assert_ne!(tx.compute_id().unwrap(), altered.compute_id().unwrap());
    }

    #[test]
    fn sign_verify_and_tamper() {
        let scheme = scheme_by_name("ed25519").unwrap();
        let (sk, pk) = scheme.generate_keypair().unwrap();
        let mut tx = sample_tx(3);
        tx.sign(scheme.as_ref(), &sk).unwrap();
        tx.verify(scheme.as_ref(), &pk).unwrap();

        // Any body change moves the id and invalidates the signature.
        tx.data.amount += 1;
        tx.seal().unwrap();
        assert!(tx.verify(scheme.as_ref(), &pk).is_err());
    }

    #[test]
    fn canonical_order_is_sender_then_sequence() {
        let first_sender = Digest::sha512_of(b"one-sender").unwrap();
        let other_sender = Digest::sha512_of(b"other-sender").unwrap();

        let mut a = sample_tx(2);
        a.data.sender = first_sender;
        a.seal().unwrap();
        let mut b = sample_tx(1);
        b.data.sender = first_sender;
        b.seal().unwrap();
        let mut c = sample_tx(1);
        c.data.sender = other_sender;
        c.seal().unwrap();

        let mut set = TransactionSet::new();
        set.insert(OrderedTx(Arc::new(a)));
        set.insert(OrderedTx(Arc::new(b)));
        set.insert(OrderedTx(Arc::new(c)));

        // Senders group together, ascending by id; within one sender the
        // sequence is strictly ascending.
        let keys: Vec<(Digest, u32)> = set
            .iter()
            .map(|t| (t.0.data.sender, t.0.data.sequence))
            .collect();
        let mut expected = vec![
            (first_sender, 1),
            (first_sender, 2),
            (other_sender, 1),
        ];
        if other_sender < first_sender {
            expected.rotate_right(1);
        }
        assert_eq!(keys, expected);
    }

    #[test]
    fn same_sender_same_sequence_both_kept() {
        let mut a = sample_tx(5);
        a.data.amount = 10;
        a.seal().unwrap();
        let mut b = sample_tx(5);
        b.data.amount = 20;
        b.seal().unwrap();

        let mut set = TransactionSet::new();
        set.insert(OrderedTx(Arc::new(a)));
        set.insert(OrderedTx(Arc::new(b)));
        assert_eq!(set.len(), 2);
    }
}
