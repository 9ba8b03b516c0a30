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
//! The local wallet: key material, the UNL, and the record of every
//! transaction this node sent or received.

pub mod config;

use pqledger_crypto::SchemeHandle;
use pqledger_types::codec::Encodable as _;
use pqledger_types::error::CodecError;
use pqledger_types::transaction::{Transaction, TransactionData, TxPtr, TX_VERSION};
use pqledger_types::Digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("crypto error: {0}")]
    Crypto(#[from] pqledger_crypto::CryptoError),
}

/// Lifecycle of a transaction from this wallet's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    /// Created or observed, not yet in a finalized block.
    Waiting,
    /// Executed inside a finalized block.
    Confirmed,
    /// Rejected during block execution.
    Canceled,
}

/// One tracked transaction.
#[derive(Debug, Clone, Copy)]
pub struct TxRecord {
    pub data: TransactionData,
    pub state: TxState,
}

/// The local wallet. Holds the node's long-term keys, the UNL, and the
/// transaction records block execution updates.
pub struct Wallet {
    secret_key: Vec<u8>,
    public_key: Vec<u8>,
    wallet_id: Digest,
    addresses: Vec<String>,
    unl: Vec<Digest>,
    records: BTreeMap<Digest, TxRecord>,
    next_sequence: u32,
}

impl Wallet {
    /// Build a wallet around existing key material.
    pub fn new(
        secret_key: Vec<u8>,
        public_key: Vec<u8>,
        addresses: Vec<String>,
        unl: Vec<Digest>,
    ) -> Result<Wallet, WalletError> {
        if public_key.is_empty() {
            return Err(WalletError::Config("public key is empty".into()));
        }
        let wallet_id = Digest::sha512_of(&public_key)?;
        Ok(Wallet {
            secret_key,
            public_key,
            wallet_id,
            addresses,
            unl,
            records: BTreeMap::new(),
            next_sequence: 1,
        })
    }

    /// Generate fresh keys with the active scheme.
    pub fn generate(
        scheme: &SchemeHandle,
        addresses: Vec<String>,
        unl: Vec<Digest>,
    ) -> Result<Wallet, WalletError> {
        let (secret_key, public_key) = scheme.generate_keypair()?;
        info!(target: "wallet", "generated a new {} key pair", scheme.name());
        Wallet::new(secret_key, public_key, addresses, unl)
    }

    pub fn wallet_id(&self) -> Digest {
        self.wallet_id
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn unl(&self) -> &[Digest] {
        &self.unl
    }

    pub fn unl_count(&self) -> u32 {
        self.unl.len() as u32
    }

    /// Restore the per-sender sequence counter, e.g. from the stored
    /// balance projection after a restart.
    pub fn resume_sequence(&mut self, last_executed: u32) {
        self.next_sequence = self.next_sequence.max(last_executed + 1);
    }

    /// Create, seal, sign, and record a new transaction.
    pub fn create_transaction(
        &mut self,
        scheme: &SchemeHandle,
        receiver: Digest,
        amount: u32,
    ) -> Result<TxPtr, WalletError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let mut tx = Transaction {
            data: TransactionData {
                version: TX_VERSION,
                sequence: self.next_sequence,
                amount,
                timestamp,
                sender: self.wallet_id,
                receiver,
            },
            id: Digest::ZERO,
            signature: Vec::new(),
        };
        tx.seal()?;
        tx.sign(scheme.as_ref(), &self.secret_key)?;
        self.next_sequence += 1;
        self.records.insert(
            tx.id,
            TxRecord {
                data: tx.data,
                state: TxState::Waiting,
            },
        );
        debug!(target: "wallet", "created transaction {} (seq {})", tx.id.short(), tx.data.sequence);
        Ok(Arc::new(tx))
    }

    /// Move a sent transaction's record to a new state. Unknown ids are
    /// ignored.
    pub fn update_record(&mut self, tx_id: &Digest, state: TxState) {
        if let Some(record) = self.records.get_mut(tx_id) {
            record.state = state;
            debug!(target: "wallet", "transaction {} is now {:?}", tx_id.short(), state);
        }
    }

    /// Record a transaction addressed to this wallet.
    pub fn record_received(&mut self, tx_id: Digest, data: TransactionData, state: TxState) {
        self.records
            .entry(tx_id)
            .and_modify(|r| r.state = state)
            .or_insert(TxRecord { data, state });
        debug!(target: "wallet", "received transaction {} is {:?}", tx_id.short(), state);
    }

    /// All records, keyed by transaction id.
    pub fn records(&self) -> &BTreeMap<Digest, TxRecord> {
        &self.records
    }

    /// Encode a record's transaction body. Operator surface.
    pub fn record_bytes(&self, tx_id: &Digest) -> Result<Option<Vec<u8>>, WalletError> {
        match self.records.get(tx_id) {
            Some(record) => Ok(Some(record.data.encode_to_vec()?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqledger_crypto::scheme_by_name;

    fn test_wallet() -> (Wallet, SchemeHandle) {
        let scheme = scheme_by_name("ed25519").unwrap();
        let wallet = Wallet::generate(&scheme, vec!["127.0.0.1".into()], vec![]).unwrap();
        (wallet, scheme)
    }

    #[test]
    fn wallet_id_is_key_digest() {
        let (wallet, _) = test_wallet();
        assert_eq!(
            wallet.wallet_id(),
            Digest::sha512_of(wallet.public_key()).unwrap()
        );
    }

    #[test]
    fn created_transactions_use_strict_sequences() {
        let (mut wallet, scheme) = test_wallet();
        let receiver = Digest::sha512_of(b"receiver").unwrap();
        let t1 = wallet.create_transaction(&scheme, receiver, 10).unwrap();
        let t2 = wallet.create_transaction(&scheme, receiver, 20).unwrap();
        assert_eq!(t1.data.sequence, 1);
        assert_eq!(t2.data.sequence, 2);
        assert!(t1.check_structure());
        assert_eq!(wallet.records().len(), 2);
        assert_eq!(wallet.records()[&t1.id].state, TxState::Waiting);
    }

    #[test]
    fn records_move_through_states() {
        let (mut wallet, scheme) = test_wallet();
        let receiver = Digest::sha512_of(b"receiver").unwrap();
        let tx = wallet.create_transaction(&scheme, receiver, 10).unwrap();

        wallet.update_record(&tx.id, TxState::Confirmed);
        assert_eq!(wallet.records()[&tx.id].state, TxState::Confirmed);

        // Unknown ids are a no-op.
        wallet.update_record(&Digest::sha512_of(b"nope").unwrap(), TxState::Canceled);
        assert_eq!(wallet.records().len(), 1);
    }

    #[test]
    fn resume_sequence_never_regresses() {
        let (mut wallet, scheme) = test_wallet();
        wallet.resume_sequence(41);
        let receiver = Digest::sha512_of(b"receiver").unwrap();
        let tx = wallet.create_transaction(&scheme, receiver, 1).unwrap();
        assert_eq!(tx.data.sequence, 42);

        wallet.resume_sequence(5);
        let tx = wallet.create_transaction(&scheme, receiver, 1).unwrap();
        assert_eq!(tx.data.sequence, 43);
    }
}
