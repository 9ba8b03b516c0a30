//! The balance keyspace: account id -> balance projection.

use pqledger_types::account::AccountBalance;
use pqledger_types::codec::Encodable;
use pqledger_types::error::StorageError;
use pqledger_types::merkle;
use pqledger_types::Digest;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

const BALANCES: TableDefinition<&[u8; 64], &[u8]> = TableDefinition::new("BALANCES");

/// Net effect of a finalized block on one account. A zero `tx_sequence`
/// leaves the stored sequence untouched (receiver-only accounts).
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountDelta {
    pub balance_diff: i64,
    pub tx_sequence: u32,
}

pub struct BalanceStore {
    db: Database,
}

impl BalanceStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(|e| StorageError::Backend(e.to_string()))?;
        let w = db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        w.open_table(BALANCES)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        w.commit().map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn get(&self, account_id: &Digest) -> Result<Option<AccountBalance>, StorageError> {
        let r = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = r
            .open_table(BALANCES)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let maybe = table
            .get(account_id.as_bytes())
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .map(|v| v.value().to_vec());
        match maybe {
            Some(bytes) => Ok(Some(AccountBalance::decode_exact(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, account_id: &Digest, balance: &AccountBalance) -> Result<(), StorageError> {
        let bytes = balance.encode_to_vec()?;
        let w = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let mut table = w
                .open_table(BALANCES)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            table
                .insert(account_id.as_bytes(), bytes.as_slice())
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        w.commit().map_err(|e| StorageError::Backend(e.to_string()))
    }

    /// Apply the per-account deltas of one executed block in a single write
    /// transaction. Deltas against unknown accounts are skipped with a
    /// warning; accounts are seeded at genesis and never removed.
    pub fn apply_differences(
        &self,
        deltas: &HashMap<Digest, AccountDelta>,
    ) -> Result<(), StorageError> {
        let w = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let mut table = w
                .open_table(BALANCES)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            for (account_id, delta) in deltas {
                let existing = table
                    .get(account_id.as_bytes())
                    .map_err(|e| StorageError::Backend(e.to_string()))?
                    .map(|v| v.value().to_vec());
                let Some(bytes) = existing else {
                    warn!(target: "storage", "balance delta for unknown account {}", account_id.short());
                    continue;
                };
                let mut balance = AccountBalance::decode_exact(&bytes)?;
                let updated = i64::from(balance.balance) + delta.balance_diff;
                let Ok(updated) = u32::try_from(updated) else {
                    warn!(target: "storage",
                        "balance delta for {} leaves range: {} {:+}",
                        account_id.short(), balance.balance, delta.balance_diff);
                    continue;
                };
                balance.balance = updated;
                if delta.tx_sequence != 0 {
                    balance.tx_sequence = delta.tx_sequence;
                }
                let encoded = balance.encode_to_vec()?;
                table
                    .insert(account_id.as_bytes(), encoded.as_slice())
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
            }
        }
        w.commit().map_err(|e| StorageError::Backend(e.to_string()))
    }

    /// Merkle root over every balance projection, scanned in account-id
    /// order. Each leaf binds the account id and its serialized projection.
    pub fn merkle_root(&self) -> Result<Digest, StorageError> {
        let r = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = r
            .open_table(BALANCES)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut leaves = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| StorageError::Backend(e.to_string()))?
        {
            let (k, v) = entry.map_err(|e| StorageError::Backend(e.to_string()))?;
            let mut preimage = Vec::with_capacity(64 + v.value().len());
            preimage.extend_from_slice(k.value());
            preimage.extend_from_slice(v.value());
            let leaf = Digest::sha512_of(&preimage)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            leaves.push(leaf);
        }
        merkle::merkle_root(&leaves).map_err(|e| StorageError::Backend(e.to_string()))
    }

    /// Every stored account, in key order. Operator surface.
    pub fn all(&self) -> Result<Vec<(Digest, AccountBalance)>, StorageError> {
        let r = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = r
            .open_table(BALANCES)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| StorageError::Backend(e.to_string()))?
        {
            let (k, v) = entry.map_err(|e| StorageError::Backend(e.to_string()))?;
            out.push((Digest::new(*k.value()), AccountBalance::decode_exact(v.value())?));
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        let r = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = r
            .open_table(BALANCES)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let empty = table
            .iter()
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .next()
            .is_none();
        Ok(empty)
    }
}
