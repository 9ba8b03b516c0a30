//! The address keyspace: account id -> endpoint list.
//!
//! Only the connection manager reads this store; it never participates in
//! any hash or consensus decision.

use pqledger_types::account::AccountAddresses;
use pqledger_types::codec::Encodable;
use pqledger_types::error::StorageError;
use pqledger_types::Digest;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;

const ADDRESSES: TableDefinition<&[u8; 64], &[u8]> = TableDefinition::new("ADDRESSES");

pub struct AddressStore {
    db: Database,
}

impl AddressStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(|e| StorageError::Backend(e.to_string()))?;
        let w = db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        w.open_table(ADDRESSES)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        w.commit().map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn get(&self, account_id: &Digest) -> Result<Option<Vec<String>>, StorageError> {
        let r = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = r
            .open_table(ADDRESSES)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let maybe = table
            .get(account_id.as_bytes())
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .map(|v| v.value().to_vec());
        match maybe {
            Some(bytes) => Ok(Some(AccountAddresses::decode_exact(&bytes)?.addresses)),
            None => Ok(None),
        }
    }

    pub fn put(&self, account_id: &Digest, addresses: &[String]) -> Result<(), StorageError> {
        let projection = AccountAddresses {
            addresses: addresses.to_vec(),
        };
        let bytes = projection.encode_to_vec()?;
        let w = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let mut table = w
                .open_table(ADDRESSES)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            table
                .insert(account_id.as_bytes(), bytes.as_slice())
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        w.commit().map_err(|e| StorageError::Backend(e.to_string()))
    }
}
