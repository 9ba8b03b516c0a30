//! The blocks keyspace: block id -> serialized block.

use pqledger_types::block::{Block, BlockHeader};
use pqledger_types::codec::Encodable;
use pqledger_types::error::StorageError;
use pqledger_types::Digest;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;

const BLOCKS: TableDefinition<&[u8; 64], &[u8]> = TableDefinition::new("BLOCKS");

pub struct BlocksStore {
    db: Database,
}

impl BlocksStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(|e| StorageError::Backend(e.to_string()))?;
        let w = db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        w.open_table(BLOCKS)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        w.commit().map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self { db })
    }

    /// Serialized block bytes, if present.
    pub fn get_raw(&self, block_id: &Digest) -> Result<Option<Vec<u8>>, StorageError> {
        let r = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = r
            .open_table(BLOCKS)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let out = table
            .get(block_id.as_bytes())
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .map(|v| v.value().to_vec());
        Ok(out)
    }

    /// Decoded block, if present.
    pub fn get(&self, block_id: &Digest) -> Result<Option<Block>, StorageError> {
        match self.get_raw(block_id)? {
            Some(bytes) => Ok(Some(Block::decode_exact(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, block_id: &Digest) -> Result<bool, StorageError> {
        Ok(self.get_raw(block_id)?.is_some())
    }

    /// Persist a block under the hash of its (finalized) header.
    pub fn put(&self, block: &Block) -> Result<Digest, StorageError> {
        let id = block.header.hash()?;
        let bytes = block.encode_to_vec()?;
        self.put_raw(&id, &bytes)?;
        Ok(id)
    }

    pub fn put_raw(&self, block_id: &Digest, bytes: &[u8]) -> Result<(), StorageError> {
        let w = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let mut table = w
                .open_table(BLOCKS)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            table
                .insert(block_id.as_bytes(), bytes)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        w.commit().map_err(|e| StorageError::Backend(e.to_string()))
    }

    /// All stored block headers with their ids, in key order. Operator
    /// surface; blocks are not scanned on any hot path.
    pub fn headers(&self) -> Result<Vec<(Digest, BlockHeader)>, StorageError> {
        let r = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let table = r
            .open_table(BLOCKS)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| StorageError::Backend(e.to_string()))?
        {
            let (k, v) = entry.map_err(|e| StorageError::Backend(e.to_string()))?;
            let id = Digest::new(*k.value());
            let mut offset = 0;
            let header = BlockHeader::decode_from(v.value(), &mut offset)?;
            out.push((id, header));
        }
        Ok(out)
    }
}
