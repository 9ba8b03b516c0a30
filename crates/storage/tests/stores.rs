//! Integration tests against stores on disk.

use pqledger_storage::{AccountDelta, AddressStore, BalanceStore, BlocksStore};
use pqledger_types::account::AccountBalance;
use pqledger_types::block::{Block, GENESIS_BLOCK_ID};
use pqledger_types::transaction::{OrderedTx, Transaction, TransactionData, TX_VERSION};
use pqledger_types::Digest;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

fn sealed_tx(sender: &[u8], seq: u32, amount: u32) -> Transaction {
    let mut tx = Transaction {
        data: TransactionData {
            version: TX_VERSION,
            sequence: seq,
            amount,
            timestamp: 1_700_000_000,
            sender: Digest::sha512_of(sender).unwrap(),
            receiver: Digest::sha512_of(b"receiver").unwrap(),
        },
        id: Digest::ZERO,
        signature: vec![0x55; 80],
    };
    tx.seal().unwrap();
    tx
}

fn finalized_block() -> Block {
    let mut block = Block::genesis();
    block.header.sequence = 1;
    block.header.previous = *GENESIS_BLOCK_ID;
    block
        .body
        .transactions
        .insert(OrderedTx(Arc::new(sealed_tx(b"alice", 1, 10))));
    block.header.tx_root = block.tx_merkle_root().unwrap();
    block.header.account_root = Digest::sha512_of(b"accounts").unwrap();
    block.header.size = block.compute_size().unwrap();
    block
}

fn balance(key_tag: u8, amount: u32) -> (Digest, AccountBalance) {
    let bal = AccountBalance {
        public_key: vec![key_tag; 33],
        balance: amount,
        tx_sequence: 0,
    };
    (bal.account_id().unwrap(), bal)
}

#[test]
fn blocks_store_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = BlocksStore::open(dir.path().join("blocks.redb")).unwrap();

    let block = finalized_block();
    let id = store.put(&block).unwrap();
    assert_eq!(id, block.header.hash().unwrap());
    assert!(store.contains(&id).unwrap());

    let back = store.get(&id).unwrap().unwrap();
    assert_eq!(back.header, block.header);
    assert_eq!(back.body.transaction_count(), 1);

    assert!(store.get(&Digest::sha512_of(b"missing").unwrap()).unwrap().is_none());
    assert_eq!(store.headers().unwrap().len(), 1);
}

#[test]
fn open_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blocks.redb");
    {
        let store = BlocksStore::open(&path).unwrap();
        store.put(&finalized_block()).unwrap();
    }
    let reopened = BlocksStore::open(&path).unwrap();
    assert_eq!(reopened.headers().unwrap().len(), 1);
}

#[test]
fn balance_batch_write_is_atomic_and_ordered() {
    let dir = TempDir::new().unwrap();
    let store = BalanceStore::open(dir.path().join("balances.redb")).unwrap();
    assert!(store.is_empty().unwrap());

    let (id_a, bal_a) = balance(0x01, 10_000);
    let (id_b, bal_b) = balance(0x02, 0);
    store.put(&id_a, &bal_a).unwrap();
    store.put(&id_b, &bal_b).unwrap();

    let mut deltas = HashMap::new();
    deltas.insert(
        id_a,
        AccountDelta {
            balance_diff: -30,
            tx_sequence: 2,
        },
    );
    deltas.insert(
        id_b,
        AccountDelta {
            balance_diff: 30,
            tx_sequence: 0,
        },
    );
    store.apply_differences(&deltas).unwrap();

    let a = store.get(&id_a).unwrap().unwrap();
    let b = store.get(&id_b).unwrap().unwrap();
    assert_eq!(a.balance, 9_970);
    assert_eq!(a.tx_sequence, 2);
    assert_eq!(b.balance, 30);
    assert_eq!(b.tx_sequence, 0);
}

#[test]
fn balance_merkle_root_is_deterministic() {
    let dir_one = TempDir::new().unwrap();
    let dir_two = TempDir::new().unwrap();
    let first = BalanceStore::open(dir_one.path().join("balances.redb")).unwrap();
    let second = BalanceStore::open(dir_two.path().join("balances.redb")).unwrap();

    for store in [&first, &second] {
        let (id_a, bal_a) = balance(0x0a, 500);
        let (id_b, bal_b) = balance(0x0b, 700);
        // Insertion order must not matter; the scan is keyed.
        if std::ptr::eq(store, &first) {
            store.put(&id_a, &bal_a).unwrap();
            store.put(&id_b, &bal_b).unwrap();
        } else {
            store.put(&id_b, &bal_b).unwrap();
            store.put(&id_a, &bal_a).unwrap();
        }
    }
    assert_eq!(first.merkle_root().unwrap(), second.merkle_root().unwrap());

    // The empty store hashes to the empty-set root.
    let dir_three = TempDir::new().unwrap();
    let empty = BalanceStore::open(dir_three.path().join("balances.redb")).unwrap();
    assert_eq!(
        empty.merkle_root().unwrap(),
        Digest::sha512_of(b"").unwrap()
    );
}

#[test]
fn unknown_account_delta_is_skipped() {
    let dir = TempDir::new().unwrap();
    let store = BalanceStore::open(dir.path().join("balances.redb")).unwrap();
    let (id_a, bal_a) = balance(0x01, 100);
    store.put(&id_a, &bal_a).unwrap();

    let mut deltas = HashMap::new();
    deltas.insert(
        Digest::sha512_of(b"nobody").unwrap(),
        AccountDelta {
            balance_diff: 5,
            tx_sequence: 0,
        },
    );
    store.apply_differences(&deltas).unwrap();
    assert_eq!(store.all().unwrap().len(), 1);
}

#[test]
fn address_store_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = AddressStore::open(dir.path().join("addresses.redb")).unwrap();

    let id = Digest::sha512_of(b"peer").unwrap();
    assert!(store.get(&id).unwrap().is_none());

    let addrs = vec!["192.168.1.7".to_string(), "node.example".to_string()];
    store.put(&id, &addrs).unwrap();
    assert_eq!(store.get(&id).unwrap().unwrap(), addrs);

    // Past the cap, extra endpoints are truncated on write.
    let many: Vec<String> = (0..13).map(|i| format!("10.1.0.{i}")).collect();
    store.put(&id, &many).unwrap();
    assert_eq!(store.get(&id).unwrap().unwrap().len(), 10);
}
