//! Balance-execution scenarios against a real store.
//!
//! The local wallet plays the receiver, so every transaction addressed to
//! it leaves a record whose state tracks execution.

use pqledger_consensus::executor::account_differences;
use pqledger_crypto::scheme_by_name;
use pqledger_storage::BalanceStore;
use pqledger_types::account::AccountBalance;
use pqledger_types::transaction::{
    OrderedTx, Transaction, TransactionData, TransactionSet, TX_VERSION,
};
use pqledger_types::Digest;
use pqledger_wallet::{TxState, Wallet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    balances: BalanceStore,
    wallet: Mutex<Wallet>,
    /// Account id of the local wallet (the receiver, "B").
    local_id: Digest,
    /// Fixed-key sender account "A", seeded with 10 000.
    sender: Digest,
}

fn fixture() -> Fixture {
    let scheme = scheme_by_name("ed25519").unwrap();
    let wallet = Wallet::generate(&scheme, vec![], vec![]).unwrap();
    let local_id = wallet.wallet_id();

    let dir = TempDir::new().unwrap();
    let balances = BalanceStore::open(dir.path().join("balances.redb")).unwrap();

    let sender_account = AccountBalance {
        public_key: vec![0xaa; 33],
        balance: 10_000,
        tx_sequence: 0,
    };
    let sender = sender_account.account_id().unwrap();
    balances.put(&sender, &sender_account).unwrap();

    let receiver_account = AccountBalance {
        public_key: wallet.public_key().to_vec(),
        balance: 0,
        tx_sequence: 0,
    };
    balances.put(&local_id, &receiver_account).unwrap();

    Fixture {
        _dir: dir,
        balances,
        wallet: Mutex::new(wallet),
        local_id,
        sender,
    }
}

fn tx(sender: Digest, receiver: Digest, amount: u32, seq: u32) -> OrderedTx {
    let mut tx = Transaction {
        data: TransactionData {
            version: TX_VERSION,
            sequence: seq,
            amount,
            timestamp: 1_700_000_000 + i64::from(seq),
            sender,
            receiver,
        },
        id: Digest::ZERO,
        signature: vec![0x33; 64],
    };
    tx.seal().unwrap();
    OrderedTx(Arc::new(tx))
}

#[test]
fn single_sender_chain_executes_in_order() {
    let fx = fixture();
    let mut set = TransactionSet::new();
    let t1 = tx(fx.sender, fx.local_id, 10, 1);
    let t2 = tx(fx.sender, fx.local_id, 20, 2);
    set.insert(t2.clone());
    set.insert(t1.clone());

    let deltas = account_differences(&fx.balances, &fx.wallet, &fx.local_id, &set).unwrap();
    fx.balances.apply_differences(&deltas).unwrap();

    let sender = fx.balances.get(&fx.sender).unwrap().unwrap();
    let receiver = fx.balances.get(&fx.local_id).unwrap().unwrap();
    assert_eq!(sender.balance, 9_970);
    assert_eq!(sender.tx_sequence, 2);
    assert_eq!(receiver.balance, 30);
    assert_eq!(receiver.tx_sequence, 0);

    let wallet = fx.wallet.lock().unwrap();
    assert_eq!(wallet.records()[&t1.0.id].state, TxState::Confirmed);
    assert_eq!(wallet.records()[&t2.0.id].state, TxState::Confirmed);
}

#[test]
fn duplicate_sequence_drops_both() {
    let fx = fixture();
    let third_party = Digest::sha512_of(b"third-party").unwrap();
    let mut set = TransactionSet::new();
    let t1 = tx(fx.sender, fx.local_id, 10, 1);
    let t1_conflict = tx(fx.sender, third_party, 10, 1);
    set.insert(t1.clone());
    set.insert(t1_conflict.clone());

    let deltas = account_differences(&fx.balances, &fx.wallet, &fx.local_id, &set).unwrap();
    fx.balances.apply_differences(&deltas).unwrap();

    let sender = fx.balances.get(&fx.sender).unwrap().unwrap();
    assert_eq!(sender.balance, 10_000);
    assert_eq!(sender.tx_sequence, 0);
    assert_eq!(fx.balances.get(&fx.local_id).unwrap().unwrap().balance, 0);

    let wallet = fx.wallet.lock().unwrap();
    assert_eq!(wallet.records()[&t1.0.id].state, TxState::Canceled);
}

#[test]
fn insufficient_balance_cancels_without_effect() {
    let fx = fixture();
    let mut poor = fx.balances.get(&fx.sender).unwrap().unwrap();
    poor.balance = 5;
    fx.balances.put(&fx.sender, &poor).unwrap();

    let mut set = TransactionSet::new();
    let t = tx(fx.sender, fx.local_id, 10, 1);
    set.insert(t.clone());

    let deltas = account_differences(&fx.balances, &fx.wallet, &fx.local_id, &set).unwrap();
    fx.balances.apply_differences(&deltas).unwrap();

    assert_eq!(fx.balances.get(&fx.sender).unwrap().unwrap().balance, 5);
    assert_eq!(fx.balances.get(&fx.local_id).unwrap().unwrap().balance, 0);
    let wallet = fx.wallet.lock().unwrap();
    assert_eq!(wallet.records()[&t.0.id].state, TxState::Canceled);
}

#[test]
fn replayed_sequence_is_cancelled() {
    let fx = fixture();
    let mut executed = fx.balances.get(&fx.sender).unwrap().unwrap();
    executed.tx_sequence = 3;
    fx.balances.put(&fx.sender, &executed).unwrap();

    let mut set = TransactionSet::new();
    set.insert(tx(fx.sender, fx.local_id, 10, 3));

    let deltas = account_differences(&fx.balances, &fx.wallet, &fx.local_id, &set).unwrap();
    assert!(deltas.is_empty());
}

#[test]
fn unknown_sender_is_skipped_silently() {
    let fx = fixture();
    let stranger = Digest::sha512_of(b"stranger").unwrap();
    let mut set = TransactionSet::new();
    set.insert(tx(stranger, fx.local_id, 10, 1));

    let deltas = account_differences(&fx.balances, &fx.wallet, &fx.local_id, &set).unwrap();
    assert!(deltas.is_empty());
    assert!(fx.wallet.lock().unwrap().records().is_empty());
}

#[test]
fn execution_is_deterministic_across_replays() {
    // Two nodes replaying the same ordered set over identical seed accounts
    // end with identical balances and account roots. Fixed keys keep the
    // account ids equal across both stores.
    let seed = |dir: &TempDir| {
        let balances = BalanceStore::open(dir.path().join("balances.redb")).unwrap();
        let a = AccountBalance {
            public_key: vec![0xaa; 33],
            balance: 1_000,
            tx_sequence: 0,
        };
        let b = AccountBalance {
            public_key: vec![0xbb; 33],
            balance: 60,
            tx_sequence: 0,
        };
        let (a_id, b_id) = (a.account_id().unwrap(), b.account_id().unwrap());
        balances.put(&a_id, &a).unwrap();
        balances.put(&b_id, &b).unwrap();
        (balances, a_id, b_id)
    };

    let scheme = scheme_by_name("ed25519").unwrap();
    let observer = Digest::sha512_of(b"observer").unwrap();

    let dir1 = TempDir::new().unwrap();
    let dir2 = TempDir::new().unwrap();
    let (store1, a, b) = seed(&dir1);
    let (store2, _, _) = seed(&dir2);

    let mut set = TransactionSet::new();
    set.insert(tx(a, b, 100, 1));
    set.insert(tx(a, b, 250, 2));
    set.insert(tx(b, a, 50, 1));

    for store in [&store1, &store2] {
        let wallet = Mutex::new(Wallet::generate(&scheme, vec![], vec![]).unwrap());
        let deltas = account_differences(store, &wallet, &observer, &set).unwrap();
        store.apply_differences(&deltas).unwrap();
    }

    assert_eq!(store1.merkle_root().unwrap(), store2.merkle_root().unwrap());
    assert_eq!(store1.get(&a).unwrap().unwrap().balance, 700);
    assert_eq!(store1.get(&b).unwrap().unwrap().balance, 360);
    assert_eq!(
        store1.get(&b).unwrap().unwrap().balance,
        store2.get(&b).unwrap().unwrap().balance,
    );
}
