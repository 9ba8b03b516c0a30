//! Balance execution for a finalized transaction set.
//!
//! The set arrives in canonical (sender, sequence) order, so each sender's
//! transactions form one contiguous run. Execution walks the run with a
//! running balance and sequence: duplicate-sequence pairs from one sender
//! drop together, anything overdrawing or replaying is cancelled, and the
//! rest accumulates into per-account deltas applied as one batch write.

use pqledger_storage::{AccountDelta, BalanceStore};
use pqledger_types::error::ConsensusError;
use pqledger_types::transaction::{TransactionSet, TxPtr};
use pqledger_types::Digest;
use pqledger_wallet::{TxState, Wallet};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

fn notify_wallet(wallet: &Mutex<Wallet>, local_id: &Digest, tx: &TxPtr, state: TxState) {
    let Ok(mut wallet) = wallet.lock() else {
        warn!(target: "consensus", "wallet lock poisoned; dropping notification");
        return;
    };
    if tx.data.sender == *local_id {
        wallet.update_record(&tx.id, state);
    } else if tx.data.receiver == *local_id {
        wallet.record_received(tx.id, tx.data, state);
    }
}

/// Validate `set` against current balances and produce the per-account
/// deltas of the surviving transactions. The wallet learns the fate of every
/// transaction that touches this node.
pub fn account_differences(
    balances: &BalanceStore,
    wallet: &Mutex<Wallet>,
    local_id: &Digest,
    set: &TransactionSet,
) -> Result<HashMap<Digest, AccountDelta>, ConsensusError> {
    let txs: Vec<&TxPtr> = set.iter().map(|t| &t.0).collect();
    let mut deltas: HashMap<Digest, AccountDelta> = HashMap::new();

    let mut current_sender: Option<Digest> = None;
    let mut running_balance: u32 = 0;
    let mut running_sequence: u32 = 0;

    let mut i = 0;
    while let Some(tx) = txs.get(i).copied() {
        // Consecutive transactions from one sender with one sequence number
        // are inconsistent proposals from the same account: drop the run.
        let mut run_end = i + 1;
        while txs
            .get(run_end)
            .map(|next| {
                next.data.sender == tx.data.sender && next.data.sequence == tx.data.sequence
            })
            .unwrap_or(false)
        {
            run_end += 1;
        }
        if run_end > i + 1 {
            debug!(target: "consensus",
                "dropping {} transactions from {} with duplicate sequence {}",
                run_end - i, tx.data.sender.short(), tx.data.sequence);
            for dropped in txs.get(i..run_end).unwrap_or(&[]) {
                notify_wallet(wallet, local_id, dropped, TxState::Canceled);
            }
            i = run_end;
            continue;
        }

        if current_sender != Some(tx.data.sender) {
            match balances.get(&tx.data.sender)? {
                Some(balance) => {
                    current_sender = Some(tx.data.sender);
                    running_balance = balance.balance;
                    running_sequence = balance.tx_sequence;
                }
                None => {
                    warn!(target: "consensus",
                        "transaction {} skipped: unknown sender {}",
                        tx.id.short(), tx.data.sender.short());
                    i += 1;
                    continue;
                }
            }
        }

        if running_balance < tx.data.amount {
            debug!(target: "consensus",
                "transaction {} cancelled: sender {} is short {}",
                tx.id.short(), tx.data.sender.short(),
                tx.data.amount - running_balance);
            notify_wallet(wallet, local_id, tx, TxState::Canceled);
            i += 1;
            continue;
        }
        if tx.data.sequence <= running_sequence {
            debug!(target: "consensus",
                "transaction {} cancelled: sequence {} not beyond {}",
                tx.id.short(), tx.data.sequence, running_sequence);
            notify_wallet(wallet, local_id, tx, TxState::Canceled);
            i += 1;
            continue;
        }

        running_balance -= tx.data.amount;
        running_sequence = tx.data.sequence;

        let sender = deltas.entry(tx.data.sender).or_default();
        sender.balance_diff -= i64::from(tx.data.amount);
        sender.tx_sequence = tx.data.sequence;
        let receiver = deltas.entry(tx.data.receiver).or_default();
        receiver.balance_diff += i64::from(tx.data.amount);

        notify_wallet(wallet, local_id, tx, TxState::Confirmed);
        i += 1;
    }

    Ok(deltas)
}
