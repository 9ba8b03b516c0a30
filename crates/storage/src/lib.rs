#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]
//! Persistent storage for the pqledger node.
//!
//! Three redb keyspaces, one per concern: serialized blocks keyed by block
//! id, account balance projections keyed by account id, and account address
//! projections keyed by account id. Keys are raw digests. Opening a store is
//! idempotent; the first open creates it. Multi-account balance updates go
//! through a single write transaction so block execution is atomic.

pub mod accounts;
pub mod addresses;
pub mod blocks;

pub use accounts::{AccountDelta, BalanceStore};
pub use addresses::AddressStore;
pub use blocks::BlocksStore;
