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
//! The consensus subsystem: a deterministic, round-based voting protocol
//! over a Unique Node List.
//!
//! A round moves OPEN -> ESTABLISH -> ACCEPTED. In OPEN the node collects
//! transactions; in ESTABLISH it exchanges transaction-set positions with
//! its UNL peers and votes disputed transactions in or out; on agreement it
//! proposes the resulting block. Blocks gather tip-support in the chain
//! tree and execute once they pass the 80% quorum.

pub mod chain;
pub mod dispute;
pub mod engine;
pub mod executor;

pub use chain::ChainTree;
pub use engine::{ConsensusConfig, ConsensusHandle};
