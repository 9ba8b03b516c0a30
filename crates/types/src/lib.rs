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
//! Core data objects for the pqledger node.
//!
//! Everything consensus-critical lives here: the 512-bit digest, the
//! deterministic little-endian codec, transactions, blocks, account
//! projections, consensus proposals, the wire message envelope, and the
//! domain error types. All serialization is densely packed and identical
//! across nodes; two nodes encoding the same object always produce the same
//! bytes.

pub mod account;
pub mod block;
pub mod codec;
pub mod digest;
pub mod error;
pub mod merkle;
pub mod message;
pub mod proposal;
pub mod transaction;

pub use digest::{Digest, DIGEST_LEN};
