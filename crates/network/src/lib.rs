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
//! Peer networking for the pqledger node.
//!
//! A single tokio task owns the listening socket and every connection; it
//! accepts inbound peers, drains framed messages, serves the send and dial
//! request queues, and runs the VERSION/ACK handshake with deterministic
//! duplicate-connection resolution. Everything heavier than a handshake is
//! handed to the priority message-processor thread.

pub mod connection;
pub mod inventory;
pub mod manager;
pub mod processor;

pub use manager::{run_network, NetworkConfig};
pub use processor::{MessageProcessor, ProcessorQueue, QueueItem};
