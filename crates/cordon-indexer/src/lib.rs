//! Cordon Indexer - Reorg-safe event sourcing from the enforcement substrate
//!
//! The primary path queries a GraphQL indexer; the fallback paginates direct
//! substrate-log queries. A confirmation depth is subtracted from the tip
//! before processing, and a bounded block-hash cache detects reorgs: on a
//! hash mismatch at height `h` the source rewinds to `h - 1`, drops cached
//! hashes at and above `h`, and prunes the ledger store so the canonical
//! chain can be re-ingested (idempotent upserts make the replay safe).

pub mod client;
pub mod codec;
pub mod graphql;
pub mod parser;
pub mod rpc;
pub mod source;

pub use client::*;
pub use codec::*;
pub use graphql::*;
pub use parser::*;
pub use rpc::*;
pub use source::*;

use thiserror::Error;

/// Errors that can occur while sourcing events
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("RPC error: {message}")]
    Rpc { message: String },

    #[error("Indexer query failed: {message}")]
    Indexer { message: String },

    #[error("Failed to decode indexed event: {message}")]
    Decode { message: String },

    #[error("All {count} endpoints failed")]
    AllEndpointsFailed { count: usize },

    #[error(transparent)]
    Ledger(#[from] cordon_ledger::LedgerError),
}

pub type Result<T> = std::result::Result<T, IndexerError>;
