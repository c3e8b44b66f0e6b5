//! Shared error kinds for the type layer
//!
//! Component crates define their own error enums; only failures that belong
//! to the types themselves (bitmap construction, event integrity) live here.

use thiserror::Error;

/// Errors raised while constructing or validating domain types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CordonTypeError {
    #[error("Invalid transfer type {transfer_type} (max 7)")]
    InvalidTransferType { transfer_type: u8 },

    #[error("Malformed event: {context} arrays out of step ({left} vs {right})")]
    LengthMismatch {
        context: &'static str,
        left: usize,
        right: usize,
    },
}

pub type Result<T> = std::result::Result<T, CordonTypeError>;
