//! Cordon Rebuilder - Acquired-balance reconstruction
//!
//! Reconstructs per-sub-account spending and acquired-balance state from a
//! chronological event log under the Acquired-Balance Model: output produced
//! by an operation paid from previously-acquired funds inherits the original
//! acquisition timestamp of the input that paid for it, so reusing acquired
//! tokens does not consume new allowance.
//!
//! The cost of getting this wrong is asymmetric. Overstating acquired
//! balances lets a sub-account spend past its allowance; understating them
//! burns allowance on round-trips. Every split here is exact: remainders from
//! integer truncation always land on a designated last entry, so amounts are
//! conserved to the unit.

pub mod deposit;
pub mod queue;
pub mod rebuild;
pub mod state;

pub use deposit::*;
pub use queue::*;
pub use rebuild::*;
pub use state::*;
