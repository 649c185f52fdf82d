//! Microgig Types - Canonical domain types for the gig-work lifecycle engine
//!
//! This crate contains all foundational types with zero dependencies on other
//! microgig crates. It defines the type system for:
//!
//! - Identity types (UserId, JobId, ReservationId, WorkProofId, EntryId)
//! - Job, Reservation and WorkProof state machines
//! - Ledger entry and balance types
//! - Fee schedule types and the fee formula
//! - The shared error taxonomy
//!
//! # Architectural Invariants
//!
//! 1. For a given job, at most one reservation is Active at any instant
//! 2. Ledger entries are append-only, never edited or removed
//! 3. The signed sum of a user's entries equals available + escrow held
//! 4. Terminal states are terminal - no transition leaves them

pub mod error;
pub mod fees;
pub mod id;
pub mod job;
pub mod ledger;
pub mod reservation;
pub mod work_proof;

pub use error::*;
pub use fees::*;
pub use id::*;
pub use job::*;
pub use ledger::*;
pub use reservation::*;
pub use work_proof::*;

/// Version of the microgig types schema
pub const TYPES_VERSION: &str = "0.1.0";
