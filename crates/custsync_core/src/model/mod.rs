//! Domain model for synchronized customer records.
//!
//! # Responsibility
//! - Define the local-side customer entity and its mutable field set.
//! - Own field validation shared by the local API and the sync dispatcher.
//!
//! # Invariants
//! - Every local customer is identified by a stable `LocalId`.
//! - The local entity never carries the external identifier; correlation
//!   lives in the identity map.

pub mod customer;
