//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define data access contracts for the local store and identity map.
//! - Isolate SQLite query details from sync orchestration.
//!
//! # Invariants
//! - Repository writes enforce `CustomerFields::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`) in
//!   addition to DB transport errors.

pub mod customer_repo;
pub mod identity_repo;
