//! Bidirectional customer synchronization engine.
//!
//! # Responsibility
//! - Carry local mutations to the remote directory and remote changes to the
//!   local store through one partitioned channel.
//! - Keep the identity map as the only correlation between the two sides.
//!
//! # Invariants
//! - Every envelope names a direction and travels on its operation's lane.
//! - Remote-origin mutations are never published back (echo suppression).
//! - Live traffic and reconciliation share one apply path.

pub mod channel;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod locks;
pub mod publisher;
pub mod reconcile;
pub mod remote;
pub mod runtime;
pub mod webhook;
