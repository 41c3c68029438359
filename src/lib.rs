//! Validator node core: the deterministic replicated state machine each
//! committee member runs for FROST-style threshold-signing consensus.
//!
//! This crate is the pure protocol core (spec.md §1): the coordinator
//! contract, wallet/signer, RPC transport, log watcher and persistent
//! storage driver are external collaborators, specified here only at their
//! trait boundary (`events::EventSource`, `actions::ActionExecutor`,
//! `state::storage::KvStore`).

pub mod actions;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod error;
pub mod events;
pub mod frost;
pub mod merkle;
pub mod model;
pub mod state;
pub mod verification;

pub use error::{ProtocolError, Result};
