//! Protocol state (spec.md §3, §4.6): the shared consensus record, the
//! private per-validator key material, the two sub-machines, the diff type
//! that connects event handlers to storage, and the storage backings
//! themselves.

pub mod consensus;
pub mod diff;
pub mod keymaterial;
pub mod rollover;
pub mod signing;
pub mod storage;

pub use consensus::ConsensusState;
pub use diff::StateDiff;
pub use keymaterial::GroupKeyMaterial;
pub use rollover::RolloverState;
pub use signing::SigningState;
pub use storage::StorageBackend;
