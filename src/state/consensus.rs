//! `ConsensusState` (spec.md §3): the mutable, persisted record of which
//! group backs which epoch, and the stable `sigId -> messageHash` lookup
//! that survives reorgs (spec.md §9 Open Question 2).

use crate::model::group::GroupId;
use crate::model::participant::ParticipantId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type SignatureId = [u8; 32];
pub type MessageHash = [u8; 32];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusState {
	pub active_epoch: u64,
	pub staged_epoch: u64,
	pub genesis_group_id: Option<GroupId>,
	pub epoch_groups: BTreeMap<u64, EpochGroup>,
	pub group_pending_nonces: BTreeMap<GroupId, bool>,
	pub signature_id_to_message: BTreeMap<SignatureId, MessageHash>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochGroup {
	pub group_id: GroupId,
	pub participant_id: ParticipantId,
}

impl ConsensusState {
	/// Invariant 2 (spec.md §3): `activeEpoch <= stagedEpoch` at all times.
	pub fn check_invariants(&self) -> bool {
		self.active_epoch <= self.staged_epoch
	}
}
