//! `StateDiff` (spec.md §4.6): the pure output of every event handler. A
//! handler never mutates shared state directly — it returns a diff, which
//! the storage layer then applies atomically, so a mid-apply crash can
//! never leave `consensus_state`/`machine_states` half-updated (spec.md §5).

use crate::actions::Action;
use crate::model::group::GroupId;
use crate::state::consensus::{EpochGroup, MessageHash, SignatureId};
use crate::state::rollover::RolloverState;
use crate::state::signing::SigningState;
use std::collections::BTreeMap;

/// Sparse patch over `ConsensusState`: every field is `None`/empty unless
/// this diff changes it.
#[derive(Clone, Debug, Default)]
pub struct ConsensusPatch {
	pub active_epoch: Option<u64>,
	pub staged_epoch: Option<u64>,
	pub genesis_group_id: Option<GroupId>,
	pub epoch_groups: BTreeMap<u64, EpochGroup>,
	pub group_pending_nonces: BTreeMap<GroupId, bool>,
	pub signature_id_to_message: BTreeMap<SignatureId, MessageHash>,
}

impl ConsensusPatch {
	pub fn is_empty(&self) -> bool {
		self.active_epoch.is_none()
			&& self.staged_epoch.is_none()
			&& self.genesis_group_id.is_none()
			&& self.epoch_groups.is_empty()
			&& self.group_pending_nonces.is_empty()
			&& self.signature_id_to_message.is_empty()
	}
}

/// What one event handler invocation produced (spec.md §4.6): at most one
/// rollover sub-machine update, any number of signing sub-machine
/// upserts/deletes, a sparse consensus patch, and zero or more actions to
/// enqueue for on-chain submission.
#[derive(Clone, Debug, Default)]
pub struct StateDiff {
	pub rollover: Option<RolloverState>,
	pub signing_upserts: BTreeMap<SignatureId, SigningState>,
	pub signing_deletes: Vec<SignatureId>,
	pub consensus: ConsensusPatch,
	pub actions: Vec<Action>,
}

impl StateDiff {
	pub fn empty() -> Self {
		StateDiff::default()
	}

	pub fn with_actions(actions: Vec<Action>) -> Self {
		StateDiff { actions, ..StateDiff::default() }
	}

	pub fn is_empty(&self) -> bool {
		self.rollover.is_none()
			&& self.signing_upserts.is_empty()
			&& self.signing_deletes.is_empty()
			&& self.consensus.is_empty()
			&& self.actions.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_diff_has_no_actions() {
		let diff = StateDiff::empty();
		assert!(diff.is_empty());
		assert!(diff.actions.is_empty());
	}

	#[test]
	fn with_actions_carries_them_through() {
		let diff = StateDiff::with_actions(vec![Action::ProposeEpoch { active_epoch: 0, proposed_epoch: 1 }]);
		assert!(!diff.is_empty());
		assert_eq!(diff.actions.len(), 1);
	}
}
