//! The rollover sub-machine (spec.md §3, §4.2): at most one active at a
//! time, advancing through
//! `waiting_for_rollover -> collecting_commitments -> collecting_shares ->
//! collecting_confirmations -> sign_rollover -> waiting_for_rollover`.
//!
//! Represented as a tagged union with per-variant fields (spec.md §9 "sum
//! types over class hierarchies"), matching the teacher's `KeygenData`
//! enum-dispatch idiom (`client/keygen/keygen_data.rs`) generalised directly
//! onto this spec's own rollover states rather than the teacher's generic
//! ceremony stage machinery.

use crate::actions::Action;
use crate::frost::dkg::{CoefficientCommitments, ComplaintCounter};
use crate::model::group::GroupId;
use crate::model::participant::{ByParticipant, ParticipantId, ParticipantTable};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RolloverState {
	#[default]
	WaitingForRollover,
	CollectingCommitments(CollectingCommitments),
	CollectingShares(CollectingShares),
	CollectingConfirmations(CollectingConfirmations),
	SignRollover(SignRollover),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectingCommitments {
	pub group_id: GroupId,
	pub next_epoch: u64,
	pub deadline: u64,
	pub participants: ParticipantTable,
	pub commitments: ByParticipant<CoefficientCommitments>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectingShares {
	pub group_id: GroupId,
	pub next_epoch: u64,
	pub deadline: u64,
	pub participants: ParticipantTable,
	pub commitments: ByParticipant<CoefficientCommitments>,
	/// Per-dealer "secret-shared" completion flag (`KeyGenSecretShared.completed`).
	pub dealt: ByParticipant<bool>,
	/// Complaint bookkeeping keyed by accused participant (spec.md §4.2 round 3).
	pub complaints: ByParticipant<ComplaintCounter>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectingConfirmations {
	pub group_id: GroupId,
	pub next_epoch: u64,
	pub deadline: u64,
	pub participants: ParticipantTable,
	pub confirmed: ByParticipant<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRollover {
	pub group_id: GroupId,
	pub next_epoch: u64,
	pub deadline: u64,
	/// The signer obligated to submit `stageEpoch` once the signing
	/// sub-machine completes (spec.md glossary "Responsible signer").
	pub responsible_validator: ParticipantId,
}

impl RolloverState {
	pub fn deadline(&self) -> Option<u64> {
		match self {
			RolloverState::WaitingForRollover => None,
			RolloverState::CollectingCommitments(s) => Some(s.deadline),
			RolloverState::CollectingShares(s) => Some(s.deadline),
			RolloverState::CollectingConfirmations(s) => Some(s.deadline),
			RolloverState::SignRollover(s) => Some(s.deadline),
		}
	}

	pub fn group_id(&self) -> Option<GroupId> {
		match self {
			RolloverState::WaitingForRollover => None,
			RolloverState::CollectingCommitments(s) => Some(s.group_id),
			RolloverState::CollectingShares(s) => Some(s.group_id),
			RolloverState::CollectingConfirmations(s) => Some(s.group_id),
			RolloverState::SignRollover(s) => Some(s.group_id),
		}
	}
}

/// `KeyGen(gid, participants, count, threshold, context)`: start a fresh
/// DKG for `next_epoch` (spec.md §4.2 round 1, §6). Only valid from
/// `waiting_for_rollover`; any other current state ignores the event
/// (Invariant 3: at most one rollover sub-machine active).
pub fn on_key_gen(
	current: &RolloverState,
	group_id: GroupId,
	participants: ParticipantTable,
	next_epoch: u64,
	current_block: u64,
	keygen_timeout: u64,
	own_commitment: CoefficientCommitments,
	own_id: ParticipantId,
) -> Option<(RolloverState, Vec<Action>)> {
	if !matches!(current, RolloverState::WaitingForRollover) {
		return None;
	}

	let mut commitments = ByParticipant::new();
	commitments.insert(own_id, own_commitment.clone());

	let next = RolloverState::CollectingCommitments(CollectingCommitments {
		group_id,
		next_epoch,
		deadline: current_block + keygen_timeout,
		participants,
		commitments,
	});

	let action = Action::KeyGenAndCommit {
		group_id,
		commitment: bincode::serialize(&own_commitment).expect("commitment always serialises"),
	};

	Some((next, vec![action]))
}

/// `KeyGenCommitted(gid, identifier, commitment, committed)`. `committed`
/// is treated as the aggregate "all participants have committed" flag
/// (spec.md §9 Open Question 3), driving the transition directly into
/// `collecting_shares` once true.
pub fn on_key_gen_committed(
	current: &RolloverState,
	dealer: ParticipantId,
	commitment: CoefficientCommitments,
	committed: bool,
	own_id: ParticipantId,
	own_shares: impl FnOnce(&ByParticipant<CoefficientCommitments>) -> ByParticipant<Vec<u8>>,
) -> Option<(RolloverState, Vec<Action>)> {
	let RolloverState::CollectingCommitments(state) = current else { return None };

	let mut commitments = state.commitments.clone();
	commitments.insert(dealer, commitment);

	if !committed {
		return Some((RolloverState::CollectingCommitments(CollectingCommitments { commitments, ..state.clone() }), vec![]));
	}

	let shares = own_shares(&commitments);
	let mut actions: Vec<Action> = shares
		.into_iter()
		.filter(|(recipient, _)| *recipient != own_id)
		.map(|(recipient, share)| Action::KeyGenSecretShare { group_id: state.group_id, recipient, share })
		.collect();
	actions.sort_by_key(|a| match a {
		Action::KeyGenSecretShare { recipient, .. } => *recipient,
		_ => 0,
	});

	let mut dealt = ByParticipant::new();
	for id in state.participants.ids() {
		dealt.insert(id, false);
	}

	Some((
		RolloverState::CollectingShares(CollectingShares {
			group_id: state.group_id,
			next_epoch: state.next_epoch,
			deadline: state.deadline,
			participants: state.participants.clone(),
			commitments,
			dealt,
			complaints: ByParticipant::new(),
		}),
		actions,
	))
}

/// `KeyGenSecretShared(gid, identifier, share, completed)`: a dealer has
/// finished dealing shares to every peer.
pub fn on_key_gen_secret_shared(
	current: &RolloverState,
	dealer: ParticipantId,
	completed: bool,
) -> Option<(RolloverState, Vec<Action>)> {
	let RolloverState::CollectingShares(state) = current else { return None };
	if !completed {
		return Some((current.clone(), vec![]));
	}

	let mut dealt = state.dealt.clone();
	dealt.insert(dealer, true);

	let all_dealt = dealt.values().all(|v| *v);
	if !all_dealt {
		return Some((RolloverState::CollectingShares(CollectingShares { dealt, ..state.clone() }), vec![]));
	}

	let mut confirmed = ByParticipant::new();
	for id in state.participants.ids() {
		confirmed.insert(id, false);
	}

	Some((
		RolloverState::CollectingConfirmations(CollectingConfirmations {
			group_id: state.group_id,
			next_epoch: state.next_epoch,
			deadline: state.deadline,
			participants: state.participants.clone(),
			confirmed,
		}),
		vec![],
	))
}

/// `KeyGenComplained(gid, plaintiff, accused)`: a receiver's verification
/// of a dealt share failed (spec.md §4.2 round 3).
pub fn on_key_gen_complained(current: &RolloverState, accused: ParticipantId) -> Option<(RolloverState, Vec<Action>)> {
	let RolloverState::CollectingShares(state) = current else { return None };

	let mut complaints = state.complaints.clone();
	complaints.entry(accused).or_default().record_complaint();

	Some((RolloverState::CollectingShares(CollectingShares { complaints, ..state.clone() }), vec![]))
}

pub fn on_key_gen_complaint_responded(
	current: &RolloverState,
	accused: ParticipantId,
) -> Option<(RolloverState, Vec<Action>)> {
	let RolloverState::CollectingShares(state) = current else { return None };

	let mut complaints = state.complaints.clone();
	if let Some(counter) = complaints.get_mut(&accused) {
		counter.record_response();
	}

	Some((RolloverState::CollectingShares(CollectingShares { complaints, ..state.clone() }), vec![]))
}

/// If any accused participant's complaint count reaches threshold, the DKG
/// restarts excluding them (spec.md §4.2 round 3, S5). Call once per block
/// after processing complaint/response events, with the current block so
/// the complaint deadline can also be checked.
pub fn check_complaint_cascade(
	current: &RolloverState,
	current_block: u64,
	complaint_deadline: u64,
) -> Option<ParticipantTable> {
	let RolloverState::CollectingShares(state) = current else { return None };
	if current_block < complaint_deadline {
		return None;
	}

	let excluded: Vec<ParticipantId> = state
		.complaints
		.iter()
		.filter(|(_, counter)| counter.exceeds_threshold(state.participants.threshold()) && counter.unresponded > 0)
		.map(|(&accused, _)| accused)
		.collect();

	if excluded.is_empty() {
		return None;
	}

	let remaining: Vec<ParticipantId> =
		state.participants.ids().filter(|id| !excluded.contains(id)).collect();
	Some(state.participants.restricted_to(&remaining))
}

/// `KeyGenConfirmed(gid, identifier)`: all confirmations in installs the
/// group key and hands off to the signing sub-machine for the rollover
/// attestation (spec.md §4.2 "Confirmation", transitions to `sign_rollover`).
pub fn on_key_gen_confirmed(
	current: &RolloverState,
	confirmer: ParticipantId,
	responsible_validator: ParticipantId,
) -> Option<(RolloverState, Vec<Action>)> {
	let RolloverState::CollectingConfirmations(state) = current else { return None };

	let mut confirmed = state.confirmed.clone();
	confirmed.insert(confirmer, true);

	if !confirmed.values().all(|v| *v) {
		return Some((RolloverState::CollectingConfirmations(CollectingConfirmations { confirmed, ..state.clone() }), vec![]));
	}

	Some((
		RolloverState::SignRollover(SignRollover {
			group_id: state.group_id,
			next_epoch: state.next_epoch,
			deadline: state.deadline,
			responsible_validator,
		}),
		vec![],
	))
}

/// `EpochStaged`: the rollover attestation's signing session has completed
/// and `stageEpoch` landed on-chain. Returns to `waiting_for_rollover`.
pub fn on_epoch_staged(current: &RolloverState) -> Option<RolloverState> {
	matches!(current, RolloverState::SignRollover(_)).then_some(RolloverState::WaitingForRollover)
}

/// Deadline expiry in any non-terminal state aborts and restarts DKG for
/// the same `nextEpoch` (spec.md §4.2).
pub fn on_deadline_expired(current: &RolloverState, current_block: u64) -> Option<RolloverState> {
	if current.deadline().is_some_and(|d| current_block > d) {
		Some(RolloverState::WaitingForRollover)
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Rng;
	use ethereum_types::Address;
	use rand::SeedableRng;

	fn participants(n: u8) -> ParticipantTable {
		ParticipantTable::from_ordered_addresses((1..=n).map(|i| Address::from([i; 20])).collect())
	}

	#[test]
	fn complaint_cascade_excludes_accused_once_threshold_and_deadline_pass() {
		let table = participants(3);
		let mut commitments = ByParticipant::new();
		let mut rng = Rng::from_seed([1; 32]);
		for id in table.ids() {
			let (_poly, c) = crate::frost::dkg::round1(id, table.threshold(), b"tag", &mut rng);
			commitments.insert(id, c);
		}

		let mut complaints = ByParticipant::new();
		let mut counter = ComplaintCounter::default();
		counter.record_complaint();
		counter.record_complaint();
		complaints.insert(2, counter);

		let state = RolloverState::CollectingShares(CollectingShares {
			group_id: [0; 32],
			next_epoch: 1,
			deadline: 100,
			participants: table.clone(),
			commitments,
			dealt: ByParticipant::new(),
			complaints,
		});

		assert!(check_complaint_cascade(&state, 50, 100).is_none());
		let restricted = check_complaint_cascade(&state, 150, 100).expect("cascade should trigger");
		assert_eq!(restricted.count(), 2);
		assert!(restricted.id_of(&Address::from([2; 20])).is_none());
	}

	#[test]
	fn deadline_expiry_resets_to_waiting() {
		let state = RolloverState::SignRollover(SignRollover { group_id: [0; 32], next_epoch: 1, deadline: 10, responsible_validator: 1 });
		assert_eq!(on_deadline_expired(&state, 5), None);
		assert_eq!(on_deadline_expired(&state, 11), Some(RolloverState::WaitingForRollover));
	}
}
