//! The per-message signing sub-machine (spec.md §3, §4.3): one instance per
//! `signatureId`, advancing through
//! `waiting_for_request -> collect_nonce_commitments -> collect_signing_shares
//! -> waiting_for_attestation`, then removed once attested.
//!
//! A signing session is only ever created for a message hash the
//! verification engine has already accepted (spec.md §8 property 7) — the
//! driver, not this module, enforces that gate before calling
//! [`SigningState::start`].

use crate::crypto::field::Scalar;
use crate::crypto::Point;
use crate::frost::signing;
use crate::model::group::GroupId;
use crate::model::participant::{ByParticipant, ParticipantId};
use crate::state::consensus::{MessageHash, SignatureId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SigningState {
	#[default]
	WaitingForRequest,
	CollectNonceCommitments(CollectNonceCommitments),
	CollectSigningShares(CollectSigningShares),
	WaitingForAttestation(WaitingForAttestation),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectNonceCommitments {
	pub signature_id: SignatureId,
	pub message_hash: MessageHash,
	pub group_id: GroupId,
	pub deadline: u64,
	pub signers: Vec<ParticipantId>,
	/// `(D, E)` commitment pairs revealed so far, by signer.
	pub commitments: ByParticipant<(Point, Point)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectSigningShares {
	pub signature_id: SignatureId,
	pub message_hash: MessageHash,
	pub group_id: GroupId,
	pub deadline: u64,
	pub signers: Vec<ParticipantId>,
	pub commitments: ByParticipant<(Point, Point)>,
	pub shares: ByParticipant<Scalar>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingForAttestation {
	pub signature_id: SignatureId,
	pub message_hash: MessageHash,
	pub group_id: GroupId,
	pub deadline: u64,
	pub aggregate_z: Scalar,
	pub aggregate_r: Point,
}

impl SigningState {
	pub fn deadline(&self) -> Option<u64> {
		match self {
			SigningState::WaitingForRequest => None,
			SigningState::CollectNonceCommitments(s) => Some(s.deadline),
			SigningState::CollectSigningShares(s) => Some(s.deadline),
			SigningState::WaitingForAttestation(s) => Some(s.deadline),
		}
	}
}

/// `Sign(sigId, messageHash, groupId, signers)`: open a new signing session.
/// The caller must already have verified `messageHash` via the verification
/// engine's cache (spec.md §4.4, §8 property 7); this module does not
/// re-check that.
pub fn start(
	signature_id: SignatureId,
	message_hash: MessageHash,
	group_id: GroupId,
	signers: Vec<ParticipantId>,
	current_block: u64,
	signing_timeout: u64,
) -> (SigningState, ()) {
	(
		SigningState::CollectNonceCommitments(CollectNonceCommitments {
			signature_id,
			message_hash,
			group_id,
			deadline: current_block + signing_timeout,
			signers,
			commitments: ByParticipant::new(),
		}),
		(),
	)
}

/// `SignRevealedNonces(sigId, identifier, d, e, proof)`: a signer has
/// revealed its nonce-tree leaf. The proof itself is checked by the driver
/// against the committed nonce-tree root before this transition runs; here
/// we only track which signers have responded.
pub fn on_nonce_revealed(
	current: &SigningState,
	signer: ParticipantId,
	d: Point,
	e: Point,
) -> Option<SigningState> {
	let SigningState::CollectNonceCommitments(state) = current else { return None };
	if !state.signers.contains(&signer) {
		return None;
	}

	let mut commitments = state.commitments.clone();
	commitments.insert(signer, (d, e));

	if commitments.len() == state.signers.len() {
		Some(SigningState::CollectSigningShares(CollectSigningShares {
			signature_id: state.signature_id,
			message_hash: state.message_hash,
			group_id: state.group_id,
			deadline: state.deadline,
			signers: state.signers.clone(),
			commitments,
			shares: ByParticipant::new(),
		}))
	} else {
		Some(SigningState::CollectNonceCommitments(CollectNonceCommitments { commitments, ..state.clone() }))
	}
}

/// `SignShared(sigId, identifier, zᵢ)`: a signer's signature share, already
/// locally verified by the caller against its committed `Rᵢ` (spec.md §4.3).
/// Once every signer's share has landed, aggregates into the final
/// signature and hands off to `waiting_for_attestation`.
pub fn on_share_received(
	current: &SigningState,
	group_pubkey: &Point,
	verification_shares: &ByParticipant<Point>,
	signer: ParticipantId,
	z_i: Scalar,
) -> Option<SigningState> {
	let SigningState::CollectSigningShares(state) = current else { return None };
	if !state.signers.contains(&signer) {
		return None;
	}

	let mut shares = state.shares.clone();
	shares.insert(signer, z_i);

	if shares.len() < state.signers.len() {
		return Some(SigningState::CollectSigningShares(CollectSigningShares { shares, ..state.clone() }));
	}

	let group_commitment: Point = state
		.signers
		.iter()
		.map(|id| {
			let (d, e) = state.commitments[id];
			let rho = signing::binding_factor(
				group_pubkey,
				&state.signers,
				&state.signers.iter().map(|s| state.commitments[s]).collect::<Vec<_>>(),
				&state.message_hash,
				*id,
			);
			signing::signer_commitment(d, e, &rho)
		})
		.sum();

	let c = signing::challenge(&group_commitment, group_pubkey, &state.message_hash);

	for (&id, z_i) in &shares {
		let lambda = signing::lagrange_coefficient(&state.signers, id);
		let (d, e) = state.commitments[&id];
		let rho = signing::binding_factor(
			group_pubkey,
			&state.signers,
			&state.signers.iter().map(|s| state.commitments[s]).collect::<Vec<_>>(),
			&state.message_hash,
			id,
		);
		let r_i = signing::signer_commitment(d, e, &rho);
		let y_i = verification_shares[&id];
		if !signing::verify_share(z_i, &r_i, &lambda, &c, &y_i) {
			// An invalid share is dropped silently by the caller's gating
			// logic; the driver reports it and the session continues to
			// wait (or times out) rather than aborting the whole group.
			return Some(SigningState::CollectSigningShares(CollectSigningShares { shares, ..state.clone() }));
		}
	}

	let z = signing::aggregate(shares.into_values());

	Some(SigningState::WaitingForAttestation(WaitingForAttestation {
		signature_id: state.signature_id,
		message_hash: state.message_hash,
		group_id: state.group_id,
		deadline: state.deadline,
		aggregate_z: z,
		aggregate_r: group_commitment,
	}))
}

/// `TransactionAttested`/`EpochStaged`-equivalent confirmation that the
/// aggregate signature landed on-chain: the session is complete and should
/// be removed from the active signing table (spec.md §3).
pub fn on_attested(current: &SigningState) -> bool {
	matches!(current, SigningState::WaitingForAttestation(_))
}

/// Deadline expiry aborts the session (spec.md §5); the driver is
/// responsible for re-issuing `Sign` for the same `signatureId` if the
/// underlying request is still pending.
pub fn on_deadline_expired(current: &SigningState, current_block: u64) -> bool {
	current.deadline().is_some_and(|d| current_block > d)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Rng;
	use crate::frost::dkg;
	use rand::SeedableRng;

	/// Full 2-of-3 signing round driven purely through the state machine,
	/// mirroring scenario S2/S3 (spec.md §8) at the state-transition level.
	#[test]
	fn full_signing_round_aggregates_a_verifying_signature() {
		let mut rng = Rng::from_seed([5; 32]);
		let threshold = 2u32;
		let ids = vec![1u32, 2, 3];

		let mut polys = Vec::new();
		let mut commitments = Vec::new();
		for &id in &ids {
			let (poly, c) = dkg::round1(id, threshold, b"tag", &mut rng);
			polys.push(poly);
			commitments.push(c);
		}
		let group_pubkey = dkg::aggregate_group_pubkey(commitments.iter().map(|c| c.commitments[0]));

		let secret_shares: ByParticipant<Scalar> = ids
			.iter()
			.map(|&recipient| (recipient, dkg::aggregate_secret_share(polys.iter().map(|p| p.evaluate(recipient)))))
			.collect();
		let verification_shares: ByParticipant<Point> = ids
			.iter()
			.map(|&recipient| {
				(recipient, commitments.iter().map(|c| dkg::verification_share(&c.commitments, recipient)).sum())
			})
			.collect();

		let signers = vec![1u32, 2];
		let message_hash = [7u8; 32];

		let (mut state, ()) = start([1; 32], message_hash, [0; 32], signers.clone(), 0, 100);

		let mut nonces: ByParticipant<(Scalar, Scalar)> = ByParticipant::new();
		for &id in &signers {
			let d = Scalar::random(&mut rng);
			let e = Scalar::random(&mut rng);
			let big_d = Point::from_scalar(&d);
			let big_e = Point::from_scalar(&e);
			nonces.insert(id, (d, e));
			state = on_nonce_revealed(&state, id, big_d, big_e).unwrap();
		}
		assert!(matches!(state, SigningState::CollectSigningShares(_)));

		let SigningState::CollectSigningShares(ref collect) = state else { panic!() };
		let commitment_pairs: Vec<(Point, Point)> = signers.iter().map(|id| collect.commitments[id]).collect();

		for &id in &signers {
			let (d, e) = &nonces[&id];
			let rho = signing::binding_factor(&group_pubkey, &signers, &commitment_pairs, &message_hash, id);
			let r_i = signing::signer_commitment(Point::from_scalar(d), Point::from_scalar(e), &rho);
			let group_commitment: Point = signers
				.iter()
				.map(|other| {
					let (od, oe) = &nonces[other];
					let orho = signing::binding_factor(&group_pubkey, &signers, &commitment_pairs, &message_hash, *other);
					signing::signer_commitment(Point::from_scalar(od), Point::from_scalar(oe), &orho)
				})
				.sum();
			let c = signing::challenge(&group_commitment, &group_pubkey, &message_hash);
			let lambda = signing::lagrange_coefficient(&signers, id);
			let z_i = signing::signature_share(d, e, &rho, &lambda, &secret_shares[&id], &c);
			let _ = r_i;

			state = on_share_received(&state, &group_pubkey, &verification_shares, id, z_i).unwrap();
		}

		let SigningState::WaitingForAttestation(final_state) = state else { panic!("expected attestation state") };
		assert!(signing::verify_signature(
			&final_state.aggregate_z,
			&final_state.aggregate_r,
			&signing::challenge(&final_state.aggregate_r, &group_pubkey, &message_hash),
			&group_pubkey
		));
	}

	#[test]
	fn deadline_expiry_is_detected() {
		let (state, ()) = start([1; 32], [0; 32], [0; 32], vec![1, 2], 0, 10);
		assert!(!on_deadline_expired(&state, 5));
		assert!(on_deadline_expired(&state, 11));
	}
}
