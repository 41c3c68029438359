//! `GroupKeyMaterial` (spec.md §3): per-validator, per-group DKG output.
//! Created once at DKG completion and read-only thereafter (Invariant 6: a
//! participant's secret polynomial coefficients never leave the process).
//!
//! This lives outside `StateDiff`/`MachineStates` on purpose: it is private
//! per-validator key material, not a fact the coordinator or other
//! validators ever observe, so it does not flow through the same
//! pure-handler diff pipeline as `ConsensusState`/rollover/signing state.
//! The driver holds it in a dedicated store (spec.md §4.6 elaboration,
//! beyond the three tables §6 names for the shared log).

use crate::crypto::field::Scalar;
use crate::crypto::Point;
use crate::frost::dkg::{self, CoefficientCommitments, ComplaintCounter, SecretPolynomial};
use crate::model::participant::{ByParticipant, ParticipantId};
use serde::{Deserialize, Serialize};

/// Accumulated state of an in-progress DKG ceremony, before it either
/// completes into a frozen `GroupKeyMaterial` or aborts.
pub struct DkgProgress {
	pub own_id: ParticipantId,
	pub threshold: u32,
	pub own_polynomial: SecretPolynomial,
	pub commitments: ByParticipant<CoefficientCommitments>,
	/// Shares received from each dealer, keyed by dealer id.
	pub shares_received: ByParticipant<Scalar>,
	pub complaints: ByParticipant<ComplaintCounter>,
}

impl DkgProgress {
	pub fn start(own_id: ParticipantId, threshold: u32, group_id_tag: &[u8], rng: &mut crate::crypto::Rng) -> (Self, CoefficientCommitments) {
		let (polynomial, own_commitment) = dkg::round1(own_id, threshold, group_id_tag, rng);
		let mut commitments = ByParticipant::new();
		commitments.insert(own_id, own_commitment.clone());
		(
			DkgProgress {
				own_id,
				threshold,
				own_polynomial: polynomial,
				commitments,
				shares_received: ByParticipant::new(),
				complaints: ByParticipant::new(),
			},
			own_commitment,
		)
	}

	pub fn record_commitment(&mut self, dealer: ParticipantId, commitment: CoefficientCommitments) {
		self.commitments.insert(dealer, commitment);
	}

	pub fn all_committed(&self, participant_count: u32) -> bool {
		self.commitments.len() as u32 == participant_count
	}

	/// The shares this validator deals to every peer, from its own
	/// polynomial (spec.md §4.2 round 2).
	pub fn deal_shares(&self, participant_ids: impl IntoIterator<Item = ParticipantId>) -> ByParticipant<Scalar> {
		dkg::deal_shares(&self.own_polynomial, participant_ids)
	}

	/// Verify and record an incoming share from `dealer`; returns `false`
	/// (and records nothing) if the share fails the dealer's committed
	/// polynomial (spec.md §4.2 round 3).
	pub fn record_share(&mut self, dealer: ParticipantId, share: Scalar) -> bool {
		let Some(commitment) = self.commitments.get(&dealer) else { return false };
		if !dkg::verify_share(&share, &commitment.commitments, self.own_id) {
			return false;
		}
		self.shares_received.insert(dealer, share);
		true
	}

	pub fn all_shares_received(&self, participant_count: u32) -> bool {
		self.shares_received.len() as u32 == participant_count
	}

	/// Finalise into frozen key material once every share has validated and
	/// every dealer has confirmed (spec.md §4.2 "Confirmation"). Every
	/// dealer's contribution to a recipient's verification share is
	/// independent of every other recipient's, so the per-recipient sums are
	/// computed in parallel, the way the teacher's
	/// `derive_local_pubkeys_for_parties` (`keygen_detail.rs`) parallelises
	/// the same computation with `rayon`.
	pub fn finalize(self) -> GroupKeyMaterial {
		use rayon::prelude::*;

		let group_pubkey = dkg::aggregate_group_pubkey(self.commitments.values().map(|c| c.commitments[0]));
		let secret_share = dkg::aggregate_secret_share(self.shares_received.into_values());
		let verification_shares: ByParticipant<Point> = self
			.commitments
			.keys()
			.copied()
			.collect::<Vec<_>>()
			.into_par_iter()
			.map(|dealer| {
				let share_sources =
					self.commitments.values().map(|c| dkg::verification_share(&c.commitments, dealer));
				(dealer, share_sources.sum())
			})
			.collect::<Vec<_>>()
			.into_iter()
			.collect();

		GroupKeyMaterial {
			own_id: self.own_id,
			threshold: self.threshold,
			group_pubkey,
			secret_share,
			verification_shares,
		}
	}
}

/// Frozen per-validator, per-group DKG output (spec.md §3). Read-only for
/// the lifetime of the group.
#[derive(Clone, Serialize, Deserialize)]
pub struct GroupKeyMaterial {
	pub own_id: ParticipantId,
	pub threshold: u32,
	pub group_pubkey: Point,
	pub secret_share: Scalar,
	pub verification_shares: ByParticipant<Point>,
}

impl GroupKeyMaterial {
	pub fn own_verification_share(&self) -> Point {
		self.verification_shares[&self.own_id]
	}
}
