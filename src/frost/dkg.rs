//! FROST DKG: Pedersen-extended Feldman VSS with Schnorr proof-of-knowledge
//! (spec.md §4.2). Grounded in the teacher's `keygen_detail`/`keygen_data`
//! data shapes (coefficient commitments, verification shares, complaint
//! bookkeeping), generalised from the teacher's generic multi-stage ceremony
//! machinery directly onto the rollover sub-machine this spec specifies.

use crate::crypto::hash::{h5_pok_challenge, hdkg_to_scalar, hpok_to_scalar};
use crate::crypto::{Point, Rng};
use crate::crypto::field::Scalar;
use crate::model::participant::{ByParticipant, ParticipantId};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Schnorr proof-of-knowledge of the constant term `a0` of a dealer's
/// polynomial: `R = g·k`, `c = H5(id ∥ C0 ∥ R ∥ groupId-tag)`, `mu = k + a0·c`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfKnowledge {
	pub r: Point,
	pub mu: Scalar,
}

/// Round 1 output: a dealer's coefficient commitments `Cⱼ = g·aⱼ` plus its PoK
/// of `a0`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoefficientCommitments {
	pub commitments: Vec<Point>,
	pub pok: ProofOfKnowledge,
}

/// A dealer's full set of secret polynomial coefficients. Never leaves the
/// process (spec.md §3 Invariant 6); only `CoefficientCommitments` and
/// per-peer shares derived from it are emitted.
#[derive(Clone)]
pub struct SecretPolynomial {
	coefficients: Vec<Scalar>,
}

impl Drop for SecretPolynomial {
	fn drop(&mut self) {
		use zeroize::Zeroize;
		for c in &mut self.coefficients {
			c.zeroize();
		}
	}
}

impl SecretPolynomial {
	/// Sample `threshold` random coefficients `a0..a_{t-1}` via `HDKG`.
	pub fn sample(threshold: u32, rng: &mut Rng) -> Self {
		let coefficients = (0..threshold)
			.map(|_| {
				let mut random = [0u8; 32];
				rng.fill_bytes(&mut random);
				hdkg_to_scalar(&random)
			})
			.collect();
		SecretPolynomial { coefficients }
	}

	fn a0(&self) -> &Scalar {
		&self.coefficients[0]
	}

	/// Evaluate the polynomial at integer point `x` (the recipient's
	/// participant id): `f(x) = Σᵢ aᵢ·xⁱ`.
	pub fn evaluate(&self, x: ParticipantId) -> Scalar {
		let x = Scalar::from(x);
		let mut acc = Scalar::zero();
		let mut power = Scalar::from(1);
		for coeff in &self.coefficients {
			acc = acc + coeff.clone() * power.clone();
			power = power * x.clone();
		}
		acc
	}

	pub fn commitments(&self) -> Vec<Point> {
		self.coefficients.iter().map(Point::from_scalar).collect()
	}
}

/// Round 1: generate a fresh polynomial and its public commitment + PoK.
pub fn round1(
	id: ParticipantId,
	threshold: u32,
	group_id_tag: &[u8],
	rng: &mut Rng,
) -> (SecretPolynomial, CoefficientCommitments) {
	let polynomial = SecretPolynomial::sample(threshold, rng);
	let commitments = polynomial.commitments();

	let mut random_k = [0u8; 32];
	rng.fill_bytes(&mut random_k);
	let k = hpok_to_scalar(&random_k);
	let r = Point::from_scalar(&k);

	let c0 = commitments[0];
	let c = h5_pok_challenge(id, &c0, &r, group_id_tag);
	let mu = k + polynomial.a0().clone() * c;

	(polynomial, CoefficientCommitments { commitments, pok: ProofOfKnowledge { r, mu } })
}

/// Verify a dealer's proof-of-knowledge: `g·μ − C0·c ?= R`.
pub fn verify_pok(
	dealer_id: ParticipantId,
	commitment: &CoefficientCommitments,
	group_id_tag: &[u8],
) -> bool {
	let c0 = commitment.commitments[0];
	let c = h5_pok_challenge(dealer_id, &c0, &commitment.pok.r, group_id_tag);

	let recovered = Point::from_scalar(&commitment.pok.mu) - c0 * c;
	recovered == commitment.pok.r
}

/// Round 2: deal a private share to every peer id (including the dealer's
/// own id, for uniformity).
pub fn deal_shares(
	polynomial: &SecretPolynomial,
	participant_ids: impl IntoIterator<Item = ParticipantId>,
) -> ByParticipant<Scalar> {
	participant_ids.into_iter().map(|id| (id, polynomial.evaluate(id))).collect()
}

/// The verification share `Yⱼ = Σᵢ pₖⁱ · Cⱼ,ᵢ` a dealer's committed
/// polynomial implies for recipient `pk`.
pub fn verification_share(commitments: &[Point], recipient: ParticipantId) -> Point {
	let x = Scalar::from(recipient);
	let mut acc = Point::point_at_infinity();
	let mut power = Scalar::from(1);
	for c in commitments {
		acc = acc + *c * power.clone();
		power = power * x.clone();
	}
	acc
}

/// Check a received secret share against the dealer's committed polynomial:
/// `g·share ?= Σᵢ pₖⁱ · Cⱼ,ᵢ`.
pub fn verify_share(share: &Scalar, commitments: &[Point], recipient: ParticipantId) -> bool {
	Point::from_scalar(share) == verification_share(commitments, recipient)
}

/// Per-accused complaint bookkeeping (spec.md §4.2, round 3).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintCounter {
	pub total: u32,
	pub unresponded: u32,
}

impl ComplaintCounter {
	pub fn record_complaint(&mut self) {
		self.total += 1;
		self.unresponded += 1;
	}

	pub fn record_response(&mut self) {
		self.unresponded = self.unresponded.saturating_sub(1);
	}

	/// A validator accumulating `>= threshold` complaints is excluded and
	/// the DKG restarts without it.
	pub fn exceeds_threshold(&self, threshold: u32) -> bool {
		self.total >= threshold
	}
}

/// The group public key once all dealers have confirmed: `Y = Σⱼ Cⱼ,₀`.
pub fn aggregate_group_pubkey(dealer_c0s: impl IntoIterator<Item = Point>) -> Point {
	dealer_c0s.into_iter().sum()
}

/// A validator's own secret share of the group secret:
/// `sᵢ = Σⱼ fⱼ(i)` over all dealers' shares it received.
pub fn aggregate_secret_share(shares_received: impl IntoIterator<Item = Scalar>) -> Scalar {
	shares_received.into_iter().sum()
}

/// A validator's verification share (the group's public share of `sᵢ`):
/// `Yᵢ = Σⱼ Yⱼ,ᵢ` over all dealers' verification shares for it.
pub fn aggregate_verification_share(shares: impl IntoIterator<Item = Point>) -> Point {
	shares.into_iter().sum()
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;

	fn rng() -> Rng {
		Rng::from_seed([7; 32])
	}

	#[test]
	fn pok_round_trips() {
		let mut rng = rng();
		let (_poly, commitment) = round1(1, 2, b"group-tag", &mut rng);
		assert!(verify_pok(1, &commitment, b"group-tag"));
	}

	#[test]
	fn tampered_pok_fails() {
		let mut rng = rng();
		let (_poly, mut commitment) = round1(1, 2, b"group-tag", &mut rng);
		commitment.pok.mu = commitment.pok.mu + Scalar::from(1);
		assert!(!verify_pok(1, &commitment, b"group-tag"));
	}

	#[test]
	fn dkg_completes_for_honest_committee() {
		let mut rng = rng();
		let threshold = 2u32;
		let ids: Vec<ParticipantId> = vec![1, 2, 3];

		let mut polys = Vec::new();
		let mut commitments = Vec::new();
		for &id in &ids {
			let (poly, commitment) = round1(id, threshold, b"tag", &mut rng);
			assert!(verify_pok(id, &commitment, b"tag"));
			polys.push(poly);
			commitments.push(commitment);
		}

		// Every dealer deals a share to every peer; every peer verifies it.
		for (dealer_idx, poly) in polys.iter().enumerate() {
			for &recipient in &ids {
				let share = poly.evaluate(recipient);
				assert!(verify_share(&share, &commitments[dealer_idx].commitments, recipient));
			}
		}

		let y = aggregate_group_pubkey(commitments.iter().map(|c| c.commitments[0]));

		// Each participant's aggregate secret share, and the implicit secret
		// reconstructed via Lagrange interpolation over all three, must map
		// back to the same group key.
		let secret_shares: Vec<Scalar> = ids
			.iter()
			.map(|&recipient| aggregate_secret_share(polys.iter().map(|p| p.evaluate(recipient))))
			.collect();

		let lambdas: Vec<Scalar> =
			ids.iter().map(|&id| crate::frost::signing::lagrange_coefficient(&ids, id)).collect();

		let reconstructed: Scalar = secret_shares
			.iter()
			.zip(&lambdas)
			.map(|(s, l)| s.clone() * l.clone())
			.sum();

		assert_eq!(Point::from_scalar(&reconstructed), y);
	}
}
