//! FROST signing: nonce reveal, binding factors, signature shares and
//! aggregation (spec.md §4.3). Grounded in the teacher's
//! `signing_detail.rs` (Lagrange-coefficient and Schnorr-response pattern),
//! generalised onto this spec's direct challenge formula (`c = H2(R ∥ Y ∥
//! message)`) rather than the teacher's KeyManager-contract-specific
//! recovery-address challenge — see DESIGN.md for that divergence.

use crate::crypto::field::Scalar;
use crate::crypto::hash::{h1_binding_factor, h2_challenge};
use crate::crypto::Point;
use crate::model::participant::ParticipantId;

/// `λᵢ = Π_{j≠i} xⱼ / (xⱼ − xᵢ)`, the Lagrange interpolation weight of
/// signer `i` at `x = 0` over the signer set `signer_ids`.
pub fn lagrange_coefficient(signer_ids: &[ParticipantId], i: ParticipantId) -> Scalar {
	let xi = Scalar::from(i);

	let mut numerator = Scalar::from(1);
	let mut denominator = Scalar::from(1);

	for &j in signer_ids {
		if j == i {
			continue;
		}
		let xj = Scalar::from(j);
		numerator = numerator * xj.clone();
		denominator = denominator * (xj - xi.clone());
	}

	numerator * denominator.invert().expect("signer set has no duplicate ids")
}

/// Per-signer binding factor `ρᵢ` (spec.md §4.3).
pub fn binding_factor(
	group_pubkey: &Point,
	sorted_signer_ids: &[ParticipantId],
	commitments: &[(Point, Point)],
	message: &[u8],
	signer_id: ParticipantId,
) -> Scalar {
	h1_binding_factor(group_pubkey, sorted_signer_ids, commitments, message, signer_id)
}

/// The group's challenge `c = H2(R ∥ Y ∥ message)`.
pub fn challenge(group_commitment: &Point, group_pubkey: &Point, message: &[u8]) -> Scalar {
	h2_challenge(group_commitment, group_pubkey, message)
}

/// A signer's per-signer commitment share `Rᵢ = Dᵢ + ρᵢ·Eᵢ`.
pub fn signer_commitment(d: Point, e: Point, rho: &Scalar) -> Point {
	d + e * rho.clone()
}

/// The signature share `zᵢ = dᵢ + ρᵢ·eᵢ + λᵢ·sᵢ·c`.
pub fn signature_share(
	d: &Scalar,
	e: &Scalar,
	rho: &Scalar,
	lambda: &Scalar,
	secret_share: &Scalar,
	c: &Scalar,
) -> Scalar {
	d.clone() + rho.clone() * e.clone() + lambda.clone() * secret_share.clone() * c.clone()
}

/// Local check of a received/own signature share:
/// `g·zᵢ ?= Rᵢ + (λᵢ·c)·Yᵢ`.
pub fn verify_share(
	z_i: &Scalar,
	r_i: &Point,
	lambda_i: &Scalar,
	c: &Scalar,
	y_i: &Point,
) -> bool {
	Point::from_scalar(z_i) == *r_i + *y_i * (lambda_i.clone() * c.clone())
}

/// Aggregate signature shares: `z = Σᵢ zᵢ`.
pub fn aggregate(shares: impl IntoIterator<Item = Scalar>) -> Scalar {
	shares.into_iter().sum()
}

/// Verify the final aggregate signature: `g·z ?= R + c·Y`.
pub fn verify_signature(z: &Scalar, r: &Point, c: &Scalar, y: &Point) -> bool {
	Point::from_scalar(z) == *r + *y * c.clone()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::Rng;
	use rand::SeedableRng;

	#[test]
	fn lagrange_coefficients_sum_to_reconstruct_secret() {
		// Sample 3 shares of a degree-1 polynomial (threshold 2) and check
		// that any 2-of-3 reconstructs the same secret via Lagrange weights.
		let secret = Scalar::from(42);
		let a1 = Scalar::from(7);

		let eval = |x: u32| -> Scalar { secret.clone() + a1.clone() * Scalar::from(x) };

		let shares: Vec<(ParticipantId, Scalar)> = vec![(1, eval(1)), (2, eval(2)), (3, eval(3))];

		for subset in [vec![1u32, 2], vec![2, 3], vec![1, 3]] {
			let reconstructed: Scalar = subset
				.iter()
				.map(|&id| {
					let share = shares.iter().find(|(i, _)| *i == id).unwrap().1.clone();
					share * lagrange_coefficient(&subset, id)
				})
				.sum();
			assert_eq!(reconstructed, secret);
		}
	}

	#[test]
	fn honest_signing_round_verifies() {
		let mut rng = Rng::from_seed([9; 32]);
		let secret_share = Scalar::random(&mut rng);
		let y_i = Point::from_scalar(&secret_share);
		// Single-signer case (lambda = 1 trivially via a singleton set).
		let ids = vec![1u32];
		let lambda = lagrange_coefficient(&ids, 1);

		let d = Scalar::random(&mut rng);
		let e = Scalar::random(&mut rng);
		let big_d = Point::from_scalar(&d);
		let big_e = Point::from_scalar(&e);

		let message = b"hello";
		let rho = binding_factor(&y_i, &ids, &[(big_d, big_e)], message, 1);
		let r_i = signer_commitment(big_d, big_e, &rho);
		let c = challenge(&r_i, &y_i, message);

		let z_i = signature_share(&d, &e, &rho, &lambda, &secret_share, &c);
		assert!(verify_share(&z_i, &r_i, &lambda, &c, &y_i));

		let z = aggregate([z_i]);
		assert!(verify_signature(&z, &r_i, &c, &y_i));
	}
}
