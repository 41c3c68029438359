//! Domain-separated Keccak-256 hashes used throughout the protocol.
//!
//! Every hash takes an explicit one-byte domain tag followed by its inputs;
//! no hash ever mixes in ambient randomness except `h3`, which derives nonce
//! scalars from caller-supplied randomness plus the secret share.

use super::{field::Scalar, point::Point};
use tiny_keccak::{Hasher, Keccak};

mod domain {
	pub const H1_RHO: u8 = 1;
	pub const H2_CHALLENGE: u8 = 2;
	pub const H3_NONCE: u8 = 3;
	pub const H4_NODE: u8 = 4;
	pub const H5_POK: u8 = 5;
	pub const HDKG: u8 = 6;
	pub const HPOK: u8 = 7;
}

fn keccak256(domain: u8, parts: &[&[u8]]) -> [u8; 32] {
	let mut hasher = Keccak::v256();
	hasher.update(&[domain]);
	for part in parts {
		hasher.update(part);
	}
	let mut out = [0u8; 32];
	hasher.finalize(&mut out);
	out
}

fn keccak256_scalar(domain: u8, parts: &[&[u8]]) -> Scalar {
	Scalar::from_bytes_mod_order(&keccak256(domain, parts))
}

/// `H1` — binding factor `ρᵢ = H1(groupPubKey ∥ sorted signer ids ∥ all (Dᵢ,Eᵢ) ∥ message ∥ i)`.
pub fn h1_binding_factor(
	group_pubkey: &Point,
	signer_ids: &[u32],
	commitments: &[(Point, Point)],
	message: &[u8],
	signer_id: u32,
) -> Scalar {
	let mut parts: Vec<Vec<u8>> = Vec::new();
	parts.push(group_pubkey.as_bytes().to_vec());
	for id in signer_ids {
		parts.push(id.to_be_bytes().to_vec());
	}
	for (d, e) in commitments {
		parts.push(d.as_bytes().to_vec());
		parts.push(e.as_bytes().to_vec());
	}
	parts.push(message.to_vec());
	parts.push(signer_id.to_be_bytes().to_vec());

	let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
	keccak256_scalar(domain::H1_RHO, &refs)
}

/// `H2` — group challenge `c = H2(R ∥ Y ∥ message)`.
pub fn h2_challenge(group_commitment: &Point, group_pubkey: &Point, message: &[u8]) -> Scalar {
	keccak256_scalar(
		domain::H2_CHALLENGE,
		&[&group_commitment.as_bytes(), &group_pubkey.as_bytes(), message],
	)
}

/// `H3` — nonce derivation: `d, e = H3(random ∥ secret)`.
pub fn h3_nonce(random: &[u8; 32], secret: &Scalar) -> Scalar {
	keccak256_scalar(domain::H3_NONCE, &[random, secret.as_bytes()])
}

/// `H4` — participant-root and Merkle node hash. Raw digest, not reduced mod `n`.
pub fn h4_node(left: &[u8], right: &[u8]) -> [u8; 32] {
	keccak256(domain::H4_NODE, &[left, right])
}

/// `H4` applied to a single leaf's pre-image (used for leaf hashing, not just internal nodes).
pub fn h4_leaf(data: &[u8]) -> [u8; 32] {
	keccak256(domain::H4_NODE, &[data])
}

/// `H5` — KeyGen proof-of-knowledge challenge: `c = H5(id ∥ C0 ∥ R ∥ groupId-tag)`.
pub fn h5_pok_challenge(id: u32, c0: &Point, r: &Point, group_id_tag: &[u8]) -> Scalar {
	keccak256_scalar(
		domain::H5_POK,
		&[&id.to_be_bytes(), &c0.as_bytes(), &r.as_bytes(), group_id_tag],
	)
}

/// `HDKG` — random bytes to scalar coercion used when sampling DKG polynomial coefficients.
pub fn hdkg_to_scalar(random: &[u8; 32]) -> Scalar {
	keccak256_scalar(domain::HDKG, &[random])
}

/// `HPoK` — random bytes to scalar coercion used when sampling the PoK nonce `k`.
pub fn hpok_to_scalar(random: &[u8; 32]) -> Scalar {
	keccak256_scalar(domain::HPOK, &[random])
}

/// Raw Keccak-256, no domain tag — used for EIP-712-style typed hashing where the
/// domain separation is already encoded in the typed struct preimage itself.
pub fn keccak256_raw(parts: &[&[u8]]) -> [u8; 32] {
	let mut hasher = Keccak::v256();
	for part in parts {
		hasher.update(part);
	}
	let mut out = [0u8; 32];
	hasher.finalize(&mut out);
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn domains_are_distinct() {
		let a = keccak256(domain::H1_RHO, &[b"x"]);
		let b = keccak256(domain::H2_CHALLENGE, &[b"x"]);
		assert_ne!(a, b);
	}

	#[test]
	fn h4_node_order_matters() {
		let a = h4_node(b"left", b"right");
		let b = h4_node(b"right", b"left");
		assert_ne!(a, b);
	}
}
