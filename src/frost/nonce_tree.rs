//! Signing-nonce preprocessing via a Merkle-committed nonce tree (spec.md §3
//! `NonceTree`, §4.3 "Preprocessing"). Grounded in the pack's Merkle tree
//! crate (`crate::merkle`) for the tree structure itself, rehashed and
//! restructured here to hold the per-leaf nonce scalars privately.

use crate::crypto::field::Scalar;
use crate::crypto::hash::h3_nonce;
use crate::crypto::{Point, Rng};
use crate::merkle::{self, Digest, MerkleProof, MerkleTree};
use rand::RngCore;

/// Fixed leaf count per spec.md §3.
pub const TREE_SIZE: u32 = 1024;

/// The trigger for generating a fresh tree: regenerate once fewer than this
/// many leaves remain available across all of a group's trees (spec.md §4.3).
pub const LOW_WATERMARK: u32 = 100;

struct LeafSecret {
	d: Scalar,
	e: Scalar,
}

impl Drop for LeafSecret {
	fn drop(&mut self) {
		use zeroize::Zeroize;
		self.d.zeroize();
		self.e.zeroize();
    }
}

/// One regenerated tree, identified by its `chunk` number. Chunk 0 is
/// implicitly present after the first root is committed; each subsequent
/// regeneration increments the chunk.
pub struct NonceTree {
	pub chunk: u32,
	points: Vec<(Point, Point)>,
	secrets: Vec<LeafSecret>,
	used: Vec<bool>,
	tree: MerkleTree,
}

impl NonceTree {
	/// Generate a full 1024-leaf tree from the validator's own secret share,
	/// so the tree is regenerable deterministically from `rng`'s seed plus
	/// the secret (spec.md §3: `d_i, e_i = H3(random ∥ secret)`).
	pub fn generate(chunk: u32, secret_share: &Scalar, rng: &mut Rng) -> Self {
		let mut points = Vec::with_capacity(TREE_SIZE as usize);
		let mut secrets = Vec::with_capacity(TREE_SIZE as usize);
		let mut leaves = Vec::with_capacity(TREE_SIZE as usize);

		for i in 0..TREE_SIZE {
			let mut random_d = [0u8; 32];
			let mut random_e = [0u8; 32];
			rng.fill_bytes(&mut random_d);
			rng.fill_bytes(&mut random_e);

			let d = h3_nonce(&random_d, secret_share);
			let e = h3_nonce(&random_e, secret_share);

			let big_d = Point::from_scalar(&d);
			let big_e = Point::from_scalar(&e);

			leaves.push(leaf_hash(i, &big_d, &big_e));
			points.push((big_d, big_e));
			secrets.push(LeafSecret { d, e });
		}

		let tree = MerkleTree::build(leaves);
		NonceTree { chunk, points, secrets, used: vec![false; TREE_SIZE as usize], tree }
	}

	pub fn root(&self) -> Digest {
		self.tree.root()
	}

	/// Reveal leaf `index`'s public commitment pair with its inclusion proof.
	/// Does not mark the leaf consumed — revealing and consuming are
	/// separate steps so a signer can re-fetch its own proof idempotently.
	pub fn reveal(&self, index: u32) -> (Point, Point, MerkleProof) {
		let (d, e) = self.points[index as usize];
		(d, e, self.tree.prove(index as usize))
	}

	/// Take the private nonce scalars for signing. Panics if `index` was
	/// already consumed: invariant 5 (spec.md §3) forbids reusing a leaf.
	pub fn consume(&mut self, index: u32) -> (Scalar, Scalar) {
		assert!(!self.used[index as usize], "nonce leaf {index} already revealed");
		self.used[index as usize] = true;
		let secret = &self.secrets[index as usize];
		(secret.d.clone(), secret.e.clone())
	}

	pub fn is_used(&self, index: u32) -> bool {
		self.used[index as usize]
	}
}

fn leaf_hash(index: u32, d: &Point, e: &Point) -> Digest {
	crate::crypto::hash::h4_leaf(
		&[&index.to_be_bytes()[..], &d.x_bytes(), &d.y_bytes_uncompressed(), &e.x_bytes(), &e.y_bytes_uncompressed()]
			.concat(),
	)
}

pub fn verify_leaf(index: u32, d: &Point, e: &Point, proof: &MerkleProof, root: Digest) -> bool {
	merkle::verify(leaf_hash(index, d, e), proof, root)
}

/// Tracks how many leaves remain before the low watermark is hit, across all
/// of a group's currently-committed chunks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NonceCursor {
	pub chunk: u32,
	pub offset: u32,
}

impl NonceCursor {
	pub fn advance(self) -> NonceCursor {
		if self.offset + 1 < TREE_SIZE {
			NonceCursor { chunk: self.chunk, offset: self.offset + 1 }
		} else {
			NonceCursor { chunk: self.chunk + 1, offset: 0 }
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;

	#[test]
	fn every_leaf_proof_verifies() {
		let mut rng = Rng::from_seed([3; 32]);
		let secret = Scalar::random(&mut rng);
		let tree = NonceTree::generate(0, &secret, &mut rng);
		let root = tree.root();

		for i in 0..TREE_SIZE {
			let (d, e, proof) = tree.reveal(i);
			assert!(verify_leaf(i, &d, &e, &proof, root));
		}
	}

	#[test]
	#[should_panic(expected = "already revealed")]
	fn consuming_a_leaf_twice_panics() {
		let mut rng = Rng::from_seed([4; 32]);
		let secret = Scalar::random(&mut rng);
		let mut tree = NonceTree::generate(0, &secret, &mut rng);
		tree.consume(0);
		tree.consume(0);
	}

	#[test]
	fn cursor_advances_into_next_chunk_at_boundary() {
		let cursor = NonceCursor { chunk: 0, offset: TREE_SIZE - 1 };
		let next = cursor.advance();
		assert_eq!(next, NonceCursor { chunk: 1, offset: 0 });
	}
}
