//! Merkle tree helpers (spec.md §4, "Merkle tree helpers"): the participant
//! root, the nonce-tree root, and inclusion proofs for both.
//!
//! Grounded in the pack's `merkle-tree` crate's bottom-up layer construction,
//! rehashed here with `crypto::hash::h4` (Keccak-256) instead of SHA-256, and
//! generalised to tolerate a non-power-of-two leaf count (the participant
//! root) by promoting an unpaired node to the next layer unchanged, in
//! addition to the power-of-two case the nonce tree always uses.

use crate::crypto::hash::h4_node;
use serde::{Deserialize, Serialize};

pub type Digest = [u8; 32];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleTree {
	/// layers[0] is the leaves, layers.last() is the single root.
	layers: Vec<Vec<Digest>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
	/// Sibling hashes from the leaf layer upward.
	pub siblings: Vec<Digest>,
	/// `true` if the sibling at that layer is on the right.
	pub sibling_is_right: Vec<bool>,
}

impl MerkleTree {
	pub fn build(leaves: Vec<Digest>) -> Self {
		assert!(!leaves.is_empty(), "cannot build a merkle tree over zero leaves");

		let mut layers = vec![leaves];
		while layers.last().unwrap().len() > 1 {
			let prev = layers.last().unwrap();
			let mut next = Vec::with_capacity(prev.len().div_ceil(2));
			let mut i = 0;
			while i < prev.len() {
				if i + 1 < prev.len() {
					next.push(h4_node(&prev[i], &prev[i + 1]));
				} else {
					// Unpaired node: promote unchanged (used for the
					// participant root, whose leaf count need not be a
					// power of two).
					next.push(prev[i]);
				}
				i += 2;
			}
			layers.push(next);
		}

		MerkleTree { layers }
	}

	pub fn root(&self) -> Digest {
		self.layers.last().unwrap()[0]
	}

	pub fn depth(&self) -> usize {
		self.layers.len() - 1
	}

	pub fn leaf_count(&self) -> usize {
		self.layers[0].len()
	}

	pub fn prove(&self, mut index: usize) -> MerkleProof {
		assert!(index < self.leaf_count(), "leaf index out of range");

		let mut siblings = Vec::new();
		let mut sibling_is_right = Vec::new();

		for layer in &self.layers[..self.layers.len() - 1] {
			let is_right_child = index % 2 == 1;
			let sibling_index = if is_right_child { index - 1 } else { index + 1 };

			if sibling_index < layer.len() {
				siblings.push(layer[sibling_index]);
				sibling_is_right.push(!is_right_child);
			}
			// if there's no sibling (unpaired promoted node), this layer
			// contributes nothing to the proof.

			index /= 2;
		}

		MerkleProof { siblings, sibling_is_right }
	}
}

pub fn verify(leaf: Digest, proof: &MerkleProof, root: Digest) -> bool {
	let mut acc = leaf;
	for (sibling, sibling_is_right) in proof.siblings.iter().zip(&proof.sibling_is_right) {
		acc = if *sibling_is_right { h4_node(&acc, sibling) } else { h4_node(sibling, &acc) };
	}
	acc == root
}

pub fn is_power_of_two(n: usize) -> bool {
	n != 0 && (n & (n - 1)) == 0
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::hash::h4_leaf;

	fn leaves(n: usize) -> Vec<Digest> {
		(0..n).map(|i| h4_leaf(&(i as u64).to_be_bytes())).collect()
	}

	#[test]
	fn single_leaf_root_is_the_leaf() {
		let tree = MerkleTree::build(leaves(1));
		assert_eq!(tree.root(), tree.layers[0][0]);
	}

	#[test]
	fn proof_verifies_for_every_leaf_power_of_two() {
		let ls = leaves(8);
        let tree = MerkleTree::build(ls.clone());
		let root = tree.root();
		for (i, leaf) in ls.iter().enumerate() {
			let proof = tree.prove(i);
			assert!(verify(*leaf, &proof, root));
		}
	}

	#[test]
	fn proof_verifies_for_odd_leaf_count() {
		let ls = leaves(3);
        let tree = MerkleTree::build(ls.clone());
		let root = tree.root();
		for (i, leaf) in ls.iter().enumerate() {
			let proof = tree.prove(i);
			assert!(verify(*leaf, &proof, root));
		}
	}

	#[test]
	fn nonce_tree_is_1024_leaves_power_of_two() {
		assert!(is_power_of_two(1024));
		let tree = MerkleTree::build(leaves(1024));
		assert_eq!(tree.depth(), 10);
	}

	#[test]
	fn tampered_leaf_fails_verification() {
		let ls = leaves(4);
        let tree = MerkleTree::build(ls.clone());
		let root = tree.root();
		let proof = tree.prove(0);
		assert!(!verify(h4_leaf(b"wrong"), &proof, root));
	}
}
