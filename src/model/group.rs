use crate::crypto::hash::keccak256_raw;
use crate::merkle::MerkleTree;
use crate::model::participant::ParticipantTable;
use ethereum_types::Address;
use serde::{Deserialize, Serialize};

pub type GroupId = [u8; 32];
pub type Context = [u8; 32];

/// `{ groupId, participantsRoot, count, threshold, context }` (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
	pub group_id: GroupId,
	pub participants_root: [u8; 32],
	pub count: u32,
	pub threshold: u32,
	pub context: Context,
}

impl Group {
	pub fn new(participants: &ParticipantTable, context: Context) -> Self {
		let participants_root = participant_root(participants);
		let count = participants.count();
		let threshold = participants.threshold();
		let group_id = derive_group_id(participants_root, count, threshold, context);

		Group { group_id, participants_root, count, threshold, context }
	}
}

/// `participantsRoot`: Merkle root of addresses, hashed with `H4`.
pub fn participant_root(participants: &ParticipantTable) -> [u8; 32] {
	let leaves: Vec<[u8; 32]> = participants
		.ordered_addresses()
		.iter()
		.map(|addr| crate::crypto::hash::h4_leaf(addr.as_bytes()))
		.collect();
	MerkleTree::build(leaves).root()
}

/// `groupId = keccak(participantsRoot ∥ count ∥ threshold ∥ context)`
/// masked to clear the low 64 bits (reserved for runtime tagging).
pub fn derive_group_id(
	participants_root: [u8; 32],
	count: u32,
	threshold: u32,
	context: Context,
) -> GroupId {
	let mut id = keccak256_raw(&[
		&participants_root,
		&count.to_be_bytes(),
		&threshold.to_be_bytes(),
		&context,
	]);

	// Clear the low 64 bits (the last 8 bytes in this big-endian digest).
	for byte in id.iter_mut().rev().take(8) {
		*byte = 0;
	}

	id
}

/// The genesis context: zero (un-salted) or `keccak("genesis" ∥ salt)`.
pub fn genesis_context(salt: Option<[u8; 32]>) -> Context {
	match salt {
		None => [0u8; 32],
		Some(salt) => keccak256_raw(&[b"genesis", &salt]),
	}
}

/// Subsequent-epoch context: `pack(version=0, consensusAddress, epoch)`.
pub fn epoch_context(consensus_address: Address, epoch: u64) -> Context {
	let mut buf = [0u8; 32];
	// version (1 byte) ∥ consensusAddress (20 bytes) ∥ epoch (8 bytes), left-padded.
	buf[0] = 0; // version
	buf[1..21].copy_from_slice(consensus_address.as_bytes());
	buf[24..32].copy_from_slice(&epoch.to_be_bytes());
	buf
}

#[cfg(test)]
mod tests {
	use super::*;

	fn addr(byte: u8) -> Address {
		Address::from([byte; 20])
	}

	#[test]
	fn group_id_has_low_64_bits_clear() {
		let table = ParticipantTable::from_ordered_addresses(vec![addr(1), addr(2), addr(3)]);
		let group = Group::new(&table, genesis_context(None));
		assert_eq!(&group.group_id[24..32], &[0u8; 8]);
	}

	#[test]
	fn group_id_is_deterministic() {
		let table = ParticipantTable::from_ordered_addresses(vec![addr(1), addr(2), addr(3)]);
		let g1 = Group::new(&table, genesis_context(None));
		let g2 = Group::new(&table, genesis_context(None));
		assert_eq!(g1.group_id, g2.group_id);
	}

	#[test]
	fn different_participant_sets_give_different_group_ids() {
		let a = ParticipantTable::from_ordered_addresses(vec![addr(1), addr(2), addr(3)]);
		let b = ParticipantTable::from_ordered_addresses(vec![addr(1), addr(2), addr(4)]);
		assert_ne!(Group::new(&a, genesis_context(None)).group_id, Group::new(&b, genesis_context(None)).group_id);
	}
}
