use ethereum_types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `{ id: positive integer, address: on-chain identity }` (spec.md §3).
///
/// The arena+index pattern (spec.md §9): participants live once in a table
/// indexed by id-1, and the rest of the protocol passes small integer ids
/// around rather than references, avoiding the group/participant cyclic
/// ownership that a naive object graph would require.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantTable {
	/// 1-based id -> address, in configuration order.
	addresses: Vec<Address>,
}

pub type ParticipantId = u32;

impl ParticipantTable {
	/// Build the table from the ordered `PARTICIPANTS` config list. Ids are
	/// assigned purely by position (1-based); no externally supplied id is
	/// ever accepted (spec.md §9 Open Question 1).
	pub fn from_ordered_addresses(addresses: Vec<Address>) -> Self {
		ParticipantTable { addresses }
	}

	pub fn count(&self) -> u32 {
		self.addresses.len() as u32
	}

	pub fn threshold(&self) -> u32 {
		self.count() / 2 + 1
	}

	pub fn address(&self, id: ParticipantId) -> Option<Address> {
		let idx = id.checked_sub(1)?;
		self.addresses.get(idx as usize).copied()
	}

	pub fn id_of(&self, address: &Address) -> Option<ParticipantId> {
		self.addresses.iter().position(|a| a == address).map(|idx| idx as u32 + 1)
	}

	pub fn ids(&self) -> impl Iterator<Item = ParticipantId> {
		1..=self.count()
	}

	pub fn restricted_to(&self, ids: &[ParticipantId]) -> ParticipantTable {
		let addresses = ids
			.iter()
			.filter_map(|id| self.address(*id))
			.collect();
		ParticipantTable { addresses }
	}

	/// Addresses in id order, for the Merkle participant root (spec.md §3).
	pub fn ordered_addresses(&self) -> &[Address] {
		&self.addresses
	}
}

/// Map from signer id to whatever per-signer data a round is carrying
/// (secret shares, commitments, nonces). Kept as a `BTreeMap` so iteration
/// order is the canonical ascending-id order the hashes and Merkle roots
/// depend on.
pub type ByParticipant<T> = BTreeMap<ParticipantId, T>;

#[cfg(test)]
mod tests {
	use super::*;

	fn addr(byte: u8) -> Address {
		Address::from([byte; 20])
	}

	#[test]
	fn ids_are_positional_and_one_based() {
		let table = ParticipantTable::from_ordered_addresses(vec![addr(1), addr(2), addr(3)]);
		assert_eq!(table.id_of(&addr(1)), Some(1));
		assert_eq!(table.id_of(&addr(2)), Some(2));
		assert_eq!(table.id_of(&addr(3)), Some(3));
		assert_eq!(table.address(1), Some(addr(1)));
	}

	#[test]
	fn threshold_is_majority() {
		let table = ParticipantTable::from_ordered_addresses(vec![addr(1), addr(2), addr(3)]);
		assert_eq!(table.threshold(), 2);

		let table = ParticipantTable::from_ordered_addresses(vec![addr(1), addr(2), addr(3), addr(4)]);
		assert_eq!(table.threshold(), 3);
	}
}
