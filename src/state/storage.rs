//! Storage backends (spec.md §4.6, §6): the two logical tables of the
//! shared log — `consensus_state` and `machine_states` — plus atomic diff
//! application. Grounded in the teacher's `PersistentKeyDB`/`KeyStoreAPI`
//! abstraction (`engine/src/db/persistent.rs`): a thin trait over
//! get/put-by-key so the in-memory test backing and a real embedded store
//! share one `StorageBackend` surface.

use crate::actions::Action;
use crate::error::{ProtocolError, Result};
use crate::state::consensus::{ConsensusState, SignatureId};
use crate::state::diff::StateDiff;
use crate::state::rollover::RolloverState;
use crate::state::signing::SigningState;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Everything a validator would need to replay from after a restart:
/// `consensus_state`, the single active rollover sub-machine, and every
/// live signing sub-machine (spec.md §3, §6).
#[derive(Clone, Debug, Default)]
pub struct MachineStates {
	pub rollover: RolloverState,
	pub signing: BTreeMap<SignatureId, SigningState>,
}

/// Applies diffs atomically: either every field a diff touches lands, or
/// (on a storage fault) none of it does, so the two tables never observe a
/// handler's output half-written (spec.md §5).
pub trait StorageBackend: Send + Sync {
	fn consensus_state(&self) -> ConsensusState;
	fn machine_states(&self) -> MachineStates;
	/// Apply a diff and return the actions it produced for the action queue.
	fn apply_diff(&self, diff: StateDiff) -> Result<Vec<Action>>;
}

#[derive(Default)]
struct Inner {
	consensus: ConsensusState,
	machines: MachineStates,
}

/// In-memory backing (spec.md §4.6), used in tests and as the reference
/// implementation of the atomic-apply contract.
#[derive(Default)]
pub struct InMemoryStorage {
	inner: Mutex<Inner>,
}

impl InMemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

impl StorageBackend for InMemoryStorage {
	fn consensus_state(&self) -> ConsensusState {
		self.inner.lock().expect("storage mutex poisoned: fatal").consensus.clone()
	}

	fn machine_states(&self) -> MachineStates {
		self.inner.lock().expect("storage mutex poisoned: fatal").machines.clone()
	}

	fn apply_diff(&self, diff: StateDiff) -> Result<Vec<Action>> {
		let mut guard = self.inner.lock().expect("storage mutex poisoned: fatal");

		// Compute the would-be consensus state and validate it before any
		// field (consensus or machine) is actually written, so a rejected
		// diff leaves the prior state fully observed (spec.md §4.6/§5).
		let mut consensus = guard.consensus.clone();
		let patch = diff.consensus;
		if let Some(v) = patch.active_epoch {
			consensus.active_epoch = v;
		}
		if let Some(v) = patch.staged_epoch {
			consensus.staged_epoch = v;
		}
		if let Some(v) = patch.genesis_group_id {
			consensus.genesis_group_id = Some(v);
		}
		consensus.epoch_groups.extend(patch.epoch_groups);
		consensus.group_pending_nonces.extend(patch.group_pending_nonces);
		consensus.signature_id_to_message.extend(patch.signature_id_to_message);

		if !consensus.check_invariants() {
			return Err(ProtocolError::Fatal("consensus invariant violated after diff apply".into()));
		}

		if let Some(rollover) = diff.rollover {
			guard.machines.rollover = rollover;
		}
		for (id, state) in diff.signing_upserts {
			guard.machines.signing.insert(id, state);
		}
		for id in diff.signing_deletes {
			guard.machines.signing.remove(&id);
		}
		guard.consensus = consensus;

		Ok(diff.actions)
	}
}

/// A durable key-value table, the way the teacher's `KeyStoreAPI` wraps its
/// embedded store: opaque byte keys and values, no schema awareness.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore: Send + Sync {
	fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
	fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
}

const KEY_CONSENSUS: &[u8] = b"consensus_state";
const KEY_ROLLOVER: &[u8] = b"machine_states/rollover";

fn signing_key(id: &SignatureId) -> Vec<u8> {
	[b"machine_states/signing/".as_slice(), id].concat()
}

/// Durable backing over any [`KeyValueStore`] (spec.md §6). Signing entries
/// are tracked under an index key so a restart can enumerate them without a
/// table scan.
pub struct DurableStorage<S: KeyValueStore> {
	store: S,
}

const KEY_SIGNING_INDEX: &[u8] = b"machine_states/signing_index";

impl<S: KeyValueStore> DurableStorage<S> {
	pub fn new(store: S) -> Self {
		DurableStorage { store }
	}

	fn read<T: serde::de::DeserializeOwned + Default>(&self, key: &[u8]) -> T {
		match self.store.get(key).expect("durable storage read failed: fatal") {
			Some(bytes) => serde_json::from_slice(&bytes).expect("durable storage payload corrupt: fatal"),
			None => T::default(),
		}
	}

	fn write<T: serde::Serialize>(&self, key: &[u8], value: &T) {
		let bytes = serde_json::to_vec(value).expect("value always serialises");
		self.store.put(key, &bytes).expect("durable storage write failed: fatal");
	}

	fn signing_index(&self) -> Vec<SignatureId> {
		self.read(KEY_SIGNING_INDEX)
	}
}

impl<S: KeyValueStore> StorageBackend for DurableStorage<S> {
	fn consensus_state(&self) -> ConsensusState {
		self.read(KEY_CONSENSUS)
	}

	fn machine_states(&self) -> MachineStates {
		let rollover = self.read(KEY_ROLLOVER);
		let signing = self
			.signing_index()
			.into_iter()
			.map(|id| (id, self.read(&signing_key(&id))))
			.collect();
		MachineStates { rollover, signing }
	}

	fn apply_diff(&self, diff: StateDiff) -> Result<Vec<Action>> {
		// Validate before writing anything: the KV store has no transaction
		// support of its own, so the invariant check must gate every write
		// rather than run after some of them already landed (spec.md §4.6/§5).
		let mut consensus = self.consensus_state();
		let patch = diff.consensus;
		if let Some(v) = patch.active_epoch {
			consensus.active_epoch = v;
		}
		if let Some(v) = patch.staged_epoch {
			consensus.staged_epoch = v;
		}
		if let Some(v) = patch.genesis_group_id {
			consensus.genesis_group_id = Some(v);
		}
		consensus.epoch_groups.extend(patch.epoch_groups);
		consensus.group_pending_nonces.extend(patch.group_pending_nonces);
		consensus.signature_id_to_message.extend(patch.signature_id_to_message);

		if !consensus.check_invariants() {
			return Err(ProtocolError::Fatal("consensus invariant violated after diff apply".into()));
		}

		let mut index = self.signing_index();
		if let Some(rollover) = diff.rollover {
			self.write(KEY_ROLLOVER, &rollover);
		}
		for (id, state) in diff.signing_upserts {
			self.write(&signing_key(&id), &state);
			if !index.contains(&id) {
				index.push(id);
			}
		}
		for id in &diff.signing_deletes {
			index.retain(|existing| existing != id);
		}
		self.write(KEY_SIGNING_INDEX, &index);
		self.write(KEY_CONSENSUS, &consensus);

		Ok(diff.actions)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::diff::ConsensusPatch;
	use std::collections::HashMap;
	use std::sync::Mutex as StdMutex;

	#[derive(Default)]
	struct MapStore {
		map: StdMutex<HashMap<Vec<u8>, Vec<u8>>>,
	}

	impl KeyValueStore for MapStore {
		fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
			Ok(self.map.lock().unwrap().get(key).cloned())
		}

		fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
			self.map.lock().unwrap().insert(key.to_vec(), value.to_vec());
			Ok(())
		}
	}

	#[test]
	fn in_memory_apply_diff_updates_consensus_and_returns_actions() {
		let storage = InMemoryStorage::new();
		let diff = StateDiff {
			consensus: ConsensusPatch { active_epoch: Some(1), staged_epoch: Some(1), ..Default::default() },
			actions: vec![Action::ProposeEpoch { active_epoch: 0, proposed_epoch: 1 }],
			..Default::default()
		};
		let actions = storage.apply_diff(diff).unwrap();
		assert_eq!(actions.len(), 1);
		assert_eq!(storage.consensus_state().active_epoch, 1);
	}

	#[test]
	fn in_memory_apply_diff_rejects_invariant_violation() {
		let storage = InMemoryStorage::new();
		let diff = StateDiff {
			consensus: ConsensusPatch { active_epoch: Some(5), staged_epoch: Some(1), ..Default::default() },
			..Default::default()
		};
		assert!(storage.apply_diff(diff).is_err());
	}

	#[test]
	fn durable_storage_writes_consensus_and_signing_index_on_apply() {
		use mockall::predicate::eq;

		let mut store = MockKeyValueStore::new();
		store.expect_get().with(eq(KEY_CONSENSUS)).times(1).returning(|_| Ok(None));
		store.expect_get().with(eq(KEY_SIGNING_INDEX)).times(1).returning(|_| Ok(None));
		store
			.expect_put()
			.withf(|key, _| key == signing_key(&[7u8; 32]).as_slice())
			.times(1)
			.returning(|_, _| Ok(()));
		store.expect_put().with(eq(KEY_SIGNING_INDEX), mockall::predicate::always()).times(1).returning(|_, _| Ok(()));
		store.expect_put().with(eq(KEY_CONSENSUS), mockall::predicate::always()).times(1).returning(|_, _| Ok(()));

		let storage = DurableStorage::new(store);
		let diff = StateDiff {
			consensus: ConsensusPatch { active_epoch: Some(4), staged_epoch: Some(4), ..Default::default() },
			signing_upserts: [([7u8; 32], SigningState::WaitingForRequest)].into_iter().collect(),
			..Default::default()
		};
		storage.apply_diff(diff).unwrap();
	}

	#[test]
	fn durable_storage_round_trips_through_a_kv_store() {
		let storage = DurableStorage::new(MapStore::default());
		let diff = StateDiff {
			consensus: ConsensusPatch { active_epoch: Some(2), staged_epoch: Some(3), ..Default::default() },
			signing_upserts: [( [1u8; 32], SigningState::WaitingForRequest )].into_iter().collect(),
			..Default::default()
		};
		storage.apply_diff(diff).unwrap();

		assert_eq!(storage.consensus_state().active_epoch, 2);
		assert_eq!(storage.machine_states().signing.len(), 1);
	}
}
