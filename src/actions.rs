//! The action queue (spec.md §4.5): a FIFO of outbound coordinator calls
//! with bounded retries and backoff, at most one in-flight at a time.
//!
//! Grounded in the teacher's `RpcRetrierClient` (`engine/src/rpc_retrier.rs`)
//! single-in-flight-plus-backoff pattern, simplified: unlike the retrier
//! (which retries a request forever), an action is dropped after
//! `MAX_RETRIES` and the failure is surfaced to the log (spec.md §4.5, §7).
//! Producer (driver) and consumer (executor) are decoupled the way the
//! teacher's ceremony stages are decoupled from p2p transport — a
//! `tokio::sync::mpsc` channel (spec.md §9 "message passing for the action
//! queue").

use crate::error::{ProtocolError, Result};
use crate::model::participant::ParticipantId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

pub const MAX_RETRIES: u32 = 5;
pub const ERROR_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The coordinator functions produced (spec.md §6), dispatched by
/// discriminant tag per spec.md §4.5.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
	KeyGenAndCommit { group_id: [u8; 32], commitment: Vec<u8> },
	KeyGenCommit { group_id: [u8; 32], commitment: Vec<u8> },
	KeyGenSecretShare { group_id: [u8; 32], recipient: ParticipantId, share: Vec<u8> },
	KeyGenComplaintRespond { group_id: [u8; 32], plaintiff: ParticipantId, share: Vec<u8> },
	Preprocess { group_id: [u8; 32], chunk: u32, root: [u8; 32] },
	SignRevealNonces { signature_id: [u8; 32], d: Vec<u8>, e: Vec<u8>, proof: Vec<u8> },
	SignShare { signature_id: [u8; 32], r_i: Vec<u8>, z_i: Vec<u8>, lambda_i: Vec<u8>, signers_root: [u8; 32] },
	ProposeEpoch { active_epoch: u64, proposed_epoch: u64 },
	StageEpoch { proposed_epoch: u64, rollover_block: u64, group_id: [u8; 32], signature: Vec<u8> },
	AttestTransaction { epoch: u64, safe_tx_hash: [u8; 32], signature: Vec<u8> },
}

impl Action {
	/// The discriminant tag used for dispatch and logging (spec.md §4.5).
	pub fn tag(&self) -> &'static str {
		match self {
			Action::KeyGenAndCommit { .. } => "key_gen_and_commit",
			Action::KeyGenCommit { .. } => "key_gen_commit",
			Action::KeyGenSecretShare { .. } => "key_gen_secret_share",
			Action::KeyGenComplaintRespond { .. } => "key_gen_complaint_respond",
			Action::Preprocess { .. } => "preprocess",
			Action::SignRevealNonces { .. } => "sign_reveal_nonce_commitments",
			Action::SignShare { .. } => "sign_publish_signature_share",
			Action::ProposeEpoch { .. } => "consensus_propose_epoch",
			Action::StageEpoch { .. } => "consensus_stage_epoch",
			Action::AttestTransaction { .. } => "consensus_attest_transaction",
		}
	}
}

/// An action plus how many times it has already been retried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEntry {
	pub action: Action,
	pub retry_count: u32,
}

impl ActionEntry {
	pub fn new(action: Action) -> Self {
		ActionEntry { action, retry_count: 0 }
	}
}

/// Submits an action on-chain. The only I/O point the action queue drives;
/// wallet/RPC transport live behind this trait (spec.md §1 "out of scope").
#[async_trait]
pub trait ActionExecutor: Send + Sync {
	async fn execute(&self, action: &Action) -> Result<()>;
}

/// The minimal FIFO operations both backings expose (spec.md §4.5, §4.6).
/// Implementations MUST preserve first-in/first-out across restart. The
/// head of the queue stays put across a failed attempt (spec.md §4.5:
/// "increments retryCount and defers execution") — retries do not move the
/// entry to the back, since at most one action is ever in flight.
pub trait ActionQueue: Send + Sync {
	fn push(&mut self, action: Action);
	fn front(&self) -> Option<ActionEntry>;
	/// Remove the head on success.
	fn pop_front(&mut self) -> Option<ActionEntry>;
	/// Increment the head's retry count in place, or drop it once
	/// `MAX_RETRIES` has been exceeded. Returns `true` if the entry survived.
	fn increment_retry_front(&mut self) -> bool;
	fn is_empty(&self) -> bool;
	fn len(&self) -> usize;
}

/// In-memory backing, used in tests (spec.md §4.6).
#[derive(Default)]
pub struct InMemoryActionQueue {
	entries: VecDeque<ActionEntry>,
}

impl InMemoryActionQueue {
	pub fn new() -> Self {
		Self::default()
	}
}

impl ActionQueue for InMemoryActionQueue {
	fn push(&mut self, action: Action) {
		self.entries.push_back(ActionEntry::new(action));
	}

	fn front(&self) -> Option<ActionEntry> {
		self.entries.front().cloned()
	}

	fn pop_front(&mut self) -> Option<ActionEntry> {
		self.entries.pop_front()
	}

	fn increment_retry_front(&mut self) -> bool {
		match self.entries.front_mut() {
			Some(entry) => {
				entry.retry_count += 1;
				if entry.retry_count > MAX_RETRIES {
					self.entries.pop_front();
					false
				} else {
					true
				}
			},
			None => false,
		}
	}

	fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn len(&self) -> usize {
		self.entries.len()
	}
}

/// A durable KV table backing the `queue_<name>` layout of spec.md §6:
/// `queue_<name>(id INTEGER PK AUTOINCREMENT, payload TEXT)`. Entries are
/// read back in ascending `id` order, preserving FIFO across restart.
pub trait DurableQueueStore: Send + Sync {
	fn append(&mut self, payload: Vec<u8>) -> Result<u64>;
	/// Ordered `(id, payload)` pairs, lowest id first.
	fn scan(&self) -> Result<Vec<(u64, Vec<u8>)>>;
	fn remove(&mut self, id: u64) -> Result<()>;
	fn replace(&mut self, id: u64, payload: Vec<u8>) -> Result<()>;
}

pub struct DurableActionQueue<S: DurableQueueStore> {
	store: S,
}

impl<S: DurableQueueStore> DurableActionQueue<S> {
	pub fn new(store: S) -> Self {
		DurableActionQueue { store }
	}

	fn decode(payload: &[u8]) -> ActionEntry {
		serde_json::from_slice(payload).expect("queue payload is corrupt: fatal storage error")
	}

	fn encode(entry: &ActionEntry) -> Vec<u8> {
		serde_json::to_vec(entry).expect("ActionEntry always serialises")
	}

	fn ordered(&self) -> Vec<(u64, ActionEntry)> {
		self.store
			.scan()
			.expect("durable queue scan failed: fatal storage error")
			.into_iter()
			.map(|(id, payload)| (id, Self::decode(&payload)))
			.collect()
	}
}

impl<S: DurableQueueStore> ActionQueue for DurableActionQueue<S> {
	fn push(&mut self, action: Action) {
		self.store
			.append(Self::encode(&ActionEntry::new(action)))
			.expect("durable queue append failed: fatal storage error");
	}

	fn front(&self) -> Option<ActionEntry> {
		self.ordered().into_iter().next().map(|(_, entry)| entry)
	}

	fn pop_front(&mut self) -> Option<ActionEntry> {
		let mut ordered = self.ordered();
		if ordered.is_empty() {
			return None;
		}
		let (id, entry) = ordered.remove(0);
		self.store.remove(id).expect("durable queue remove failed: fatal storage error");
		Some(entry)
	}

	fn increment_retry_front(&mut self) -> bool {
		let mut ordered = self.ordered();
		let Some((id, mut entry)) = ordered.into_iter().next() else { return false };
		entry.retry_count += 1;
		if entry.retry_count > MAX_RETRIES {
			self.store.remove(id).expect("durable queue remove failed: fatal storage error");
			false
		} else {
			self.store
				.replace(id, Self::encode(&entry))
				.expect("durable queue replace failed: fatal storage error");
			true
		}
	}

	fn is_empty(&self) -> bool {
		self.store.scan().map(|v| v.is_empty()).unwrap_or(true)
	}

	fn len(&self) -> usize {
		self.store.scan().map(|v| v.len()).unwrap_or(0)
	}
}

/// Drains the queue head one entry at a time, retrying on failure and
/// dropping after `MAX_RETRIES` (spec.md §4.5). There is at most one
/// in-flight action, matching the single-writer discipline of spec.md §5.
pub async fn drain_one<Q: ActionQueue + ?Sized>(queue: &mut Q, executor: &dyn ActionExecutor) {
	let Some(entry) = queue.front() else { return };

	match executor.execute(&entry.action).await {
		Ok(()) => {
			queue.pop_front();
		},
		Err(err) => {
			err.log();
			if !queue.increment_retry_front() {
				ProtocolError::Transient(format!("{} dropped after {} retries", entry.action.tag(), MAX_RETRIES))
					.log();
			} else {
				tokio::time::sleep(ERROR_RETRY_DELAY).await;
			}
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	fn sample_action() -> Action {
		Action::StageEpoch { proposed_epoch: 1, rollover_block: 1000, group_id: [0; 32], signature: vec![] }
	}

	#[test]
	fn fifo_order_preserved() {
		let mut q = InMemoryActionQueue::new();
		q.push(Action::ProposeEpoch { active_epoch: 0, proposed_epoch: 1 });
		q.push(sample_action());
		assert!(matches!(q.pop_front().unwrap().action, Action::ProposeEpoch { .. }));
		assert!(matches!(q.pop_front().unwrap().action, Action::StageEpoch { .. }));
	}

	struct AlwaysFails(Arc<AtomicU32>);

	#[async_trait]
	impl ActionExecutor for AlwaysFails {
		async fn execute(&self, _action: &Action) -> Result<()> {
			self.0.fetch_add(1, Ordering::SeqCst);
			Err(ProtocolError::Transient("boom".into()))
		}
	}

	#[tokio::test]
	async fn permanently_failing_action_is_dropped_after_max_retries() {
		let attempts = Arc::new(AtomicU32::new(0));
		let executor = AlwaysFails(attempts.clone());
		let mut queue = InMemoryActionQueue::new();
		queue.push(sample_action());

		for _ in 0..=MAX_RETRIES {
			drain_one(&mut queue, &executor).await;
		}

		assert!(queue.is_empty());
		assert_eq!(attempts.load(Ordering::SeqCst), MAX_RETRIES + 1);
	}

	struct AlwaysSucceeds;

	#[async_trait]
	impl ActionExecutor for AlwaysSucceeds {
		async fn execute(&self, _action: &Action) -> Result<()> {
			Ok(())
		}
	}

	#[tokio::test]
	async fn queue_drains_to_empty_on_success() {
		let mut queue = InMemoryActionQueue::new();
		queue.push(sample_action());
		queue.push(sample_action());
		drain_one(&mut queue, &AlwaysSucceeds).await;
		drain_one(&mut queue, &AlwaysSucceeds).await;
		assert!(queue.is_empty());
	}
}
