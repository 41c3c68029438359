//! The event loop: pulls ordered coordinator log entries, applies them to
//! the protocol state machine, commits the resulting diff to storage, and
//! drains the actions that fall out of that into the outbound queue.
//!
//! External collaborators this module depends on only at their trait
//! boundary: [`EventSource`] (log watcher / RPC polling), [`ShareTransport`]
//! (the confidential channel DKG secret shares travel over, separate from
//! the coordinator log), and [`PacketSource`] (fetches the full typed
//! payload behind a proposal once its on-chain summary has been observed).

use crate::actions::{drain_one, Action, ActionExecutor, ActionQueue};
use crate::crypto::field::Scalar;
use crate::crypto::{Point, Rng};
use crate::error::{ProtocolError, Result, VerificationFailure};
use crate::events::{self, ProtocolEvent, RawEventLog};
use crate::frost::dkg;
use crate::frost::nonce_tree::{NonceTree, LOW_WATERMARK, TREE_SIZE};
use crate::frost::signing as frost_signing;
use crate::merkle::MerkleTree;
use crate::model::group::{self, Context, Group, GroupId};
use crate::model::participant::{ByParticipant, ParticipantId, ParticipantTable};
use crate::state::consensus::{ConsensusState, EpochGroup, MessageHash, SignatureId};
use crate::state::diff::{ConsensusPatch, StateDiff};
use crate::state::keymaterial::DkgProgress;
use crate::state::rollover::{self, RolloverState};
use crate::state::signing::{self as signing_state, SigningState, WaitingForAttestation};
use crate::state::storage::{MachineStates, StorageBackend};
use crate::verification::{EpochRolloverPacket, Packet, SafeTransactionPacket, VerificationEngine};
use ethereum_types::Address;
use std::collections::HashMap;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls the coordinator/consensus log watcher for new entries since the
/// last call. Returns logs in no particular order; the driver sorts and
/// buffers them for reorg safety before decoding.
pub trait EventSource: Send + Sync {
	fn poll(&mut self) -> Result<Vec<RawEventLog>>;
}

/// The confidential channel DKG secret shares travel over, out of band from
/// the coordinator log. The coordinator only ever observes that a share was
/// dealt (`KeyGenSecretShared`), never its value.
pub trait ShareTransport: Send + Sync {
	fn deal(&self, group_id: GroupId, recipient: ParticipantId, share: &Scalar) -> Result<()>;
	/// Drain shares addressed to this validator for `group_id` since the
	/// last call.
	fn incoming(&mut self, group_id: GroupId) -> Vec<(ParticipantId, Scalar)>;
}

/// Fetches the full typed payload behind a proposal once its on-chain
/// summary has been observed. `EpochProposed`/`TransactionProposed` carry
/// only enough to look the packet up; the packet itself (rollover block,
/// group key coordinates, or the full meta-transaction) comes from here.
pub trait PacketSource: Send + Sync {
	fn epoch_rollover_packet(&self, active_epoch: u64, proposed_epoch: u64) -> Result<EpochRolloverPacket>;
	fn safe_transaction_packet(&self, epoch: u64, safe_tx_hash: MessageHash) -> Result<SafeTransactionPacket>;
}

#[derive(Clone, Debug)]
pub struct DriverConfig {
	pub participants: ParticipantTable,
	pub own_address: Address,
	pub consensus_address: Address,
	pub key_gen_timeout: u64,
	pub signing_timeout: u64,
	pub complaint_deadline: u64,
	pub reorg_depth: u64,
	pub genesis_salt: Option<[u8; 32]>,
}

/// Driver-private bookkeeping for which on-chain finalisation call a
/// completed signing session should trigger. `WaitingForAttestation` itself
/// doesn't carry this — it is not shared state, just local context the
/// validator that observed the originating proposal already has.
#[derive(Clone, Debug)]
enum SigningKind {
	Rollover { next_epoch: u64, rollover_block: u64, group_id: GroupId },
	Transaction { epoch: u64 },
}

/// The event loop driving one validator's replica of the protocol state
/// machine. Trait objects throughout: the concrete storage/queue/transport
/// backing is a deployment concern, not something this loop needs to be
/// generic over.
pub struct Driver {
	config: DriverConfig,
	storage: Box<dyn StorageBackend>,
	queue: Box<dyn ActionQueue>,
	executor: Box<dyn ActionExecutor>,
	event_source: Box<dyn EventSource>,
	transport: Box<dyn ShareTransport>,
	packets: Box<dyn PacketSource>,
	verification: VerificationEngine,
	rng: Rng,
	/// In-progress DKG ceremonies, keyed by the group they are producing key
	/// material for. Removed once finalised or aborted.
	dkg: HashMap<GroupId, DkgProgress>,
	/// Frozen key material for every group this validator is still a member
	/// of. Lives outside the diff/storage pipeline since it is private.
	key_material: HashMap<GroupId, crate::state::keymaterial::GroupKeyMaterial>,
	/// The participant table a given group was formed from — may be a
	/// strict subset of `config.participants` after a complaint cascade.
	group_participants: HashMap<GroupId, ParticipantTable>,
	nonce_trees: HashMap<GroupId, Vec<NonceTree>>,
	nonce_cursor: HashMap<GroupId, NonceCursor>,
	/// This validator's own `(d, e)` nonce scalars for a signature it has
	/// revealed into, needed to compute its own signature share.
	own_nonces: HashMap<SignatureId, (Scalar, Scalar)>,
	pending_signing_kind: HashMap<SignatureId, SigningKind>,
	/// `nextEpoch -> signatureId` for the currently-open rollover
	/// attestation, so `EpochStaged` can find the signing entry to retire.
	rollover_signature_ids: HashMap<u64, SignatureId>,
	/// The last signer observed revealing a nonce commitment for a session —
	/// the "responsible signer" who submits the finalisation call.
	last_revealer: HashMap<SignatureId, ParticipantId>,
	pending_blocks: Vec<RawEventLog>,
}

use crate::frost::nonce_tree::NonceCursor;

impl Driver {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		config: DriverConfig,
		storage: Box<dyn StorageBackend>,
		queue: Box<dyn ActionQueue>,
		executor: Box<dyn ActionExecutor>,
		event_source: Box<dyn EventSource>,
		transport: Box<dyn ShareTransport>,
		packets: Box<dyn PacketSource>,
		verification: VerificationEngine,
		rng: Rng,
	) -> Self {
		Driver {
			config,
			storage,
			queue,
			executor,
			event_source,
			transport,
			packets,
			verification,
			rng,
			dkg: HashMap::new(),
			key_material: HashMap::new(),
			group_participants: HashMap::new(),
			nonce_trees: HashMap::new(),
			nonce_cursor: HashMap::new(),
			own_nonces: HashMap::new(),
			pending_signing_kind: HashMap::new(),
			rollover_signature_ids: HashMap::new(),
			last_revealer: HashMap::new(),
			pending_blocks: Vec::new(),
		}
	}

	pub fn consensus_state(&self) -> ConsensusState {
		self.storage.consensus_state()
	}

	pub fn machine_states(&self) -> MachineStates {
		self.storage.machine_states()
	}

	/// Runs forever: poll, ingest, drain one action, repeat. Only returns on
	/// a fatal error, which the caller (`bin/validator.rs`) treats as a
	/// process-exit condition.
	pub async fn run(&mut self) -> Result<()> {
		loop {
			let logs = self.event_source.poll()?;
			let had_logs = !logs.is_empty();
			if had_logs {
				self.ingest(logs)?;
			}
			drain_one(&mut *self.queue, &*self.executor).await;
			if !had_logs && self.queue.is_empty() {
				tokio::time::sleep(POLL_INTERVAL).await;
			}
		}
	}

	/// Buffers incoming logs, releases everything at or before
	/// `maxBlock - reorgDepth` in `(block, index)` order, decodes and
	/// applies it, then checks deadlines at that finalised height.
	pub fn ingest(&mut self, mut logs: Vec<RawEventLog>) -> Result<()> {
		let mut all = std::mem::take(&mut self.pending_blocks);
		all.append(&mut logs);
		all.sort_by_key(|l| (l.block_number, l.log_index));

		let Some(max_block) = all.iter().map(|l| l.block_number).max() else {
			self.pending_blocks = all;
			return Ok(());
		};
		let finalized_through = max_block.saturating_sub(self.config.reorg_depth);

		let (ready, buffered): (Vec<_>, Vec<_>) =
			all.into_iter().partition(|l| l.block_number <= finalized_through);
		self.pending_blocks = buffered;

		for log in ready {
			if let Some(transition) = events::decode_log(&log) {
				self.apply(transition)?;
			}
		}

		self.check_deadlines(finalized_through)
	}

	fn apply(&mut self, transition: events::EventTransition) -> Result<()> {
		match self.handle(transition.event, transition.block_number) {
			Ok(diff) => self.commit(diff),
			Err(err) if err.is_fatal() => Err(err),
			Err(err) => {
				err.log();
				Ok(())
			},
		}
	}

	fn commit(&mut self, diff: StateDiff) -> Result<()> {
		if diff.is_empty() {
			return Ok(());
		}
		let actions = self.storage.apply_diff(diff)?;
		for action in actions {
			self.queue.push(action);
		}
		Ok(())
	}

	fn handle(&mut self, event: ProtocolEvent, block: u64) -> Result<StateDiff> {
		match event {
			ProtocolEvent::KeyGen { group_id, participants, count, threshold, context } => {
				self.on_key_gen(group_id, participants, count, threshold, context, block)
			},
			ProtocolEvent::KeyGenCommitted { group_id, identifier, commitment, committed } => {
				self.on_key_gen_committed(group_id, identifier, commitment, committed)
			},
			ProtocolEvent::KeyGenSecretShared { group_id, identifier, share, completed } => {
				self.on_key_gen_secret_shared(group_id, identifier, share, completed)
			},
			ProtocolEvent::KeyGenComplaintSubmitted { group_id, plaintiff, accused } => {
				self.on_key_gen_complained(group_id, plaintiff, accused)
			},
			ProtocolEvent::KeyGenComplaintResponded { group_id, accused, share } => {
				self.on_key_gen_complaint_responded(group_id, accused, share)
			},
			ProtocolEvent::KeyGenConfirmed { group_id, identifier } => self.on_key_gen_confirmed(group_id, identifier),
			ProtocolEvent::NonceCommitmentsHash { group_id, chunk, root } => {
				Ok(self.on_nonce_commitments_hash(group_id, chunk, root))
			},
			ProtocolEvent::SignRequest { signature_id, message_hash, group_id } => {
				self.on_sign_request(signature_id, message_hash, group_id, block)
			},
			ProtocolEvent::NonceCommitments { signature_id, identifier, d, e } => {
				self.on_nonce_commitments(signature_id, identifier, d, e)
			},
			ProtocolEvent::SignatureShare { signature_id, identifier, z_i } => {
				self.on_signature_share(signature_id, identifier, z_i)
			},
			ProtocolEvent::Signed { signature_id, signature } => Ok(self.on_signed(signature_id, signature)),
			ProtocolEvent::EpochProposed { active_epoch, proposed_epoch } => {
				self.on_epoch_proposed(active_epoch, proposed_epoch, block)
			},
			ProtocolEvent::EpochStaged { proposed_epoch, group_id } => {
				Ok(self.on_epoch_staged(proposed_epoch, group_id))
			},
			ProtocolEvent::TransactionProposed { epoch, safe_tx_hash } => {
				self.on_transaction_proposed(epoch, safe_tx_hash, block)
			},
			ProtocolEvent::TransactionAttested { signature_id } => Ok(self.on_transaction_attested(signature_id)),
		}
	}

	fn own_id(&self) -> ParticipantId {
		self.config.participants.id_of(&self.config.own_address).expect("own address must be a configured participant")
	}

	fn signers_for(&self, group_id: GroupId) -> Vec<ParticipantId> {
		self.group_participants
			.get(&group_id)
			.map(|t| t.ids().collect())
			.unwrap_or_else(|| self.config.participants.ids().collect())
	}

	fn context_for_epoch(&self, epoch: u64) -> Context {
		if epoch == 0 {
			group::genesis_context(self.config.genesis_salt)
		} else {
			group::epoch_context(self.config.consensus_address, epoch)
		}
	}

	fn next_epoch_for(&self, context: [u8; 32], staged_epoch: u64) -> u64 {
		if context == group::genesis_context(self.config.genesis_salt) {
			0
		} else {
			staged_epoch + 1
		}
	}

	fn signers_root(signers: &[ParticipantId]) -> [u8; 32] {
		let leaves: Vec<[u8; 32]> = signers.iter().map(|id| crate::crypto::hash::h4_leaf(&id.to_be_bytes())).collect();
		MerkleTree::build(leaves).root()
	}

	fn encode_signature(r: &Point, z: &Scalar) -> Vec<u8> {
		bincode::serialize(&(r, z)).expect("signature always serialises")
	}

	fn on_key_gen(
		&mut self,
		group_id: GroupId,
		participants: Vec<Address>,
		_count: u32,
		_threshold: u32,
		context: [u8; 32],
		block: u64,
	) -> Result<StateDiff> {
		let table = ParticipantTable::from_ordered_addresses(participants);
		let Some(own_id) = table.id_of(&self.config.own_address) else {
			return Ok(StateDiff::empty());
		};

		let consensus = self.storage.consensus_state();
		let machines = self.storage.machine_states();
		let next_epoch = self.next_epoch_for(context, consensus.staged_epoch);
		let threshold = table.threshold();

		let (progress, own_commitment) = DkgProgress::start(own_id, threshold, &group_id, &mut self.rng);
		self.dkg.insert(group_id, progress);
		self.group_participants.insert(group_id, table.clone());

		let Some((next, actions)) = rollover::on_key_gen(
			&machines.rollover,
			group_id,
			table,
			next_epoch,
			block,
			self.config.key_gen_timeout,
			own_commitment,
			own_id,
		) else {
			self.dkg.remove(&group_id);
			self.group_participants.remove(&group_id);
			return Ok(StateDiff::empty());
		};

		Ok(StateDiff { rollover: Some(next), actions, ..StateDiff::empty() })
	}

	fn on_key_gen_committed(
		&mut self,
		group_id: GroupId,
		identifier: ParticipantId,
		commitment: Vec<u8>,
		committed: bool,
	) -> Result<StateDiff> {
		let commitment: dkg::CoefficientCommitments = bincode::deserialize(&commitment)
			.map_err(|e| VerificationFailure::MalformedPacket(e.to_string()))?;

		if !dkg::verify_pok(identifier, &commitment, &group_id) {
			return Err(VerificationFailure::InvalidProofOfKnowledge.into());
		}

		if let Some(progress) = self.dkg.get_mut(&group_id) {
			progress.record_commitment(identifier, commitment.clone());
		}

		let machines = self.storage.machine_states();
		let own_id = self.own_id();

		let own_shares = if committed {
			let ids: Vec<ParticipantId> = match &machines.rollover {
				RolloverState::CollectingCommitments(s) => s.participants.ids().collect(),
				_ => Vec::new(),
			};
			let shares = self.dkg.get(&group_id).map(|p| p.deal_shares(ids)).unwrap_or_default();

			for (&recipient, share) in &shares {
				if recipient == own_id {
					if let Some(progress) = self.dkg.get_mut(&group_id) {
						progress.record_share(own_id, share.clone());
					}
				} else {
					self.transport.deal(group_id, recipient, share)?;
				}
			}

			shares.into_iter().map(|(id, s)| (id, bincode::serialize(&s).expect("scalar always serialises"))).collect()
		} else {
			ByParticipant::new()
		};

		let Some((next, actions)) =
			rollover::on_key_gen_committed(&machines.rollover, identifier, commitment, committed, own_id, move |_| own_shares)
		else {
			return Ok(StateDiff::empty());
		};

		Ok(StateDiff { rollover: Some(next), actions, ..StateDiff::empty() })
	}

	fn on_key_gen_secret_shared(
		&mut self,
		group_id: GroupId,
		_identifier: ParticipantId,
		_share: Vec<u8>,
		completed: bool,
	) -> Result<StateDiff> {
		if completed {
			for (dealer, share) in self.transport.incoming(group_id) {
				if let Some(progress) = self.dkg.get_mut(&group_id) {
					if !progress.record_share(dealer, share) {
						ProtocolError::from(VerificationFailure::InvalidSecretShare).log();
					}
				}
			}
		}

		let machines = self.storage.machine_states();
		let Some((next, actions)) = rollover::on_key_gen_secret_shared(&machines.rollover, _identifier, completed) else {
			return Ok(StateDiff::empty());
		};

		Ok(StateDiff { rollover: Some(next), actions, ..StateDiff::empty() })
	}

	fn on_key_gen_complained(
		&mut self,
		group_id: GroupId,
		plaintiff: ParticipantId,
		accused: ParticipantId,
	) -> Result<StateDiff> {
		let machines = self.storage.machine_states();
		let Some((next, mut actions)) = rollover::on_key_gen_complained(&machines.rollover, accused) else {
			return Ok(StateDiff::empty());
		};

		if accused == self.own_id() {
			if let Some(progress) = self.dkg.get(&group_id) {
				let share = progress.own_polynomial.evaluate(plaintiff);
				actions.push(Action::KeyGenComplaintRespond {
					group_id,
					plaintiff,
					share: bincode::serialize(&share).expect("scalar always serialises"),
				});
			}
		}

		Ok(StateDiff { rollover: Some(next), actions, ..StateDiff::empty() })
	}

	fn on_key_gen_complaint_responded(
		&mut self,
		group_id: GroupId,
		accused: ParticipantId,
		share: Vec<u8>,
	) -> Result<StateDiff> {
		let share: Scalar =
			bincode::deserialize(&share).map_err(|e| VerificationFailure::MalformedPacket(e.to_string()))?;

		if let Some(progress) = self.dkg.get_mut(&group_id) {
			if !progress.record_share(accused, share) {
				ProtocolError::from(VerificationFailure::InvalidSecretShare).log();
			}
		}

		let machines = self.storage.machine_states();
		let Some((next, actions)) = rollover::on_key_gen_complaint_responded(&machines.rollover, accused) else {
			return Ok(StateDiff::empty());
		};

		Ok(StateDiff { rollover: Some(next), actions, ..StateDiff::empty() })
	}

	fn on_key_gen_confirmed(&mut self, group_id: GroupId, confirmer: ParticipantId) -> Result<StateDiff> {
		let machines = self.storage.machine_states();
		let responsible = match &machines.rollover {
			RolloverState::CollectingConfirmations(s) => s.participants.ids().max().unwrap_or(confirmer),
			_ => confirmer,
		};

		let Some((next, mut actions)) = rollover::on_key_gen_confirmed(&machines.rollover, confirmer, responsible) else {
			return Ok(StateDiff::empty());
		};

		if let RolloverState::SignRollover(state) = &next {
			if let Some(progress) = self.dkg.remove(&group_id) {
				self.key_material.insert(group_id, progress.finalize());
			}
			let consensus = self.storage.consensus_state();
			actions.push(Action::ProposeEpoch { active_epoch: consensus.active_epoch, proposed_epoch: state.next_epoch });
		}

		Ok(StateDiff { rollover: Some(next), actions, ..StateDiff::empty() })
	}

	fn on_nonce_commitments_hash(&mut self, group_id: GroupId, _chunk: u32, _root: [u8; 32]) -> StateDiff {
		let mut consensus = ConsensusPatch::default();
		consensus.group_pending_nonces.insert(group_id, false);
		StateDiff { consensus, ..StateDiff::empty() }
	}

	fn on_sign_request(
		&mut self,
		signature_id: SignatureId,
		message_hash: MessageHash,
		group_id: GroupId,
		block: u64,
	) -> Result<StateDiff> {
		if !self.verification.is_verified(&message_hash) {
			return Err(ProtocolError::Validation("sign request for an unverified message hash".into()));
		}

		let signers = self.signers_for(group_id);
		let (state, ()) =
			signing_state::start(signature_id, message_hash, group_id, signers, block, self.config.signing_timeout);

		let mut consensus = ConsensusPatch::default();
		consensus.signature_id_to_message.insert(signature_id, message_hash);

		let mut diff =
			StateDiff { signing_upserts: [(signature_id, state)].into_iter().collect(), consensus, ..StateDiff::empty() };
		diff.actions = self.reveal_own_nonce(group_id, signature_id, &mut diff.consensus)?;
		Ok(diff)
	}

	/// Generates a group's bootstrap tree (chunk 0) the first time it is
	/// needed, and thereafter pre-generates the *next* chunk (keyed off the
	/// cursor's own chunk number, not how many trees happen to exist) once
	/// the current chunk's remaining leaves fall below the low watermark.
	/// Gated on `groupPendingNonces` (spec.md §3): that flag prevents a
	/// second preprocess from being emitted while a generated root is still
	/// uncommitted, so at most one `Preprocess` is ever in flight per group
	/// (spec.md §8 S6) rather than one per call for the rest of the chunk.
	fn ensure_nonce_tree(&mut self, group_id: GroupId) -> Option<Action> {
		let cursor = *self.nonce_cursor.entry(group_id).or_default();
		let has_current_chunk =
			self.nonce_trees.get(&group_id).is_some_and(|trees| trees.iter().any(|t| t.chunk == cursor.chunk));
		let available = TREE_SIZE.saturating_sub(cursor.offset);

		let target_chunk = if !has_current_chunk {
			cursor.chunk
		} else if available < LOW_WATERMARK {
			cursor.chunk + 1
		} else {
			return None;
		};

		let pending = self
			.storage
			.consensus_state()
			.group_pending_nonces
			.get(&group_id)
			.copied()
			.unwrap_or(false);
		if pending {
			return None;
		}
		if self.nonce_trees.get(&group_id).is_some_and(|trees| trees.iter().any(|t| t.chunk == target_chunk)) {
			return None;
		}

		let secret_share = self.key_material.get(&group_id)?.secret_share.clone();
		let tree = NonceTree::generate(target_chunk, &secret_share, &mut self.rng);
		let root = tree.root();
		self.nonce_trees.entry(group_id).or_default().push(tree);

		Some(Action::Preprocess { group_id, chunk: target_chunk, root })
	}

	fn reveal_own_nonce(
		&mut self,
		group_id: GroupId,
		signature_id: SignatureId,
		consensus: &mut ConsensusPatch,
	) -> Result<Vec<Action>> {
		let mut actions = Vec::new();
		if let Some(action) = self.ensure_nonce_tree(group_id) {
			consensus.group_pending_nonces.insert(group_id, true);
			actions.push(action);
		}

		let cursor = *self.nonce_cursor.entry(group_id).or_default();
		let trees =
			self.nonce_trees.get_mut(&group_id).ok_or_else(|| ProtocolError::Fatal("no nonce tree for group".into()))?;
		let tree = trees
			.iter_mut()
			.find(|t| t.chunk == cursor.chunk)
			.ok_or_else(|| ProtocolError::Fatal("nonce cursor points at a missing chunk".into()))?;

		let (d, e, proof) = tree.reveal(cursor.offset);
		let (d_scalar, e_scalar) = tree.consume(cursor.offset);
		self.own_nonces.insert(signature_id, (d_scalar, e_scalar));
		self.nonce_cursor.insert(group_id, cursor.advance());

		actions.push(Action::SignRevealNonces {
			signature_id,
			d: bincode::serialize(&d).expect("point always serialises"),
			e: bincode::serialize(&e).expect("point always serialises"),
			proof: bincode::serialize(&proof).expect("merkle proof always serialises"),
		});

		Ok(actions)
	}

	fn on_nonce_commitments(
		&mut self,
		signature_id: SignatureId,
		identifier: ParticipantId,
		d: Vec<u8>,
		e: Vec<u8>,
	) -> Result<StateDiff> {
		let d: Point = bincode::deserialize(&d).map_err(|err| VerificationFailure::MalformedPacket(err.to_string()))?;
		let e: Point = bincode::deserialize(&e).map_err(|err| VerificationFailure::MalformedPacket(err.to_string()))?;

		let machines = self.storage.machine_states();
		let Some(current) = machines.signing.get(&signature_id) else { return Ok(StateDiff::empty()) };

		let Some(next) = signing_state::on_nonce_revealed(current, identifier, d, e) else {
			return Ok(StateDiff::empty());
		};

		self.last_revealer.insert(signature_id, identifier);

		let actions = self.own_signature_share(signature_id, &next)?;

		Ok(StateDiff { signing_upserts: [(signature_id, next)].into_iter().collect(), actions, ..StateDiff::empty() })
	}

	/// Once every signer has revealed, compute and queue this validator's
	/// own signature share. A no-op unless `state` is freshly in
	/// `collect_signing_shares` and this validator is one of its signers.
	fn own_signature_share(&mut self, signature_id: SignatureId, state: &SigningState) -> Result<Vec<Action>> {
		let SigningState::CollectSigningShares(collect) = state else { return Ok(Vec::new()) };
		let own_id = self.own_id();
		if !collect.signers.contains(&own_id) {
			return Ok(Vec::new());
		}
		let Some((d, e)) = self.own_nonces.get(&signature_id).cloned() else { return Ok(Vec::new()) };
		let key_material = self
			.key_material
			.get(&collect.group_id)
			.ok_or_else(|| ProtocolError::Fatal("missing key material for group".into()))?;

		let commitment_pairs: Vec<(Point, Point)> = collect.signers.iter().map(|id| collect.commitments[id]).collect();

		let group_commitment: Point = collect
			.signers
			.iter()
			.map(|&id| {
				let (di, ei) = collect.commitments[&id];
				let rho = frost_signing::binding_factor(
					&key_material.group_pubkey,
					&collect.signers,
					&commitment_pairs,
					&collect.message_hash,
					id,
				);
				frost_signing::signer_commitment(di, ei, &rho)
			})
			.sum();
		let c = frost_signing::challenge(&group_commitment, &key_material.group_pubkey, &collect.message_hash);
		let rho = frost_signing::binding_factor(
			&key_material.group_pubkey,
			&collect.signers,
			&commitment_pairs,
			&collect.message_hash,
			own_id,
		);
		let (own_d, own_e) = collect.commitments[&own_id];
		let r_i = frost_signing::signer_commitment(own_d, own_e, &rho);
		let lambda = frost_signing::lagrange_coefficient(&collect.signers, own_id);
		let z_i = frost_signing::signature_share(&d, &e, &rho, &lambda, &key_material.secret_share, &c);

		let _ = r_i;
		Ok(vec![Action::SignShare {
			signature_id,
			r_i: bincode::serialize(&r_i).expect("point always serialises"),
			z_i: bincode::serialize(&z_i).expect("scalar always serialises"),
			lambda_i: bincode::serialize(&lambda).expect("scalar always serialises"),
			signers_root: Self::signers_root(&collect.signers),
		}])
	}

	fn on_signature_share(&mut self, signature_id: SignatureId, identifier: ParticipantId, z_i: Vec<u8>) -> Result<StateDiff> {
		let z_i: Scalar =
			bincode::deserialize(&z_i).map_err(|err| VerificationFailure::MalformedPacket(err.to_string()))?;

		let machines = self.storage.machine_states();
		let Some(current) = machines.signing.get(&signature_id) else { return Ok(StateDiff::empty()) };
		let SigningState::CollectSigningShares(collect) = current else { return Ok(StateDiff::empty()) };

		let key_material = self
			.key_material
			.get(&collect.group_id)
			.ok_or_else(|| ProtocolError::Fatal("missing key material for group".into()))?;

		let Some(next) = signing_state::on_share_received(
			current,
			&key_material.group_pubkey,
			&key_material.verification_shares,
			identifier,
			z_i,
		) else {
			return Ok(StateDiff::empty());
		};

		let mut actions = Vec::new();
		if let SigningState::WaitingForAttestation(final_state) = &next {
			if let Some(action) = self.finalization_action(signature_id, final_state) {
				actions.push(action);
			}
		}

		Ok(StateDiff { signing_upserts: [(signature_id, next)].into_iter().collect(), actions, ..StateDiff::empty() })
	}

	/// The last signer to reveal a nonce commitment is obligated to submit
	/// the finalisation call once the aggregate signature verifies.
	fn finalization_action(&mut self, signature_id: SignatureId, final_state: &WaitingForAttestation) -> Option<Action> {
		let responsible = *self.last_revealer.get(&signature_id)?;
		if responsible != self.own_id() {
			return None;
		}

		let signature = Self::encode_signature(&final_state.aggregate_r, &final_state.aggregate_z);

		match self.pending_signing_kind.get(&signature_id)? {
			SigningKind::Rollover { next_epoch, rollover_block, group_id } => Some(Action::StageEpoch {
				proposed_epoch: *next_epoch,
				rollover_block: *rollover_block,
				group_id: *group_id,
				signature,
			}),
			SigningKind::Transaction { epoch } => {
				Some(Action::AttestTransaction { epoch: *epoch, safe_tx_hash: signature_id, signature })
			},
		}
	}

	fn on_signed(&mut self, _signature_id: SignatureId, _signature: Vec<u8>) -> StateDiff {
		// Informational only: confirms on-chain acceptance of the aggregate
		// signature. The actual session teardown happens on
		// `EpochStaged`/`TransactionAttested`.
		StateDiff::empty()
	}

	fn on_epoch_proposed(&mut self, active_epoch: u64, proposed_epoch: u64, block: u64) -> Result<StateDiff> {
		let machines = self.storage.machine_states();

		// The consensus contract is the source of truth for which epoch is
		// active; every `EpochProposed` carries it regardless of whether
		// this validator is locally waiting to start the rollover
		// attestation below (spec.md §3 Invariant 2).
		let mut consensus = ConsensusPatch::default();
		let current_active = self.storage.consensus_state().active_epoch;
		if active_epoch != current_active {
			consensus.active_epoch = Some(active_epoch);
		}

		let RolloverState::SignRollover(state) = &machines.rollover else {
			return Ok(StateDiff { consensus, ..StateDiff::empty() });
		};
		if state.next_epoch != proposed_epoch {
			return Ok(StateDiff { consensus, ..StateDiff::empty() });
		}
		let group_id = state.group_id;

		let packet = self.packets.epoch_rollover_packet(active_epoch, proposed_epoch)?;
		let rollover_block = packet.rollover_block;
		let hash = self.verification.verify(&Packet::EpochRollover(packet))?;

		self.pending_signing_kind
			.insert(hash, SigningKind::Rollover { next_epoch: proposed_epoch, rollover_block, group_id });
		self.rollover_signature_ids.insert(proposed_epoch, hash);

		let signers = self.signers_for(group_id);
		let (signing_state, ()) = signing_state::start(hash, hash, group_id, signers, block, self.config.signing_timeout);

		consensus.signature_id_to_message.insert(hash, hash);

		let mut diff = StateDiff {
			signing_upserts: [(hash, signing_state)].into_iter().collect(),
			consensus,
			..StateDiff::empty()
		};
		diff.actions = self.reveal_own_nonce(group_id, hash, &mut diff.consensus)?;
		Ok(diff)
	}

	fn on_epoch_staged(&mut self, proposed_epoch: u64, group_id: GroupId) -> StateDiff {
		let machines = self.storage.machine_states();
		let Some(next) = rollover::on_epoch_staged(&machines.rollover) else { return StateDiff::empty() };

		let own_id = self.own_id();
		let mut consensus = ConsensusPatch::default();
		consensus.staged_epoch = Some(proposed_epoch);
		consensus.epoch_groups.insert(proposed_epoch, EpochGroup { group_id, participant_id: own_id });

		let mut signing_deletes = Vec::new();
		if let Some(sig_id) = self.rollover_signature_ids.remove(&proposed_epoch) {
			self.pending_signing_kind.remove(&sig_id);
			self.last_revealer.remove(&sig_id);
			signing_deletes.push(sig_id);
		}

		StateDiff { rollover: Some(next), signing_deletes, consensus, ..StateDiff::empty() }
	}

	fn on_transaction_proposed(&mut self, epoch: u64, safe_tx_hash: [u8; 32], block: u64) -> Result<StateDiff> {
		let consensus = self.storage.consensus_state();
		let Some(epoch_group) = consensus.epoch_groups.get(&epoch).copied() else {
			return Err(ProtocolError::Validation(format!("no group recorded for epoch {epoch}")));
		};
		let group_id = epoch_group.group_id;

		let packet = self.packets.safe_transaction_packet(epoch, safe_tx_hash)?;
		let hash = self.verification.verify(&Packet::SafeTransaction(packet))?;

		self.pending_signing_kind.insert(hash, SigningKind::Transaction { epoch });

		let signers = self.signers_for(group_id);
		let (signing_state, ()) = signing_state::start(hash, hash, group_id, signers, block, self.config.signing_timeout);

		let mut consensus_patch = ConsensusPatch::default();
		consensus_patch.signature_id_to_message.insert(hash, hash);

		let mut diff = StateDiff {
			signing_upserts: [(hash, signing_state)].into_iter().collect(),
			consensus: consensus_patch,
			..StateDiff::empty()
		};
		diff.actions = self.reveal_own_nonce(group_id, hash, &mut diff.consensus)?;
		Ok(diff)
	}

	fn on_transaction_attested(&mut self, signature_id: SignatureId) -> StateDiff {
		let machines = self.storage.machine_states();
		let Some(current) = machines.signing.get(&signature_id) else { return StateDiff::empty() };
		if !signing_state::on_attested(current) {
			return StateDiff::empty();
		}

		self.pending_signing_kind.remove(&signature_id);
		self.last_revealer.remove(&signature_id);
		StateDiff { signing_deletes: vec![signature_id], ..StateDiff::empty() }
	}

	fn check_deadlines(&mut self, current_block: u64) -> Result<()> {
		let machines = self.storage.machine_states();

		if let Some(restricted) =
			rollover::check_complaint_cascade(&machines.rollover, current_block, self.config.complaint_deadline)
		{
			let diff = self.restart_dkg_excluding(&machines.rollover, restricted, current_block)?;
			self.commit(diff)?;
		} else if let Some(next) = rollover::on_deadline_expired(&machines.rollover, current_block) {
			self.commit(StateDiff { rollover: Some(next), ..StateDiff::empty() })?;
		}

		let machines = self.storage.machine_states();
		for (sig_id, state) in machines.signing {
			if signing_state::on_deadline_expired(&state, current_block) {
				self.pending_signing_kind.remove(&sig_id);
				self.last_revealer.remove(&sig_id);
				self.commit(StateDiff { signing_deletes: vec![sig_id], ..StateDiff::empty() })?;
			}
		}

		Ok(())
	}

	/// Restarts the DKG for the same `nextEpoch` with the accused
	/// participant excluded, deriving a fresh `groupId` from the smaller
	/// participant set. Forces the rollover sub-machine's current state to
	/// `waiting_for_rollover` for this one call since the restart is itself
	/// the abort.
	fn restart_dkg_excluding(
		&mut self,
		current: &RolloverState,
		restricted: ParticipantTable,
		current_block: u64,
	) -> Result<StateDiff> {
		let RolloverState::CollectingShares(state) = current else { return Ok(StateDiff::empty()) };
		let next_epoch = state.next_epoch;
		self.dkg.remove(&state.group_id);
		self.group_participants.remove(&state.group_id);

		let Some(own_id) = restricted.id_of(&self.config.own_address) else {
			return Ok(StateDiff { rollover: Some(RolloverState::WaitingForRollover), ..StateDiff::empty() });
		};

		let context = self.context_for_epoch(next_epoch);
		let group = Group::new(&restricted, context);
		let (progress, own_commitment) = DkgProgress::start(own_id, restricted.threshold(), &group.group_id, &mut self.rng);
		self.dkg.insert(group.group_id, progress);
		self.group_participants.insert(group.group_id, restricted.clone());

		let Some((next, actions)) = rollover::on_key_gen(
			&RolloverState::WaitingForRollover,
			group.group_id,
			restricted,
			next_epoch,
			current_block,
			self.config.key_gen_timeout,
			own_commitment,
			own_id,
		) else {
			return Ok(StateDiff::empty());
		};

		Ok(StateDiff { rollover: Some(next), actions, ..StateDiff::empty() })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::actions::InMemoryActionQueue;
	use crate::state::keymaterial::GroupKeyMaterial;
	use crate::state::storage::InMemoryStorage;
	use crate::verification::TransactionCheckConfig;
	use async_trait::async_trait;
	use rand::SeedableRng;
	use std::sync::Mutex;

	struct NoLogs;
	impl EventSource for NoLogs {
		fn poll(&mut self) -> Result<Vec<RawEventLog>> {
			Ok(Vec::new())
		}
	}

	struct NoTransport;
	impl ShareTransport for NoTransport {
		fn deal(&self, _group_id: GroupId, _recipient: ParticipantId, _share: &Scalar) -> Result<()> {
			Ok(())
		}
		fn incoming(&mut self, _group_id: GroupId) -> Vec<(ParticipantId, Scalar)> {
			Vec::new()
		}
	}

	struct NoPackets;
	impl PacketSource for NoPackets {
		fn epoch_rollover_packet(&self, _active_epoch: u64, _proposed_epoch: u64) -> Result<EpochRolloverPacket> {
			Err(ProtocolError::Fatal("packet source not wired in this test".into()))
		}
		fn safe_transaction_packet(&self, _epoch: u64, _safe_tx_hash: MessageHash) -> Result<SafeTransactionPacket> {
			Err(ProtocolError::Fatal("packet source not wired in this test".into()))
		}
	}

	#[derive(Default)]
	struct RecordingExecutor {
		executed: Mutex<Vec<Action>>,
	}

	#[async_trait]
	impl ActionExecutor for RecordingExecutor {
		async fn execute(&self, action: &Action) -> Result<()> {
			self.executed.lock().unwrap().push(action.clone());
			Ok(())
		}
	}

	fn addr(byte: u8) -> Address {
		Address::from([byte; 20])
	}

	fn test_driver(own_byte: u8) -> Driver {
		let participants = ParticipantTable::from_ordered_addresses(vec![addr(1), addr(2), addr(3)]);
		let config = DriverConfig {
			participants,
			own_address: addr(own_byte),
			consensus_address: addr(99),
			key_gen_timeout: 100,
			signing_timeout: 100,
			complaint_deadline: 50,
			reorg_depth: 0,
			genesis_salt: None,
		};
		Driver::new(
			config,
			Box::new(InMemoryStorage::new()),
			Box::new(InMemoryActionQueue::new()),
			Box::new(RecordingExecutor::default()),
			Box::new(NoLogs),
			Box::new(NoTransport),
			Box::new(NoPackets),
			VerificationEngine::new(1, addr(99), TransactionCheckConfig::default()),
			Rng::from_seed([1; 32]),
		)
	}

	#[test]
	fn own_id_resolves_positionally() {
		let driver = test_driver(2);
		assert_eq!(driver.own_id(), 2);
	}

	#[test]
	fn genesis_context_is_distinguished_from_later_epochs() {
		let driver = test_driver(1);
		assert_ne!(driver.context_for_epoch(0), driver.context_for_epoch(1));
		assert_eq!(driver.next_epoch_for(driver.context_for_epoch(0), 5), 0);
		assert_eq!(driver.next_epoch_for(driver.context_for_epoch(6), 5), 6);
	}

	#[test]
	fn signers_root_is_deterministic_and_membership_sensitive() {
		let a = Driver::signers_root(&[1, 2, 3]);
		let b = Driver::signers_root(&[1, 2, 3]);
		let c = Driver::signers_root(&[1, 2, 4]);
		assert_eq!(a, b);
		assert_ne!(a, c);
	}

	#[test]
	fn on_key_gen_starts_dkg_and_emits_key_gen_and_commit() {
		let mut driver = test_driver(1);
		let group_id = [7u8; 32];
		let context = driver.context_for_epoch(0);
		let addrs = driver.config.participants.ordered_addresses().to_vec();

		let diff = driver.on_key_gen(group_id, addrs, 3, 2, context, 10).unwrap();

		assert!(matches!(diff.rollover, Some(RolloverState::CollectingCommitments(_))));
		assert_eq!(diff.actions.len(), 1);
		assert!(matches!(diff.actions[0], Action::KeyGenAndCommit { .. }));
		assert!(driver.dkg.contains_key(&group_id));
		assert!(driver.group_participants.contains_key(&group_id));
	}

	#[test]
	fn on_key_gen_is_a_no_op_for_a_non_member() {
		let mut driver = test_driver(1);
		let outsider_table = vec![addr(4), addr(5), addr(6)];
		let diff = driver.on_key_gen([1u8; 32], outsider_table, 3, 2, [0; 32], 10).unwrap();
		assert!(diff.is_empty());
	}

	#[test]
	fn ensure_nonce_tree_generates_once_then_stays_quiet() {
		let mut driver = test_driver(1);
		let group_id = [3u8; 32];
		let secret_share = Scalar::random(&mut driver.rng);
		driver.key_material.insert(
			group_id,
			GroupKeyMaterial {
				own_id: 1,
				threshold: 2,
				group_pubkey: Point::point_at_infinity(),
				secret_share,
				verification_shares: ByParticipant::new(),
			},
		);

		let action = driver.ensure_nonce_tree(group_id);
		assert!(matches!(action, Some(Action::Preprocess { chunk: 0, .. })));
		assert_eq!(driver.nonce_trees[&group_id].len(), 1);
		assert!(driver.ensure_nonce_tree(group_id).is_none());
	}

	#[test]
	fn reveal_own_nonce_advances_the_cursor() {
		let mut driver = test_driver(1);
		let group_id = [4u8; 32];
		let secret_share = Scalar::random(&mut driver.rng);
		driver.key_material.insert(
			group_id,
			GroupKeyMaterial {
				own_id: 1,
				threshold: 2,
				group_pubkey: Point::point_at_infinity(),
				secret_share,
				verification_shares: ByParticipant::new(),
			},
		);

		let mut consensus = ConsensusPatch::default();
		let actions = driver.reveal_own_nonce(group_id, [9u8; 32], &mut consensus).unwrap();
		assert_eq!(actions.len(), 2); // Preprocess + SignRevealNonces
		assert!(matches!(actions[0], Action::Preprocess { .. }));
		assert!(matches!(actions[1], Action::SignRevealNonces { .. }));
		assert_eq!(driver.nonce_cursor[&group_id].offset, 1);
		assert!(driver.own_nonces.contains_key(&[9u8; 32]));
		assert_eq!(consensus.group_pending_nonces.get(&group_id), Some(&true));
	}

	#[test]
	fn reveal_own_nonce_generates_exactly_one_preprocess_per_chunk_boundary() {
		let mut driver = test_driver(1);
		let group_id = [5u8; 32];
		let secret_share = Scalar::random(&mut driver.rng);
		driver.key_material.insert(
			group_id,
			GroupKeyMaterial {
				own_id: 1,
				threshold: 2,
				group_pubkey: Point::point_at_infinity(),
				secret_share,
				verification_shares: ByParticipant::new(),
			},
		);

		let mut preprocessed_chunks = Vec::new();
		for i in 0..1025u32 {
			let mut signature_id = [0u8; 32];
			signature_id[..4].copy_from_slice(&i.to_be_bytes());

			let mut consensus = ConsensusPatch::default();
			let actions = driver.reveal_own_nonce(group_id, signature_id, &mut consensus).unwrap();
			for action in &actions {
				if let Action::Preprocess { chunk, .. } = action {
					preprocessed_chunks.push(*chunk);
				}
			}

			// Every preprocess toggles `groupPendingNonces[G]` true, and the
			// driver observing the coordinator's commitment of that root
			// (`on_nonce_commitments_hash`) is what toggles it back to false
			// (spec.md §8 S6) — without that second half of the cycle the
			// flag would stay true forever and no further chunk could ever
			// be pre-generated.
			if !consensus.group_pending_nonces.is_empty() {
				assert_eq!(consensus.group_pending_nonces.get(&group_id), Some(&true));
				driver.commit(StateDiff { consensus, ..StateDiff::empty() }).unwrap();
				assert_eq!(driver.storage.consensus_state().group_pending_nonces.get(&group_id), Some(&true));

				let chunk = *preprocessed_chunks.last().unwrap();
				let reset = driver.on_nonce_commitments_hash(group_id, chunk, [0u8; 32]);
				driver.commit(reset).unwrap();
				assert_eq!(driver.storage.consensus_state().group_pending_nonces.get(&group_id), Some(&false));
			}
		}

		// Exactly one preprocess for the bootstrap chunk and one for the
		// chunk pre-generated ahead of the 1024-leaf boundary — not one per
		// call for the ~99 signings once the low watermark is crossed.
		assert_eq!(preprocessed_chunks, vec![0, 1]);
	}

	#[test]
	fn epoch_proposed_records_active_epoch_even_with_no_local_rollover_in_flight() {
		let mut driver = test_driver(1);
		assert_eq!(driver.storage.consensus_state().active_epoch, 0);

		// No rollover sub-machine is in flight locally (default WaitingForRollover),
		// yet the contract-reported active epoch must still be recorded.
		let diff = driver.on_epoch_proposed(1, 2, 50).unwrap();
		assert!(diff.rollover.is_none());
		assert_eq!(diff.consensus.active_epoch, Some(1));

		driver.commit(diff).unwrap();
		assert_eq!(driver.storage.consensus_state().active_epoch, 1);
	}
}
