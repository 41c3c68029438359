//! Entrypoint: load `Config` from the environment, wire a tracing
//! subscriber, and hand control to the driver loop (spec.md §1, §6).
//!
//! The RPC transport, wallet/signer, log watcher and persistent storage
//! driver are external collaborators this crate specifies only at their
//! trait boundary (`validator_core::driver::{EventSource, ShareTransport,
//! PacketSource}`, `validator_core::actions::ActionExecutor`,
//! `validator_core::state::storage::StorageBackend`) — wiring them to a
//! real chain is a deployment concern outside the core, the same way the
//! teacher's `multisig` crate is driven by the outer `engine` crate's
//! concrete `eth`/`state_chain` clients rather than containing them itself.

use async_trait::async_trait;
use validator_core::actions::{Action, ActionExecutor, InMemoryActionQueue};
use validator_core::config::Config;
use validator_core::crypto::field::Scalar;
use validator_core::crypto::Rng;
use rand::SeedableRng;
use validator_core::driver::{Driver, DriverConfig, EventSource, PacketSource, ShareTransport};
use validator_core::error::{ProtocolError, Result};
use validator_core::events::RawEventLog;
use validator_core::model::group::GroupId;
use validator_core::model::participant::{ParticipantId, ParticipantTable};
use validator_core::state::consensus::MessageHash;
use validator_core::state::storage::InMemoryStorage;
use validator_core::verification::{EpochRolloverPacket, SafeTransactionPacket, TransactionCheckConfig, VerificationEngine};

/// Polls for coordinator logs. Not wired to a real chain here — a
/// deployment substitutes an RPC-backed implementation (spec.md §1 "log
/// watcher", out of scope for the core).
struct NoOpEventSource;

impl EventSource for NoOpEventSource {
	fn poll(&mut self) -> Result<Vec<RawEventLog>> {
		Ok(Vec::new())
	}
}

/// Deals DKG secret shares over a confidential channel (spec.md §4.2 round
/// 2). Not wired here — a deployment substitutes an authenticated transport.
struct NoOpShareTransport;

impl ShareTransport for NoOpShareTransport {
	fn deal(&self, _group_id: GroupId, _recipient: ParticipantId, _share: &Scalar) -> Result<()> {
		Ok(())
	}

	fn incoming(&mut self, _group_id: GroupId) -> Vec<(ParticipantId, Scalar)> {
		Vec::new()
	}
}

/// Fetches the full typed payload behind a proposal (spec.md §4.4). Not
/// wired here — a deployment substitutes a relayer/RPC-backed lookup.
struct NoOpPacketSource;

impl PacketSource for NoOpPacketSource {
	fn epoch_rollover_packet(&self, _active_epoch: u64, _proposed_epoch: u64) -> Result<EpochRolloverPacket> {
		Err(ProtocolError::Fatal("epoch rollover packet source is not wired".into()))
	}

	fn safe_transaction_packet(&self, _epoch: u64, _safe_tx_hash: MessageHash) -> Result<SafeTransactionPacket> {
		Err(ProtocolError::Fatal("safe transaction packet source is not wired".into()))
	}
}

/// Submits an action on-chain (spec.md §4.5). Not wired here — a deployment
/// substitutes a wallet/RPC-backed executor.
struct NoOpActionExecutor;

#[async_trait]
impl ActionExecutor for NoOpActionExecutor {
	async fn execute(&self, action: &Action) -> Result<()> {
		tracing::info!(tag = action.tag(), "action would be submitted to the coordinator");
		Ok(())
	}
}

fn driver_config(config: &Config) -> anyhow::Result<DriverConfig> {
	let participants = ParticipantTable::from_ordered_addresses(config.participants.clone());

	Ok(DriverConfig {
		participants,
		own_address: {
			let mut pk_bytes = config.private_key;
			let secret = secp256k1::SecretKey::from_slice(&pk_bytes).map_err(|e| anyhow::anyhow!(e))?;
			use zeroize::Zeroize;
			pk_bytes.zeroize();
			let public = secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, &secret);
			let hash = validator_core::crypto::hash::keccak256_raw(&[&public.serialize_uncompressed()[1..]]);
			ethereum_types::Address::from_slice(&hash[12..])
		},
		consensus_address: config.consensus_address()?,
		key_gen_timeout: config.key_gen_timeout(),
		signing_timeout: config.signing_timeout(),
		complaint_deadline: config.complaint_deadline(),
		reorg_depth: config.reorg_depth(),
		genesis_salt: Some(config.genesis_salt),
	})
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = Config::from_env()?;

	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
		.try_init()
		.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

	let driver_config = driver_config(&config)?;
	let verification =
		VerificationEngine::new(config.chain_id, config.consensus_address()?, TransactionCheckConfig::default());

	let mut driver = Driver::new(
		driver_config,
		Box::new(InMemoryStorage::new()),
		Box::new(InMemoryActionQueue::new()),
		Box::new(NoOpActionExecutor),
		Box::new(NoOpEventSource),
		Box::new(NoOpShareTransport),
		Box::new(NoOpPacketSource),
		verification,
		Rng::from_entropy(),
	);

	tracing::info!("validator core starting");

	// Per spec.md §7: a fatal error from the driver loop is a process-exit
	// condition, left to the supervising environment to restart.
	driver.run().await.map_err(|e| anyhow::anyhow!("driver loop exited: {e}"))?;

	Ok(())
}
