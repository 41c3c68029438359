//! The verification engine (spec.md §4.4): canonicalises, hashes and
//! validates proposal payloads before a signing session is ever entered.
//!
//! Handlers are dispatched by a closed two-variant enum rather than an open
//! registry (spec.md §9 "sum types over class hierarchies" — the same
//! discriminant-match idiom the teacher uses for `KeygenData`/`SigningData`).
//! A failing check raises a `VerificationFailure`; the packet is dropped and
//! the signing flow is never entered. Verified hashes are cached so a
//! signing session is never allowed to begin collecting nonce commitments
//! for a packet this engine has not already accepted (spec.md §8 property 7).

pub mod safe_transaction;
pub mod typed_hash;

use crate::error::{Result, VerificationFailure};
use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub use safe_transaction::{MetaTransaction, TransactionCheckConfig};

/// `EpochRolloverPacket` (spec.md §3 typed data hashes).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRolloverPacket {
	pub active_epoch: u64,
	pub proposed_epoch: u64,
	pub rollover_block: u64,
	pub group_key_x: [u8; 32],
	pub group_key_y: [u8; 32],
}

/// `SafeTransactionPacket` (spec.md §3 typed data hashes).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeTransactionPacket {
	pub epoch: u64,
	pub transaction: MetaTransaction,
}

/// The closed set of packet kinds this engine ever signs over.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
	EpochRollover(EpochRolloverPacket),
	SafeTransaction(SafeTransactionPacket),
}

impl Packet {
	/// Canonicalise and hash the packet under the EIP-712 consensus domain,
	/// then run its domain-specific checks. Returns the message hash the
	/// committee will sign over.
	pub fn verify(&self, domain_separator: [u8; 32], cfg: &TransactionCheckConfig) -> Result<[u8; 32]> {
		match self {
			Packet::EpochRollover(p) => Ok(typed_hash::hash_epoch_rollover(
				domain_separator,
				p.active_epoch,
				p.proposed_epoch,
				p.rollover_block,
				p.group_key_x,
				p.group_key_y,
			)),
			Packet::SafeTransaction(p) => {
				safe_transaction::check_meta_transaction(&p.transaction, p.transaction.account, cfg, 0)?;
				let tx_hash = typed_hash::hash_meta_transaction(
					p.transaction.chain_id,
					p.transaction.account,
					p.transaction.to,
					p.transaction.value,
					p.transaction.operation,
					&p.transaction.data,
					p.transaction.nonce,
				);
				Ok(typed_hash::hash_transaction_proposal(domain_separator, p.epoch, tx_hash))
			},
		}
	}
}

/// Caches message hashes this engine has already accepted. Consulted before
/// any signing entry transitions to `collect_nonce_commitments` (spec.md
/// §4.4, §8 property 7).
#[derive(Debug, Default)]
pub struct VerificationEngine {
	domain_separator: [u8; 32],
	check_config: TransactionCheckConfig,
	verified: HashSet<[u8; 32]>,
}

impl VerificationEngine {
	pub fn new(chain_id: u64, consensus_address: Address, check_config: TransactionCheckConfig) -> Self {
		VerificationEngine {
			domain_separator: typed_hash::eip712_domain_separator(chain_id, consensus_address),
			check_config,
			verified: HashSet::new(),
		}
	}

	/// Verify a packet and record its hash in the cache. Invalid packets
	/// throw and are never recorded (spec.md §4.4).
	pub fn verify(&mut self, packet: &Packet) -> Result<[u8; 32]> {
		let hash = packet.verify(self.domain_separator, &self.check_config)?;
		self.verified.insert(hash);
		Ok(hash)
	}

	pub fn is_verified(&self, hash: &[u8; 32]) -> bool {
		self.verified.contains(hash)
	}
}

pub(crate) fn selector_of(data: &[u8]) -> Result<[u8; 4]> {
	data.get(..4)
		.and_then(|s| s.try_into().ok())
		.ok_or_else(|| VerificationFailure::MalformedPacket("calldata shorter than a selector".into()).into())
}
