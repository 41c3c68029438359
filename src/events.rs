//! Coordinator/consensus event decoding (spec.md §6). Grounded in the
//! teacher's `eth::key_manager` module's selector/topic lookup idiom
//! (`engine/src/eth/key_manager/key_manager.rs`): a static table mapping
//! each event's Keccak-256 topic hash to an `ethabi::Event` definition, used
//! to decode a raw log into a typed event. Unknown topics are ignored
//! (spec.md §9: "the driver MUST skip logs it does not recognise").

use crate::model::group::GroupId;
use crate::model::participant::ParticipantId;
use crate::state::consensus::{MessageHash, SignatureId};
use ethabi::{Event, EventParam, ParamType, RawLog};
use ethereum_types::Address;
use lazy_static::lazy_static;
use std::collections::HashMap;

/// A raw EVM log as the log watcher hands it to the driver: not yet known
/// to correspond to any particular event.
#[derive(Clone, Debug)]
pub struct RawEventLog {
	pub address: Address,
	pub topics: Vec<[u8; 32]>,
	pub data: Vec<u8>,
	pub block_number: u64,
	pub log_index: u64,
}

/// One decoded event plus the `(block, index)` key total ordering depends
/// on (spec.md §5: "events within a block are ordered by log index").
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventTransition {
	pub block_number: u64,
	pub log_index: u64,
	pub event: ProtocolEvent,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolEvent {
	KeyGen { group_id: GroupId, participants: Vec<Address>, count: u32, threshold: u32, context: [u8; 32] },
	KeyGenCommitted { group_id: GroupId, identifier: ParticipantId, commitment: Vec<u8>, committed: bool },
	KeyGenSecretShared { group_id: GroupId, identifier: ParticipantId, share: Vec<u8>, completed: bool },
	KeyGenComplaintSubmitted { group_id: GroupId, plaintiff: ParticipantId, accused: ParticipantId },
	KeyGenComplaintResponded { group_id: GroupId, accused: ParticipantId, share: Vec<u8> },
	KeyGenConfirmed { group_id: GroupId, identifier: ParticipantId },
	NonceCommitmentsHash { group_id: GroupId, chunk: u32, root: [u8; 32] },
	SignRequest { signature_id: SignatureId, message_hash: MessageHash, group_id: GroupId },
	NonceCommitments { signature_id: SignatureId, identifier: ParticipantId, d: Vec<u8>, e: Vec<u8> },
	SignatureShare { signature_id: SignatureId, identifier: ParticipantId, z_i: Vec<u8> },
	Signed { signature_id: SignatureId, signature: Vec<u8> },
	EpochProposed { active_epoch: u64, proposed_epoch: u64 },
	EpochStaged { proposed_epoch: u64, group_id: GroupId },
	TransactionProposed { epoch: u64, safe_tx_hash: [u8; 32] },
	TransactionAttested { signature_id: SignatureId },
}

fn event(name: &str, inputs: Vec<EventParam>) -> Event {
	Event { name: name.to_string(), inputs, anonymous: false }
}

fn indexed(name: &str, kind: ParamType) -> EventParam {
	EventParam { name: name.to_string(), kind, indexed: true }
}

fn plain(name: &str, kind: ParamType) -> EventParam {
	EventParam { name: name.to_string(), kind, indexed: false }
}

lazy_static! {
	static ref EVENT_KEY_GEN: Event = event(
		"KeyGen",
		vec![
			indexed("groupId", ParamType::FixedBytes(32)),
			plain("participants", ParamType::Array(Box::new(ParamType::Address))),
			plain("count", ParamType::Uint(32)),
			plain("threshold", ParamType::Uint(32)),
			plain("context", ParamType::FixedBytes(32)),
		],
	);
	static ref EVENT_KEY_GEN_COMMITTED: Event = event(
		"KeyGenCommitted",
		vec![
			indexed("groupId", ParamType::FixedBytes(32)),
			plain("identifier", ParamType::Uint(32)),
			plain("commitment", ParamType::Bytes),
			plain("committed", ParamType::Bool),
		],
	);
	static ref EVENT_KEY_GEN_SECRET_SHARED: Event = event(
		"KeyGenSecretShared",
		vec![
			indexed("groupId", ParamType::FixedBytes(32)),
			plain("identifier", ParamType::Uint(32)),
			plain("share", ParamType::Bytes),
			plain("completed", ParamType::Bool),
		],
	);
	static ref EVENT_KEY_GEN_COMPLAINT_SUBMITTED: Event = event(
		"KeyGenComplaintSubmitted",
		vec![
			indexed("groupId", ParamType::FixedBytes(32)),
			plain("plaintiff", ParamType::Uint(32)),
			plain("accused", ParamType::Uint(32)),
		],
	);
	static ref EVENT_KEY_GEN_COMPLAINT_RESPONDED: Event = event(
		"KeyGenComplaintResponded",
		vec![
			indexed("groupId", ParamType::FixedBytes(32)),
			plain("accused", ParamType::Uint(32)),
			plain("share", ParamType::Bytes),
		],
	);
	static ref EVENT_KEY_GEN_CONFIRMED: Event = event(
		"KeyGenConfirmed",
		vec![indexed("groupId", ParamType::FixedBytes(32)), plain("identifier", ParamType::Uint(32))],
	);
	static ref EVENT_NONCE_COMMITMENTS_HASH: Event = event(
		"NonceCommitmentsHash",
		vec![
			indexed("groupId", ParamType::FixedBytes(32)),
			plain("chunk", ParamType::Uint(32)),
			plain("root", ParamType::FixedBytes(32)),
		],
	);
	static ref EVENT_SIGN_REQUEST: Event = event(
		"SignRequest",
		vec![
			indexed("signatureId", ParamType::FixedBytes(32)),
			plain("messageHash", ParamType::FixedBytes(32)),
			plain("groupId", ParamType::FixedBytes(32)),
		],
	);
	static ref EVENT_NONCE_COMMITMENTS: Event = event(
		"NonceCommitments",
		vec![
			indexed("signatureId", ParamType::FixedBytes(32)),
			plain("identifier", ParamType::Uint(32)),
			plain("d", ParamType::Bytes),
			plain("e", ParamType::Bytes),
		],
	);
	static ref EVENT_SIGNATURE_SHARE: Event = event(
		"SignatureShare",
		vec![
			indexed("signatureId", ParamType::FixedBytes(32)),
			plain("identifier", ParamType::Uint(32)),
			plain("zI", ParamType::Bytes),
		],
	);
	static ref EVENT_SIGNED: Event = event(
		"Signed",
		vec![indexed("signatureId", ParamType::FixedBytes(32)), plain("signature", ParamType::Bytes)],
	);
	static ref EVENT_EPOCH_PROPOSED: Event = event(
		"EpochProposed",
		vec![plain("activeEpoch", ParamType::Uint(64)), plain("proposedEpoch", ParamType::Uint(64))],
	);
	static ref EVENT_EPOCH_STAGED: Event = event(
		"EpochStaged",
		vec![plain("proposedEpoch", ParamType::Uint(64)), indexed("groupId", ParamType::FixedBytes(32))],
	);
	static ref EVENT_TRANSACTION_PROPOSED: Event = event(
		"TransactionProposed",
		vec![plain("epoch", ParamType::Uint(64)), indexed("safeTxHash", ParamType::FixedBytes(32))],
	);
	static ref EVENT_TRANSACTION_ATTESTED: Event =
		event("TransactionAttested", vec![indexed("signatureId", ParamType::FixedBytes(32))]);
	static ref TOPIC_TABLE: HashMap<[u8; 32], &'static str> = {
		let mut m = HashMap::new();
		m.insert(EVENT_KEY_GEN.signature().0, "KeyGen");
		m.insert(EVENT_KEY_GEN_COMMITTED.signature().0, "KeyGenCommitted");
		m.insert(EVENT_KEY_GEN_SECRET_SHARED.signature().0, "KeyGenSecretShared");
		m.insert(EVENT_KEY_GEN_COMPLAINT_SUBMITTED.signature().0, "KeyGenComplaintSubmitted");
		m.insert(EVENT_KEY_GEN_COMPLAINT_RESPONDED.signature().0, "KeyGenComplaintResponded");
		m.insert(EVENT_KEY_GEN_CONFIRMED.signature().0, "KeyGenConfirmed");
		m.insert(EVENT_NONCE_COMMITMENTS_HASH.signature().0, "NonceCommitmentsHash");
		m.insert(EVENT_SIGN_REQUEST.signature().0, "SignRequest");
		m.insert(EVENT_NONCE_COMMITMENTS.signature().0, "NonceCommitments");
		m.insert(EVENT_SIGNATURE_SHARE.signature().0, "SignatureShare");
		m.insert(EVENT_SIGNED.signature().0, "Signed");
		m.insert(EVENT_EPOCH_PROPOSED.signature().0, "EpochProposed");
		m.insert(EVENT_EPOCH_STAGED.signature().0, "EpochStaged");
		m.insert(EVENT_TRANSACTION_PROPOSED.signature().0, "TransactionProposed");
		m.insert(EVENT_TRANSACTION_ATTESTED.signature().0, "TransactionAttested");
		m
	};
}

fn fixed32(tokens: &[ethabi::Token], idx: usize) -> [u8; 32] {
	match &tokens[idx] {
		ethabi::Token::FixedBytes(b) => b.as_slice().try_into().expect("FixedBytes(32) is 32 bytes"),
		_ => panic!("expected FixedBytes(32) at position {idx}"),
	}
}

fn uint(tokens: &[ethabi::Token], idx: usize) -> u64 {
	match &tokens[idx] {
		ethabi::Token::Uint(u) => u.as_u64(),
		_ => panic!("expected Uint at position {idx}"),
	}
}

fn bytes(tokens: &[ethabi::Token], idx: usize) -> Vec<u8> {
	match &tokens[idx] {
		ethabi::Token::Bytes(b) => b.clone(),
		_ => panic!("expected Bytes at position {idx}"),
	}
}

fn boolean(tokens: &[ethabi::Token], idx: usize) -> bool {
	match &tokens[idx] {
		ethabi::Token::Bool(b) => *b,
		_ => panic!("expected Bool at position {idx}"),
	}
}

fn addresses(tokens: &[ethabi::Token], idx: usize) -> Vec<Address> {
	match &tokens[idx] {
		ethabi::Token::Array(items) => items
			.iter()
			.map(|t| match t {
				ethabi::Token::Address(a) => Address::from(a.0),
				_ => panic!("expected an Address inside the participants array"),
			})
			.collect(),
		_ => panic!("expected Array at position {idx}"),
	}
}

/// Decode a raw log into a typed [`EventTransition`], or `None` if its
/// topic0 is not one this validator recognises (spec.md §9).
pub fn decode_log(log: &RawEventLog) -> Option<EventTransition> {
	let topic0 = *log.topics.first()?;
	let name = *TOPIC_TABLE.get(&topic0)?;

	let raw = RawLog { topics: log.topics.iter().map(|t| ethabi::ethereum_types::H256::from(*t)).collect(), data: log.data.clone() };

	let event = decoded_event(name, raw);

	Some(EventTransition { block_number: log.block_number, log_index: log.log_index, event })
}

fn decoded_event(name: &str, raw: RawLog) -> ProtocolEvent {
	macro_rules! parse {
		($event:expr) => {
			$event.parse_log(raw).expect("log matched a known topic but failed ABI decode").params
		};
	}

	match name {
		"KeyGen" => {
			let p = parse!(EVENT_KEY_GEN);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::KeyGen {
				group_id: fixed32(&t, 0),
				participants: addresses(&t, 1),
				count: uint(&t, 2) as u32,
				threshold: uint(&t, 3) as u32,
				context: fixed32(&t, 4),
			}
		},
		"KeyGenCommitted" => {
			let p = parse!(EVENT_KEY_GEN_COMMITTED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::KeyGenCommitted {
				group_id: fixed32(&t, 0),
				identifier: uint(&t, 1) as ParticipantId,
				commitment: bytes(&t, 2),
				committed: boolean(&t, 3),
			}
		},
		"KeyGenSecretShared" => {
			let p = parse!(EVENT_KEY_GEN_SECRET_SHARED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::KeyGenSecretShared {
				group_id: fixed32(&t, 0),
				identifier: uint(&t, 1) as ParticipantId,
				share: bytes(&t, 2),
				completed: boolean(&t, 3),
			}
		},
		"KeyGenComplaintSubmitted" => {
			let p = parse!(EVENT_KEY_GEN_COMPLAINT_SUBMITTED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::KeyGenComplaintSubmitted {
				group_id: fixed32(&t, 0),
				plaintiff: uint(&t, 1) as ParticipantId,
				accused: uint(&t, 2) as ParticipantId,
			}
		},
		"KeyGenComplaintResponded" => {
			let p = parse!(EVENT_KEY_GEN_COMPLAINT_RESPONDED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::KeyGenComplaintResponded {
				group_id: fixed32(&t, 0),
				accused: uint(&t, 1) as ParticipantId,
				share: bytes(&t, 2),
			}
		},
		"KeyGenConfirmed" => {
			let p = parse!(EVENT_KEY_GEN_CONFIRMED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::KeyGenConfirmed { group_id: fixed32(&t, 0), identifier: uint(&t, 1) as ParticipantId }
		},
		"NonceCommitmentsHash" => {
			let p = parse!(EVENT_NONCE_COMMITMENTS_HASH);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::NonceCommitmentsHash {
				group_id: fixed32(&t, 0),
				chunk: uint(&t, 1) as u32,
				root: fixed32(&t, 2),
			}
		},
		"SignRequest" => {
			let p = parse!(EVENT_SIGN_REQUEST);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::SignRequest {
				signature_id: fixed32(&t, 0),
				message_hash: fixed32(&t, 1),
				group_id: fixed32(&t, 2),
			}
		},
		"NonceCommitments" => {
			let p = parse!(EVENT_NONCE_COMMITMENTS);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::NonceCommitments {
				signature_id: fixed32(&t, 0),
				identifier: uint(&t, 1) as ParticipantId,
				d: bytes(&t, 2),
				e: bytes(&t, 3),
			}
		},
		"SignatureShare" => {
			let p = parse!(EVENT_SIGNATURE_SHARE);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::SignatureShare {
				signature_id: fixed32(&t, 0),
				identifier: uint(&t, 1) as ParticipantId,
				z_i: bytes(&t, 2),
			}
		},
		"Signed" => {
			let p = parse!(EVENT_SIGNED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::Signed { signature_id: fixed32(&t, 0), signature: bytes(&t, 1) }
		},
		"EpochProposed" => {
			let p = parse!(EVENT_EPOCH_PROPOSED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::EpochProposed { active_epoch: uint(&t, 0), proposed_epoch: uint(&t, 1) }
		},
		"EpochStaged" => {
			let p = parse!(EVENT_EPOCH_STAGED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::EpochStaged { proposed_epoch: uint(&t, 0), group_id: fixed32(&t, 1) }
		},
		"TransactionProposed" => {
			let p = parse!(EVENT_TRANSACTION_PROPOSED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::TransactionProposed { epoch: uint(&t, 0), safe_tx_hash: fixed32(&t, 1) }
		},
		"TransactionAttested" => {
			let p = parse!(EVENT_TRANSACTION_ATTESTED);
			let t: Vec<_> = p.into_iter().map(|p| p.value).collect();
			ProtocolEvent::TransactionAttested { signature_id: fixed32(&t, 0) }
		},
		_ => unreachable!("topic table only maps to names handled above"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_topic_is_ignored() {
		let log = RawEventLog { address: Address::zero(), topics: vec![[0xff; 32]], data: vec![], block_number: 1, log_index: 0 };
		assert!(decode_log(&log).is_none());
	}

	#[test]
	fn epoch_proposed_round_trips() {
		let data = ethabi::encode(&[ethabi::Token::Uint(3u64.into()), ethabi::Token::Uint(4u64.into())]);
		let log = RawEventLog {
			address: Address::zero(),
			topics: vec![EVENT_EPOCH_PROPOSED.signature().0],
			data,
			block_number: 10,
			log_index: 2,
		};
		let decoded = decode_log(&log).expect("known topic decodes");
		assert_eq!(decoded.block_number, 10);
		assert_eq!(decoded.log_index, 2);
		assert_eq!(decoded.event, ProtocolEvent::EpochProposed { active_epoch: 3, proposed_epoch: 4 });
	}
}
