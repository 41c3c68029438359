//! Per-target transaction checks for `SafeTransactionPacket` (spec.md §4.4):
//! delegatecall allow-listing, self-call selector rules, and recursive
//! multisend decomposition.
//!
//! Grounded in the teacher's `ethabi`-based contract ABI decoding idiom
//! (`engine/src/eth/key_manager/key_manager.rs`'s selector/event lookup
//! pattern), applied here to Gnosis-Safe-style packed MultiSend call data
//! rather than to event logs. The packed MultiSend encoding itself
//! (`operation(1) ∥ to(20) ∥ value(32) ∥ dataLength(32) ∥ data`, repeated)
//! is not bespoke to this spec: it is the standard Gnosis Safe `MultiSend`
//! contract's transaction encoding, which any Safe-compatible verifier must
//! decode the same way.

use super::selector_of;
use crate::error::{Result, VerificationFailure};
use ethabi::{ParamType, Token};
use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// `MetaTransaction(uint256 chainId, address account, address to, uint256
/// value, uint8 operation, bytes data, uint256 nonce)` (spec.md §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaTransaction {
	pub chain_id: u64,
	pub account: Address,
	pub to: Address,
	pub value: U256,
	/// `0` = call, `1` = delegatecall.
	pub operation: u8,
	pub data: Vec<u8>,
	pub nonce: U256,
}

const OPERATION_CALL: u8 = 0;
const OPERATION_DELEGATECALL: u8 = 1;

/// Recursion guard: a multisend nested this deep is treated as malformed
/// rather than walked forever.
const MAX_MULTISEND_DEPTH: u32 = 8;

/// Selectors recognised as legitimate Safe self-calls, and the rule each
/// must additionally satisfy. Per spec.md §4.4 point 2, every self-call
/// selector not in this set is rejected outright.
#[derive(Clone, Debug, Default)]
pub struct TransactionCheckConfig {
	/// Delegatecall targets allow-listed per chain (upgrade singletons,
	/// sign-message helpers, approved multisend contracts).
	pub allowed_delegatecall_targets: HashSet<Address>,
	/// Contracts whose calldata is itself a packed MultiSend payload.
	pub multisend_targets: HashSet<Address>,
	/// The four known-safe self-call selectors: `setGuard`,
	/// `setModuleGuard`, `setFallbackHandler`, `enableModule`.
	pub self_call_selectors: HashSet<[u8; 4]>,
}

/// Validate a `MetaTransaction` (and, if it is a multisend, every inner
/// transaction recursively). `depth` tracks multisend nesting.
pub fn check_meta_transaction(
	tx: &MetaTransaction,
	account: Address,
	cfg: &TransactionCheckConfig,
	depth: u32,
) -> Result<()> {
	if depth > MAX_MULTISEND_DEPTH {
		return Err(VerificationFailure::MalformedMultisend.into());
	}

	if tx.operation == OPERATION_DELEGATECALL {
		if tx.to != account && !cfg.allowed_delegatecall_targets.contains(&tx.to) {
			return Err(VerificationFailure::DelegatecallNotAllowed(tx.to).into());
		}
	}

	if tx.to == account {
		check_self_call(tx, cfg)?;
	}

	if cfg.multisend_targets.contains(&tx.to) {
		if depth > 0 && !cfg.allowed_delegatecall_targets.contains(&tx.to) {
			// A nested multisend must itself be reached through an
			// allow-listed call (spec.md §4.4 point 3: "no nested
			// multisends through un-allow-listed targets").
			return Err(VerificationFailure::NestedMultisendNotAllowed.into());
		}
		for inner in decode_multisend(&tx.data)? {
			check_meta_transaction(&inner, account, cfg, depth + 1)?;
		}
	}

	Ok(())
}

/// Self-calls must target a known selector, carry no value, and never be a
/// delegatecall (spec.md §4.4 point 2).
fn check_self_call(tx: &MetaTransaction, cfg: &TransactionCheckConfig) -> Result<()> {
	if !tx.value.is_zero() || tx.operation == OPERATION_DELEGATECALL {
		return Err(VerificationFailure::SelfCallMustBePlain.into());
	}

	let selector = selector_of(&tx.data)?;
	if !cfg.self_call_selectors.contains(&selector) {
		return Err(VerificationFailure::SelfCallSelectorNotAllowed(u32::from_be_bytes(selector)).into());
	}

	Ok(())
}

/// Decode a packed Gnosis Safe MultiSend payload: the outer call is
/// `multiSend(bytes transactions)`; each inner transaction is
/// `operation(1) ∥ to(20) ∥ value(32) ∥ dataLength(32) ∥ data(dataLength)`.
pub fn decode_multisend(calldata: &[u8]) -> Result<Vec<MetaTransaction>> {
	let selector = selector_of(calldata)?;
	let body = &calldata[4..];

	let tokens = ethabi::decode(&[ParamType::Bytes], body)
		.map_err(|e| VerificationFailure::MalformedPacket(format!("multisend decode: {e}")))?;
	let packed = match tokens.into_iter().next() {
		Some(Token::Bytes(b)) => b,
		_ => return Err(VerificationFailure::MalformedMultisend.into()),
	};

	let _ = selector; // the multiSend selector itself is not re-validated here

	let mut out = Vec::new();
	let mut cursor = 0usize;
	while cursor < packed.len() {
		if cursor + 1 + 20 + 32 + 32 > packed.len() {
			return Err(VerificationFailure::MalformedMultisend.into());
		}
		let operation = packed[cursor];
		cursor += 1;
		let to = Address::from_slice(&packed[cursor..cursor + 20]);
		cursor += 20;
		let value = U256::from_big_endian(&packed[cursor..cursor + 32]);
		cursor += 32;
		let data_len = U256::from_big_endian(&packed[cursor..cursor + 32]).as_usize();
		cursor += 32;
		if cursor + data_len > packed.len() {
			return Err(VerificationFailure::MalformedMultisend.into());
		}
		let data = packed[cursor..cursor + data_len].to_vec();
		cursor += data_len;

		out.push(MetaTransaction {
			// chain_id/account/nonce are not encoded per-inner-transaction
			// in the packed format; they are inherited from the enclosing
			// MetaTransaction by the caller's recursive check.
			chain_id: 0,
			account: Address::zero(),
			to,
			value,
			operation,
			data,
			nonce: U256::zero(),
		});
	}

	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cfg_with_selector(selector: [u8; 4]) -> TransactionCheckConfig {
		let mut cfg = TransactionCheckConfig::default();
		cfg.self_call_selectors.insert(selector);
		cfg
	}

	#[test]
	fn plain_call_passes_with_no_config() {
		let tx = MetaTransaction {
			chain_id: 1,
			account: Address::from([1; 20]),
			to: Address::from([2; 20]),
			value: U256::zero(),
			operation: 0,
			data: vec![1, 2, 3, 4],
			nonce: U256::zero(),
		};
		assert!(check_meta_transaction(&tx, tx.account, &TransactionCheckConfig::default(), 0).is_ok());
	}

	#[test]
	fn delegatecall_to_unlisted_target_rejected() {
		let account = Address::from([1; 20]);
		let tx = MetaTransaction {
			chain_id: 1,
			account,
			to: Address::from([2; 20]),
			value: U256::zero(),
			operation: 1,
			data: vec![],
			nonce: U256::zero(),
		};
		let err = check_meta_transaction(&tx, account, &TransactionCheckConfig::default(), 0).unwrap_err();
		assert!(matches!(err, crate::ProtocolError::Verification(VerificationFailure::DelegatecallNotAllowed(_))));
	}

	#[test]
	fn delegatecall_to_allow_listed_target_accepted() {
		let account = Address::from([1; 20]);
		let target = Address::from([9; 20]);
		let mut cfg = TransactionCheckConfig::default();
		cfg.allowed_delegatecall_targets.insert(target);
		let tx = MetaTransaction {
			chain_id: 1,
			account,
			to: target,
			value: U256::zero(),
			operation: 1,
			data: vec![],
			nonce: U256::zero(),
		};
		assert!(check_meta_transaction(&tx, account, &cfg, 0).is_ok());
	}

	#[test]
	fn self_call_with_known_selector_and_no_value_accepted() {
		let account = Address::from([1; 20]);
		let selector = [0xe1, 0x9a, 0x9d, 0xd9]; // setGuard(address)
		let tx = MetaTransaction {
			chain_id: 1,
			account,
			to: account,
			value: U256::zero(),
			operation: 0,
			data: selector.to_vec(),
			nonce: U256::zero(),
		};
		assert!(check_meta_transaction(&tx, account, &cfg_with_selector(selector), 0).is_ok());
	}

	#[test]
	fn self_call_with_value_rejected_even_if_selector_known() {
		let account = Address::from([1; 20]);
		let selector = [0xe1, 0x9a, 0x9d, 0xd9];
		let tx = MetaTransaction {
			chain_id: 1,
			account,
			to: account,
			value: U256::one(),
			operation: 0,
			data: selector.to_vec(),
			nonce: U256::zero(),
		};
		let err = check_meta_transaction(&tx, account, &cfg_with_selector(selector), 0).unwrap_err();
		assert!(matches!(err, crate::ProtocolError::Verification(VerificationFailure::SelfCallMustBePlain)));
	}

	#[test]
	fn self_call_with_unknown_selector_rejected() {
		let account = Address::from([1; 20]);
		let tx = MetaTransaction {
			chain_id: 1,
			account,
			to: account,
			value: U256::zero(),
			operation: 0,
			data: vec![0xde, 0xad, 0xbe, 0xef],
			nonce: U256::zero(),
		};
		let err = check_meta_transaction(&tx, account, &TransactionCheckConfig::default(), 0).unwrap_err();
		assert!(matches!(
			err,
			crate::ProtocolError::Verification(VerificationFailure::SelfCallSelectorNotAllowed(_))
		));
	}

	#[test]
	fn nested_multisend_through_unlisted_target_rejected() {
		let account = Address::from([1; 20]);
		let multisend_contract = Address::from([7; 20]);
		let mut cfg = TransactionCheckConfig::default();
		cfg.multisend_targets.insert(multisend_contract);

		// An inner transaction that itself targets the multisend contract,
		// without being allow-listed for delegatecall, must be rejected
		// once nested (depth > 0).
		let inner = encode_multisend_call(&[MetaTransaction {
			chain_id: 0,
			account: Address::zero(),
			to: Address::from([8; 20]),
			value: U256::zero(),
			operation: 0,
			data: vec![],
			nonce: U256::zero(),
		}]);

		let outer = MetaTransaction {
			chain_id: 1,
			account,
			to: multisend_contract,
			value: U256::zero(),
			operation: 0,
			data: encode_multisend_call(&[MetaTransaction {
				chain_id: 0,
				account: Address::zero(),
				to: multisend_contract,
				value: U256::zero(),
				operation: 0,
				data: inner,
				nonce: U256::zero(),
			}]),
			nonce: U256::zero(),
		};

		let err = check_meta_transaction(&outer, account, &cfg, 0).unwrap_err();
		assert!(matches!(err, crate::ProtocolError::Verification(VerificationFailure::NestedMultisendNotAllowed)));
	}

	fn encode_multisend_call(txs: &[MetaTransaction]) -> Vec<u8> {
		let mut packed = Vec::new();
		for tx in txs {
			packed.push(tx.operation);
			packed.extend_from_slice(tx.to.as_bytes());
			let mut value_buf = [0u8; 32];
			tx.value.to_big_endian(&mut value_buf);
			packed.extend_from_slice(&value_buf);
			let mut len_buf = [0u8; 32];
			U256::from(tx.data.len()).to_big_endian(&mut len_buf);
			packed.extend_from_slice(&len_buf);
			packed.extend_from_slice(&tx.data);
		}
		let encoded = ethabi::encode(&[Token::Bytes(packed)]);
		let mut out = vec![0x8d, 0x80, 0xff, 0x0a]; // multiSend(bytes) selector
		out.extend_from_slice(&encoded);
		out
	}
}
