//! EIP-712-style typed hashing (spec.md §6 "Typed data hashes"). Domain is
//! `{chainId, verifyingContract=consensus}`; grounded in the crate choices of
//! the teacher's `state-chain/ethereum-eip712` workspace member (`ethabi`
//! for ABI-style encoding, `tiny-keccak` for Keccak-256), generalised here to
//! this spec's own typed structs rather than the teacher's chain-specific
//! ones.

use crate::crypto::hash::keccak256_raw;
use ethereum_types::{Address, U256};

fn uint_word(x: U256) -> [u8; 32] {
	let mut buf = [0u8; 32];
	x.to_big_endian(&mut buf);
	buf
}

fn u64_word(x: u64) -> [u8; 32] {
	uint_word(U256::from(x))
}

fn address_word(a: Address) -> [u8; 32] {
	let mut buf = [0u8; 32];
	buf[12..].copy_from_slice(a.as_bytes());
	buf
}

fn u8_word(x: u8) -> [u8; 32] {
	let mut buf = [0u8; 32];
	buf[31] = x;
	buf
}

const EIP712_DOMAIN_TYPE: &[u8] = b"EIP712Domain(uint256 chainId,address verifyingContract)";
const EPOCH_ROLLOVER_TYPE: &[u8] =
	b"EpochRollover(uint64 activeEpoch,uint64 proposedEpoch,uint64 rolloverBlock,uint256 groupKeyX,uint256 groupKeyY)";
const META_TRANSACTION_TYPE: &[u8] =
	b"MetaTransaction(uint256 chainId,address account,address to,uint256 value,uint8 operation,bytes data,uint256 nonce)";
const TRANSACTION_PROPOSAL_TYPE: &[u8] =
	b"TransactionProposal(uint64 epoch,MetaTransaction transaction)MetaTransaction(uint256 chainId,address account,address to,uint256 value,uint8 operation,bytes data,uint256 nonce)";

pub fn eip712_domain_separator(chain_id: u64, verifying_contract: Address) -> [u8; 32] {
	let type_hash = keccak256_raw(&[EIP712_DOMAIN_TYPE]);
	keccak256_raw(&[&type_hash, &u64_word(chain_id), &address_word(verifying_contract)])
}

fn typed_hash(domain_separator: [u8; 32], struct_hash: [u8; 32]) -> [u8; 32] {
	keccak256_raw(&[b"\x19\x01", &domain_separator, &struct_hash])
}

pub fn hash_epoch_rollover(
	domain_separator: [u8; 32],
	active_epoch: u64,
	proposed_epoch: u64,
	rollover_block: u64,
	group_key_x: [u8; 32],
	group_key_y: [u8; 32],
) -> [u8; 32] {
	let type_hash = keccak256_raw(&[EPOCH_ROLLOVER_TYPE]);
	let struct_hash = keccak256_raw(&[
		&type_hash,
		&u64_word(active_epoch),
		&u64_word(proposed_epoch),
		&u64_word(rollover_block),
		&group_key_x,
		&group_key_y,
	]);
	typed_hash(domain_separator, struct_hash)
}

/// `MetaTransaction` is itself a nested struct, so its contribution to the
/// `TransactionProposal` struct hash is the hash of the encoded
/// `MetaTransaction` struct (EIP-712's rule for struct-typed fields).
pub fn hash_meta_transaction(
	chain_id: u64,
	account: Address,
	to: Address,
	value: U256,
	operation: u8,
	data: &[u8],
	nonce: U256,
) -> [u8; 32] {
	let type_hash = keccak256_raw(&[META_TRANSACTION_TYPE]);
	let data_hash = keccak256_raw(&[data]);
	keccak256_raw(&[
		&type_hash,
		&u64_word(chain_id),
		&address_word(account),
		&address_word(to),
		&uint_word(value),
		&u8_word(operation),
		&data_hash,
		&uint_word(nonce),
	])
}

pub fn hash_transaction_proposal(
	domain_separator: [u8; 32],
	epoch: u64,
	meta_transaction_hash: [u8; 32],
) -> [u8; 32] {
	let type_hash = keccak256_raw(&[TRANSACTION_PROPOSAL_TYPE]);
	let struct_hash = keccak256_raw(&[&type_hash, &u64_word(epoch), &meta_transaction_hash]);
	typed_hash(domain_separator, struct_hash)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn epoch_rollover_hash_is_deterministic() {
		let domain = eip712_domain_separator(1, Address::from([1u8; 20]));
		let a = hash_epoch_rollover(domain, 0, 1, 1000, [2u8; 32], [3u8; 32]);
		let b = hash_epoch_rollover(domain, 0, 1, 1000, [2u8; 32], [3u8; 32]);
		assert_eq!(a, b);
	}

	#[test]
	fn different_epochs_hash_differently() {
		let domain = eip712_domain_separator(1, Address::from([1u8; 20]));
		let a = hash_epoch_rollover(domain, 0, 1, 1000, [2u8; 32], [3u8; 32]);
		let b = hash_epoch_rollover(domain, 0, 2, 1000, [2u8; 32], [3u8; 32]);
		assert_ne!(a, b);
	}

	#[test]
	fn transaction_proposal_hash_changes_with_inner_transaction() {
		let domain = eip712_domain_separator(1, Address::from([9u8; 20]));
		let account = Address::from([1u8; 20]);
		let to = Address::from([2u8; 20]);

		let tx_a = hash_meta_transaction(1, account, to, U256::zero(), 0, b"\xba\xdd\xad\x42", U256::zero());
		let tx_b = hash_meta_transaction(1, account, to, U256::one(), 0, b"\xba\xdd\xad\x42", U256::zero());

		assert_ne!(
			hash_transaction_proposal(domain, 11, tx_a),
			hash_transaction_proposal(domain, 11, tx_b)
		);
	}
}
