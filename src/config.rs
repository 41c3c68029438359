//! Typed configuration over the recognised keys in spec.md §6, loaded the way
//! the teacher's engine settings are loaded: via the `config` crate layered
//! over environment variables.

use crate::crypto::hash::keccak256_raw;
use crate::error::{ProtocolError, Result};
use ethereum_types::Address;
use serde::Deserialize;

/// One day at 5-second blocks.
pub const DEFAULT_BLOCKS_PER_EPOCH: u64 = 17280;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub rpc_url: String,
	#[serde(with = "hex_32")]
	pub private_key: [u8; 32],
	#[serde(rename = "consensus_address")]
	pub consensus_address_raw: String,
	pub coordinator_address: Address,
	pub chain_id: u64,
	pub participants: Vec<Address>,
	#[serde(with = "hex_32", default = "zero_salt")]
	pub genesis_salt: [u8; 32],
	#[serde(default = "default_blocks_per_epoch")]
	pub blocks_per_epoch: u64,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

fn zero_salt() -> [u8; 32] {
	[0u8; 32]
}

fn default_blocks_per_epoch() -> u64 {
	DEFAULT_BLOCKS_PER_EPOCH
}

fn default_log_level() -> String {
	"info".to_string()
}

mod hex_32 {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
		let s = String::deserialize(deserializer)?;
		let s = s.strip_prefix("0x").unwrap_or(&s);
		let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
		bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))
	}
}

impl Config {
	/// Load configuration from the environment, using the `RPC_URL`,
	/// `PRIVATE_KEY`, ... keys named in spec.md §6.
	pub fn from_env() -> anyhow::Result<Config> {
		let raw = config::Config::builder()
			.add_source(config::Environment::default().try_parsing(true).list_separator(","))
			.build()?;

		let config: Config = raw.try_deserialize()?;

		validate_checksum(&config.consensus_address_raw)
			.map_err(|e| anyhow::anyhow!("CONSENSUS_ADDRESS: {e}"))?;

		Ok(config)
	}

	pub fn consensus_address(&self) -> anyhow::Result<Address> {
		Ok(self.consensus_address_raw.trim_start_matches("0x").parse()?)
	}

	/// Deadlines and reorg buffering aren't separate recognised keys: they
	/// scale with `blocksPerEpoch` the same way the teacher derives ceremony
	/// timeouts from the chain's own block time rather than hardcoding them.
	pub fn key_gen_timeout(&self) -> u64 {
		self.blocks_per_epoch / 360
	}

	pub fn signing_timeout(&self) -> u64 {
		self.blocks_per_epoch / 1440
	}

	pub fn complaint_deadline(&self) -> u64 {
		self.blocks_per_epoch / 1440
	}

	pub fn reorg_depth(&self) -> u64 {
		12
	}
}

/// EIP-55 checksum validation: if the supplied address mixes upper and lower
/// case (i.e. claims to be checksummed), every digit's case must match the
/// capitalisation rule derived from the Keccak-256 hash of the lowercase
/// address. An address given entirely in one case is accepted as
/// unchecksummed, matching the EIP-55 spec itself.
pub fn validate_checksum(address: &str) -> Result<()> {
	let hex_part = address.trim_start_matches("0x");
	let lower = hex_part.to_ascii_lowercase();

	let is_mixed_case = hex_part.chars().any(|c| c.is_ascii_uppercase())
		&& hex_part.chars().any(|c| c.is_ascii_lowercase());

	if !is_mixed_case {
		return Ok(());
	}

	let expected = to_checksum_address(&lower);
	if format!("0x{hex_part}") == expected {
		Ok(())
	} else {
		Err(ProtocolError::Validation(format!("bad checksum for address 0x{hex_part}")))
	}
}

/// Compute the EIP-55 checksummed representation of a lowercase hex address
/// (no `0x` prefix).
pub fn to_checksum_address(lower_hex: &str) -> String {
	let hash = keccak256_raw(&[lower_hex.as_bytes()]);
	let hash_hex = hex::encode(hash);

	let mut out = String::with_capacity(lower_hex.len() + 2);
	out.push_str("0x");
	for (c, h) in lower_hex.chars().zip(hash_hex.chars()) {
		if c.is_ascii_digit() {
			out.push(c);
		} else if h.to_digit(16).unwrap_or(0) >= 8 {
			out.push(c.to_ascii_uppercase());
		} else {
			out.push(c);
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn checksum_matches_known_vector() {
		// From EIP-55's own test vectors.
		let lower = "5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
		assert_eq!(to_checksum_address(lower), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
	}

	#[test]
	fn all_lowercase_address_is_accepted_as_unchecksummed() {
		assert!(validate_checksum("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").is_ok());
	}

	#[test]
	fn mixed_case_must_match_checksum() {
		assert!(validate_checksum("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_ok());
		assert!(validate_checksum("0x5aAeb6053f3E94C9b9A09f33669435E7Ef1BeAed").is_err());
	}
}
