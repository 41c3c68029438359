//! Crate-wide error taxonomy (spec.md §7).
//!
//! Pure state-machine handlers never raise for ordinary protocol faults —
//! they encode them as state (an empty diff, a complaint, a deadline-driven
//! transition). Cryptographic checks in the verification and FROST engines
//! do throw; those throws are caught at the driver boundary, logged with the
//! offending event, and produce no diff. This split mirrors the teacher's
//! `CeremonyFailureReason` pattern (`thiserror` variants plus a `log` method
//! tagging each with a short code for log search).

use thiserror::Error;
use tracing::warn;

pub const TAG_VALIDATION: &str = "E0";
pub const TAG_VERIFICATION: &str = "E1";
pub const TAG_DEADLINE_EXPIRY: &str = "E2";
pub const TAG_TRANSIENT: &str = "E3";
pub const TAG_FATAL: &str = "E4";

/// Faults raised while checking a FROST DKG or signing round against the
/// cryptographic invariants each round must satisfy.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationFailure {
	#[error("invalid coefficient commitment")]
	InvalidCommitment,
	#[error("invalid proof of knowledge")]
	InvalidProofOfKnowledge,
	#[error("secret share does not match dealer's committed polynomial")]
	InvalidSecretShare,
	#[error("invalid Merkle inclusion proof")]
	InvalidMerkleProof,
	#[error("invalid signature share")]
	InvalidSignatureShare,
	#[error("aggregate signature does not verify")]
	InvalidAggregateSignature,
	#[error("delegatecall not allowed to {0:#x}")]
	DelegatecallNotAllowed(ethereum_types::Address),
	#[error("self-call selector not allowed: {0:#x}")]
	SelfCallSelectorNotAllowed(u32),
	#[error("self-call must not carry value or delegatecall")]
	SelfCallMustBePlain,
	#[error("nested multisend through a non-allow-listed target")]
	NestedMultisendNotAllowed,
	#[error("malformed multisend payload")]
	MalformedMultisend,
	#[error("packet failed schema decode: {0}")]
	MalformedPacket(String),
}

/// The taxonomy from spec.md §7. `Validation` and `DeadlineExpiry` are
/// carried as plain data in state transitions, not usually constructed as
/// this enum; it exists so the driver boundary (and tests) have one type to
/// match on.
#[derive(Error, Debug)]
pub enum ProtocolError {
	#[error("validation: {0}")]
	Validation(String),
	#[error("verification: {0}")]
	Verification(#[from] VerificationFailure),
	#[error("deadline expired at block {block}")]
	DeadlineExpiry { block: u64 },
	#[error("transient: {0}")]
	Transient(String),
	#[error("fatal: {0}")]
	Fatal(String),
}

impl ProtocolError {
	/// Log the error at the appropriate level with its taxonomy tag, mirroring
	/// `CeremonyFailureReason::log` in the teacher's failure-reason module.
	pub fn log(&self) {
		match self {
			ProtocolError::Validation(msg) => {
				warn!(tag = TAG_VALIDATION, "validation failed, dropping: {msg}");
			},
			ProtocolError::Verification(reason) => {
				warn!(tag = TAG_VERIFICATION, "verification failed: {reason}");
			},
			ProtocolError::DeadlineExpiry { block } => {
				warn!(tag = TAG_DEADLINE_EXPIRY, block, "deadline expired");
			},
			ProtocolError::Transient(msg) => {
				warn!(tag = TAG_TRANSIENT, "transient failure, will retry: {msg}");
			},
			ProtocolError::Fatal(msg) => {
				tracing::error!(tag = TAG_FATAL, "fatal error, process must exit: {msg}");
			},
		}
	}

	pub fn is_fatal(&self) -> bool {
		matches!(self, ProtocolError::Fatal(_))
	}
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
