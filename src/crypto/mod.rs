//! Finite-field / curve arithmetic and domain-separated hashing over secp256k1.

pub mod field;
pub mod hash;
pub mod point;

pub use field::Scalar;
pub use point::Point;

/// A single CSPRNG abstraction all cryptographic randomness is routed through
/// (spec.md §9, "Randomness"). Tests substitute a seeded `StdRng` to get
/// deterministic nonce trees and PoK nonces.
pub type Rng = rand::rngs::StdRng;
