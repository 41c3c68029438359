//! The FROST cryptographic engine (spec.md §4.2, §4.3): DKG and signing.

pub mod dkg;
pub mod nonce_tree;
pub mod signing;
