//! Property-based coverage for spec.md §8 properties 1 and 4: the field/curve
//! arithmetic identities the whole FROST engine rests on, and Merkle proof
//! soundness over arbitrary leaf counts. Grounded in the teacher's own
//! `proptest` usage pattern (randomised strategies over raw byte arrays
//! rather than hand-picked vectors), applied here to this crate's public
//! `crypto`/`merkle` surface.

use proptest::prelude::*;
use validator_core::crypto::hash::h4_leaf;
use validator_core::crypto::{Point, Scalar};
use validator_core::merkle::{self, MerkleTree};

fn arb_scalar() -> impl Strategy<Value = Scalar> {
    any::<[u8; 32]>().prop_map(|bytes| Scalar::from_bytes_mod_order(&bytes))
}

proptest! {
    #[test]
    fn scalar_addition_is_commutative(a in arb_scalar(), b in arb_scalar()) {
        prop_assert_eq!(a.clone() + b.clone(), b + a);
    }

    #[test]
    fn scalar_zero_is_additive_identity(a in arb_scalar()) {
        prop_assert_eq!(a.clone() + Scalar::zero(), a);
    }

    #[test]
    fn scalar_multiplication_distributes_over_addition(a in arb_scalar(), b in arb_scalar(), c in arb_scalar()) {
        let lhs = a.clone() * (b.clone() + c.clone());
        let rhs = a.clone() * b + a * c;
        prop_assert_eq!(lhs, rhs);
    }

    #[test]
    fn nonzero_scalar_inverse_round_trips(a in arb_scalar()) {
        prop_assume!(!a.is_zero());
        let inv = a.invert().expect("non-zero scalar is invertible");
        prop_assert_eq!(a * inv, Scalar::from(1));
    }

    #[test]
    fn scalar_mult_is_compatible_with_point_addition(a in arb_scalar(), b in arb_scalar()) {
        // g*(a+b) == g*a + g*b, the identity FROST's Lagrange reconstruction
        // over the group public key depends on.
        let lhs = Point::from_scalar(&(a.clone() + b.clone()));
        let rhs = Point::from_scalar(&a) + Point::from_scalar(&b);
        prop_assert_eq!(lhs, rhs);
    }

    #[test]
    fn merkle_proof_verifies_for_every_leaf_at_any_count(count in 1usize..200, seed in any::<u64>()) {
        let leaves: Vec<[u8; 32]> = (0..count)
            .map(|i| h4_leaf(&(seed.wrapping_add(i as u64)).to_be_bytes()))
            .collect();
        let tree = MerkleTree::build(leaves.clone());
        let root = tree.root();

        for (i, leaf) in leaves.iter().enumerate() {
            let proof = tree.prove(i);
            prop_assert!(merkle::verify(*leaf, &proof, root));
        }
    }

    #[test]
    fn merkle_proof_rejects_a_substituted_leaf(count in 2usize..200, seed in any::<u64>()) {
        let leaves: Vec<[u8; 32]> = (0..count)
            .map(|i| h4_leaf(&(seed.wrapping_add(i as u64)).to_be_bytes()))
            .collect();
        let tree = MerkleTree::build(leaves.clone());
        let root = tree.root();
        let proof = tree.prove(0);
        let forged = h4_leaf(&seed.wrapping_add(999_999).to_be_bytes());
        prop_assume!(forged != leaves[0]);
        prop_assert!(!merkle::verify(forged, &proof, root));
    }
}
