use num_bigint::BigUint;
use secp256k1::constants::{CURVE_ORDER, SECRET_KEY_SIZE};
use serde::{Deserialize, Serialize};

type SK = secp256k1::SecretKey;

lazy_static::lazy_static! {
	static ref GROUP_ORDER: BigUint = BigUint::from_bytes_be(&CURVE_ORDER);
}

const ZERO_SCALAR_BYTES: [u8; 32] = [0; 32];

struct ArrayVisitor<A> {
	_marker: std::marker::PhantomData<A>,
}

impl<A> ArrayVisitor<A> {
	fn new() -> Self {
		Self { _marker: std::marker::PhantomData }
	}
}

impl<'de> serde::de::Visitor<'de> for ArrayVisitor<[u8; 32]> {
	type Value = [u8; 32];

	fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "32 bytes")
	}

	fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
	where
		A: serde::de::SeqAccess<'de>,
	{
		let mut out = [0u8; 32];
		for (i, byte) in out.iter_mut().enumerate() {
			*byte = seq
				.next_element()?
				.ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
		}
		Ok(out)
	}
}

/// An element of the scalar field of secp256k1, i.e. integers mod `n`.
///
/// Wrapped in `Option` so the additive identity (which `secp256k1::SecretKey`
/// cannot represent) has a home; arithmetic on `None` behaves like zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scalar(Option<SK>);

impl Scalar {
	pub fn zero() -> Self {
		Scalar(None)
	}

	pub fn is_zero(&self) -> bool {
		self.0.is_none()
	}

	pub fn random(rng: &mut impl rand::Rng) -> Self {
		Scalar(Some(SK::new(rng)))
	}

	/// Reduce an arbitrary 32-byte string modulo the group order.
	pub fn from_bytes_mod_order(x: &[u8; 32]) -> Self {
		let mut x = BigUint::from_bytes_be(x);
		if x >= *GROUP_ORDER {
			x -= &*GROUP_ORDER;
		}
		Self::from_reduced_bigint(&x)
	}

	fn from_reduced_bigint(x: &BigUint) -> Self {
		use num_traits::identities::Zero;

		assert!(x < &GROUP_ORDER, "value not within the scalar field");

		if x.is_zero() {
			Scalar(None)
		} else {
			let bytes = x.to_bytes_be();
			let mut array = [0u8; SECRET_KEY_SIZE];
			array[SECRET_KEY_SIZE - bytes.len()..].copy_from_slice(&bytes);
			Scalar(Some(SK::from_slice(&array).expect("reduced value is a valid scalar")))
		}
	}

	pub fn invert(&self) -> Option<Self> {
		self.0.map(|x| {
			let x = BigUint::from_bytes_be(x.as_ref());
			let inverse = x.modpow(&(&*GROUP_ORDER - 2u32), &GROUP_ORDER);
			Self::from_reduced_bigint(&inverse)
		})
	}

	pub fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
		match self.0.as_ref() {
			Some(sk) => sk.as_ref(),
			None => &ZERO_SCALAR_BYTES,
		}
	}

	pub(crate) fn inner(&self) -> Option<&SK> {
		self.0.as_ref()
	}

	pub(crate) fn from_secret_key(sk: SK) -> Self {
		Scalar(Some(sk))
	}
}

impl From<u32> for Scalar {
	fn from(x: u32) -> Self {
		if x == 0 {
			Scalar(None)
		} else {
			let mut array = [0u8; 32];
			array[28..].copy_from_slice(&x.to_be_bytes());
			Scalar(Some(SK::from_slice(&array).expect("u32 is within the scalar field")))
		}
	}
}

impl Default for Scalar {
	fn default() -> Self {
		Scalar::zero()
	}
}

impl std::ops::Add for &Scalar {
	type Output = Scalar;

	fn add(self, rhs: Self) -> Scalar {
		let inner = match (self.0, rhs.0) {
			(None, rhs) => rhs,
			(lhs, None) => lhs,
			(Some(lhs), Some(rhs)) => lhs.add_tweak(&rhs.into()).ok(),
		};
		Scalar(inner)
	}
}

impl std::ops::Add for Scalar {
	type Output = Scalar;

	fn add(self, rhs: Self) -> Scalar {
		&self + &rhs
	}
}

impl std::ops::Sub for &Scalar {
	type Output = Scalar;

	// Addition of the negation; there is no subtraction primitive on SecretKey.
	#[allow(clippy::suspicious_arithmetic_impl)]
	fn sub(self, rhs: Self) -> Scalar {
		match rhs.0 {
			None => self.clone(),
			Some(x) => self + &Scalar(Some(x.negate())),
		}
	}
}

impl std::ops::Sub for Scalar {
	type Output = Scalar;

	fn sub(self, rhs: Self) -> Scalar {
		&self - &rhs
	}
}

impl std::ops::Mul for &Scalar {
	type Output = Scalar;

	fn mul(self, rhs: Self) -> Scalar {
		let inner = match (self.0, rhs.0) {
			(None, _) | (_, None) => None,
			(Some(lhs), Some(rhs)) => Some(
				lhs.mul_tweak(&rhs.into()).expect("product of two non-zero scalars is non-zero"),
			),
		};
		Scalar(inner)
	}
}

impl std::ops::Mul for Scalar {
	type Output = Scalar;

	fn mul(self, rhs: Self) -> Scalar {
		&self * &rhs
	}
}

impl std::iter::Sum for Scalar {
	fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
		iter.fold(Scalar::zero(), |acc, x| acc + x)
	}
}

impl Ord for Scalar {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.as_bytes().cmp(other.as_bytes())
	}
}

impl PartialOrd for Scalar {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl zeroize::Zeroize for Scalar {
	fn zeroize(&mut self) {
		use core::sync::atomic;
		unsafe { std::ptr::write_volatile(self, Scalar::zero()) };
		atomic::compiler_fence(atomic::Ordering::SeqCst);
	}
}

impl zeroize::ZeroizeOnDrop for Scalar {}

impl Serialize for Scalar {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		use serde::ser::SerializeTuple;
		let mut tup = serializer.serialize_tuple(32)?;
		for byte in self.as_bytes() {
			tup.serialize_element(byte)?;
		}
		tup.end()
	}
}

impl<'de> Deserialize<'de> for Scalar {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let bytes = deserializer.deserialize_tuple(32, ArrayVisitor::<[u8; 32]>::new())?;

		if bytes == ZERO_SCALAR_BYTES {
			Ok(Scalar::zero())
		} else {
			SK::from_slice(&bytes).map(|x| Scalar(Some(x))).map_err(serde::de::Error::custom)
		}
	}
}

#[cfg(test)]
impl Scalar {
	pub fn from_hex(sk_hex: &str) -> Self {
		let bytes = hex::decode(sk_hex).expect("input must be hex encoded");
		Scalar(Some(SK::from_slice(&bytes).expect("invalid scalar")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_is_additive_identity() {
		let mut rng = rand::thread_rng();
		let s = Scalar::random(&mut rng);
		assert_eq!(s.clone() + Scalar::zero(), s);
	}

	#[test]
	fn invert_round_trips() {
		let mut rng = rand::thread_rng();
		let s = Scalar::random(&mut rng);
		let inv = s.invert().expect("non-zero scalar is invertible");
		assert_eq!(s * inv, Scalar::from(1));
	}

	#[test]
	fn serialization_round_trips() {
		let mut rng = rand::thread_rng();
		let s = Scalar::random(&mut rng);
		let bytes = bincode::serialize(&s).unwrap();
		let recovered: Scalar = bincode::deserialize(&bytes).unwrap();
		assert_eq!(s, recovered);
	}
}
