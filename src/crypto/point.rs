use super::field::Scalar;
use serde::{Deserialize, Serialize};

type PK = secp256k1::PublicKey;

const GENERATOR_COMPRESSED: [u8; 33] = [
	0x02, 0x79, 0xBE, 0x66, 0x7E, 0xF9, 0xDC, 0xBB, 0xAC, 0x55, 0xA0, 0x62, 0x95, 0xCE, 0x87, 0x0B,
	0x07, 0x02, 0x9B, 0xFC, 0xDB, 0x2D, 0xCE, 0x28, 0xD9, 0x59, 0xF2, 0x81, 0x5B, 0x16, 0xF8, 0x17,
	0x98,
];

const POINT_AT_INFINITY_COMPRESSED: [u8; 33] = [0; 33];

lazy_static::lazy_static! {
	static ref GENERATOR: Point = Point(Some(PK::from_slice(&GENERATOR_COMPRESSED).unwrap()));
}

/// A point on secp256k1, or the additive identity (`None`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Point(Option<PK>);

impl Point {
	pub fn generator() -> Point {
		*GENERATOR
	}

	pub fn point_at_infinity() -> Point {
		Point(None)
	}

	pub fn is_point_at_infinity(&self) -> bool {
		self.0.is_none()
	}

	pub fn from_scalar(scalar: &Scalar) -> Point {
		Point::generator() * scalar
	}

	pub fn as_bytes(&self) -> [u8; 33] {
		match self.0 {
			Some(pk) => pk.serialize(),
			None => POINT_AT_INFINITY_COMPRESSED,
		}
	}

	/// The underlying `secp256k1::PublicKey`. Panics on the point at infinity:
	/// only safe to call on aggregate values no single party controls.
	pub fn get_element(&self) -> PK {
		self.0.expect("unexpected point at infinity")
	}

	pub fn x_bytes(&self) -> [u8; 32] {
		let mut result = [0u8; 32];
		result.copy_from_slice(&self.as_bytes()[1..33]);
		result
	}

	pub fn y_bytes_uncompressed(&self) -> [u8; 32] {
		let uncompressed = self.get_element().serialize_uncompressed();
		let mut result = [0u8; 32];
		result.copy_from_slice(&uncompressed[33..65]);
		result
	}

	pub fn is_even_y(&self) -> bool {
		self.as_bytes()[0] == 2
	}

	pub fn random(rng: &mut impl rand::Rng) -> Self {
		Point::from_scalar(&Scalar::random(rng))
	}
}

impl std::ops::Mul<&Scalar> for Point {
	type Output = Point;

	fn mul(self, scalar: &Scalar) -> Point {
		let inner = match (self.0, scalar.inner()) {
			(None, _) | (_, None) => None,
			(Some(point), Some(scalar)) => Some(
				point
					.mul_tweak(secp256k1::SECP256K1, &(*scalar).into())
					.expect("scalar must be valid and non-zero"),
			),
		};
		Point(inner)
	}
}

impl std::ops::Mul<Scalar> for Point {
	type Output = Point;

	fn mul(self, scalar: Scalar) -> Point {
		self * &scalar
	}
}

impl std::ops::Add for Point {
	type Output = Point;

	fn add(self, rhs: Self) -> Point {
		let inner = match (self.0, rhs.0) {
			(None, rhs) => rhs,
			(lhs, None) => lhs,
			(Some(lhs), Some(rhs)) => lhs.combine(&rhs).ok(),
		};
		Point(inner)
	}
}

impl std::ops::Sub for Point {
	type Output = Point;

	#[allow(clippy::suspicious_arithmetic_impl)]
	fn sub(self, rhs: Self) -> Point {
		self + Point(rhs.0.map(|x| x.negate(secp256k1::SECP256K1)))
	}
}

impl std::iter::Sum for Point {
	fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
		iter.fold(Point::point_at_infinity(), |acc, x| acc + x)
	}
}

impl Serialize for Point {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		use serde::ser::SerializeTuple;
		let bytes = self.as_bytes();
		let mut tup = serializer.serialize_tuple(33)?;
		for byte in &bytes {
			tup.serialize_element(byte)?;
		}
		tup.end()
	}
}

impl<'de> Deserialize<'de> for Point {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		struct Visitor;

		impl<'de> serde::de::Visitor<'de> for Visitor {
			type Value = [u8; 33];

			fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
				write!(f, "33 bytes")
			}

			fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
			where
				A: serde::de::SeqAccess<'de>,
			{
				let mut out = [0u8; 33];
				for (i, byte) in out.iter_mut().enumerate() {
					*byte = seq
						.next_element()?
						.ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
				}
				Ok(out)
			}
		}

		let bytes = deserializer.deserialize_tuple(33, Visitor)?;

		if bytes == POINT_AT_INFINITY_COMPRESSED {
			Ok(Point::point_at_infinity())
		} else {
			PK::from_slice(&bytes).map(|pk| Point(Some(pk))).map_err(serde::de::Error::custom)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scalar_mult_generator_is_non_identity() {
		let mut rng = rand::thread_rng();
		let s = Scalar::random(&mut rng);
		let p = Point::from_scalar(&s);
		assert!(!p.is_point_at_infinity());
	}

	#[test]
	fn serialization_round_trips() {
		let mut rng = rand::thread_rng();
		let p = Point::random(&mut rng);
		let bytes = bincode::serialize(&p).unwrap();
		let recovered: Point = bincode::deserialize(&bytes).unwrap();
		assert_eq!(p, recovered);
	}

	#[test]
	fn pinned_serialization() {
		use rand::SeedableRng;
		let mut rng = rand::rngs::StdRng::from_seed([0; 32]);
		let scalar = Scalar::random(&mut rng);
		let point = Point::from_scalar(&scalar);
		let point_bytes = bincode::serialize(&point).unwrap();

		let expected_point_bytes = [
			2, 155, 239, 141, 85, 109, 128, 228, 58, 231, 224, 190, 203, 58, 126, 104, 56, 185, 93,
			239, 228, 88, 150, 237, 96, 117, 187, 144, 53, 208, 108, 153, 100,
		];

		assert_eq!(point_bytes, expected_point_bytes);
	}
}
