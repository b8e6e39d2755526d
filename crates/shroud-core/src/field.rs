//! field elements modulo the proof-system prime
//!
//! commitments, merkle hashes and the null-sibling value are all elements of
//! the scalar field of the proving curve. arithmetic reduces eagerly: one
//! conditional subtraction after addition, a full reduction after
//! multiplication.

use num_bigint::BigUint;
use std::fmt;
use std::sync::OnceLock;

/// serialized width of a field element
pub const FIELD_BYTES: usize = 32;

/// BN254 scalar field prime, decimal form
const MODULUS_DEC: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

fn modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| MODULUS_DEC.parse().expect("prime literal parses"))
}

/// an element of the scalar field, always held reduced
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldElement(BigUint);

impl FieldElement {
    pub fn zero() -> Self {
        Self(BigUint::default())
    }

    pub fn from_u64(v: u64) -> Self {
        Self(BigUint::from(v) % modulus())
    }

    /// interpret 32 big-endian bytes as an integer and reduce it into the
    /// field. out-of-range encodings normalize instead of being rejected.
    pub fn from_bytes(bytes: &[u8; FIELD_BYTES]) -> Self {
        Self(BigUint::from_bytes_be(bytes) % modulus())
    }

    /// reduce an arbitrary big-endian byte string into the field
    pub fn from_bytes_wide(bytes: &[u8]) -> Self {
        Self(BigUint::from_bytes_be(bytes) % modulus())
    }

    pub fn to_bytes(&self) -> [u8; FIELD_BYTES] {
        let raw = self.0.to_bytes_be();
        let mut out = [0u8; FIELD_BYTES];
        out[FIELD_BYTES - raw.len()..].copy_from_slice(&raw);
        out
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::default()
    }

    pub fn add(&self, other: &Self) -> Self {
        let mut sum = &self.0 + &other.0;
        if &sum >= modulus() {
            sum -= modulus();
        }
        Self(sum)
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self((&self.0 * &other.0) % modulus())
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fe(0x{})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_bytes() {
        let fe = FieldElement::from_u64(0xdead_beef);
        let bytes = fe.to_bytes();
        assert_eq!(FieldElement::from_bytes(&bytes), fe);
    }

    #[test]
    fn out_of_range_normalizes() {
        // all-ones is larger than the prime and must reduce, not fail
        let fe = FieldElement::from_bytes(&[0xff; FIELD_BYTES]);
        let again = FieldElement::from_bytes(&fe.to_bytes());
        assert_eq!(fe, again);
    }

    #[test]
    fn add_wraps_at_modulus() {
        let p_minus_1 = {
            let mut bytes = [0u8; FIELD_BYTES];
            let m: BigUint = MODULUS_DEC.parse::<BigUint>().unwrap() - 1u32;
            let raw = m.to_bytes_be();
            bytes[FIELD_BYTES - raw.len()..].copy_from_slice(&raw);
            FieldElement::from_bytes(&bytes)
        };
        let one = FieldElement::from_u64(1);
        assert!(p_minus_1.add(&one).is_zero());
    }

    #[test]
    fn mul_by_one_is_identity() {
        let fe = FieldElement::from_bytes(&[7u8; FIELD_BYTES]);
        assert_eq!(fe.mul(&FieldElement::from_u64(1)), fe);
    }
}
