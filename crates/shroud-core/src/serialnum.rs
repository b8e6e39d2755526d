//! serial number derivation
//!
//! the serial number published when an output is spent. derived from the
//! owner's monitor secret, the output commitment and its position, so only
//! the owner can compute it ahead of the spend and each output has exactly
//! one serial number.

use crate::field::FieldElement;
use crate::SERIALNUM_DOMAIN;

pub fn compute_serialnum(
    monitor_secret: &[u8; 32],
    commitment: &FieldElement,
    commitnum: u64,
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(SERIALNUM_DOMAIN);
    hasher.update(monitor_secret);
    hasher.update(&commitment.to_bytes());
    hasher.update(&commitnum.to_le_bytes());
    *hasher.finalize().as_bytes()
}
