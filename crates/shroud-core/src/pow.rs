//! per-object proof of work
//!
//! flood mitigation on the transact port. the sender grinds
//! `POW_NPROOFS` independent 8-byte nonces; each must hash below
//! `u64::MAX / difficulty` when combined with the object's binding hash and
//! the nonce index. difficulty 0 disables the check entirely.
//!
//! the binding hash covers the tag, the request timestamp and the body, so
//! a proof cannot be replayed onto a different request. for tx-like objects
//! the same hash doubles as the object id.

use blake2::digest::consts::{U32, U8};
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;
type Blake2b64 = Blake2b<U8>;

/// nonces per object
pub const POW_NPROOFS: usize = 4;
/// width of one nonce
pub const POW_NONCE_BYTES: usize = 8;
/// total width of the proof-of-work field
pub const POW_SIZE: usize = POW_NPROOFS * POW_NONCE_BYTES;

/// binding hash of a request: tag, timestamp and everything after the
/// proof-of-work field. doubles as the object id of tx-like objects.
pub fn binding_hash(tag: u32, timestamp: u64, body: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(tag.to_le_bytes());
    hasher.update(timestamp.to_le_bytes());
    hasher.update(body);
    hasher.finalize().into()
}

fn proof_value(objhash: &[u8; 32], index: u8, nonce: &[u8]) -> u64 {
    let mut hasher = Blake2b64::new();
    hasher.update(objhash);
    hasher.update([index]);
    hasher.update(nonce);
    u64::from_le_bytes(hasher.finalize().into())
}

/// check a proof-of-work field against a difficulty
pub fn verify(objhash: &[u8; 32], pow: &[u8], difficulty: u64) -> bool {
    if difficulty == 0 {
        return true;
    }
    if pow.len() != POW_SIZE {
        return false;
    }
    let threshold = u64::MAX / difficulty;
    (0..POW_NPROOFS).all(|i| {
        let nonce = &pow[i * POW_NONCE_BYTES..(i + 1) * POW_NONCE_BYTES];
        proof_value(objhash, i as u8, nonce) < threshold
    })
}

/// grind a full proof-of-work field. only used by tests and tooling; real
/// clients do this on their side of the wire.
pub fn solve(objhash: &[u8; 32], difficulty: u64) -> [u8; POW_SIZE] {
    let mut pow = [0u8; POW_SIZE];
    if difficulty == 0 {
        return pow;
    }
    let threshold = u64::MAX / difficulty;
    for i in 0..POW_NPROOFS {
        let mut nonce = 0u64;
        loop {
            let bytes = nonce.to_le_bytes();
            if proof_value(objhash, i as u8, &bytes) < threshold {
                pow[i * POW_NONCE_BYTES..(i + 1) * POW_NONCE_BYTES].copy_from_slice(&bytes);
                break;
            }
            nonce += 1;
        }
    }
    pow
}

/// single-nonce proof over an arbitrary text, used by the rendezvous
/// directory query. returns `None` once `deadline` (unix seconds) passes.
pub fn solve_text(data: &[u8], difficulty: u64, deadline: u64) -> Option<u64> {
    if difficulty == 0 {
        return Some(0);
    }
    let threshold = u64::MAX / difficulty;
    let mut nonce = 0u64;
    loop {
        let mut hasher = Blake2b64::new();
        hasher.update(data);
        hasher.update(nonce.to_le_bytes());
        let v = u64::from_le_bytes(hasher.finalize().into());
        if v < threshold {
            return Some(nonce);
        }
        nonce = nonce.checked_add(1)?;
        if nonce % 0x10000 == 0 && crate::timestamp::unixtime() > deadline {
            return None;
        }
    }
}

/// check a single-nonce text proof
pub fn verify_text(data: &[u8], nonce: u64, difficulty: u64) -> bool {
    if difficulty == 0 {
        return true;
    }
    let mut hasher = Blake2b64::new();
    hasher.update(data);
    hasher.update(nonce.to_le_bytes());
    let v = u64::from_le_bytes(hasher.finalize().into());
    v < u64::MAX / difficulty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_difficulty_always_passes() {
        let objhash = binding_hash(1, 2, b"anything");
        assert!(verify(&objhash, &[0u8; POW_SIZE], 0));
    }

    #[test]
    fn solve_then_verify() {
        let objhash = binding_hash(0x7378_0201, 1_700_000_000, b"test object body");
        let pow = solve(&objhash, 64);
        assert!(verify(&objhash, &pow, 64));
        // binding: a different object rejects the same proof
        let other = binding_hash(0x7378_0201, 1_700_000_000, b"different body");
        assert!(!verify(&other, &pow, u64::MAX));
    }

    #[test]
    fn binding_covers_tag_and_timestamp() {
        let h = binding_hash(1, 2, b"body");
        assert_ne!(h, binding_hash(2, 2, b"body"));
        assert_ne!(h, binding_hash(1, 3, b"body"));
    }

    #[test]
    fn zero_proof_fails_real_difficulty() {
        let objhash = binding_hash(0x7378_0104, 0, b"serial query body");
        assert!(!verify(&objhash, &[0u8; POW_SIZE], u64::MAX / 2));
    }

    #[test]
    fn text_pow_roundtrip() {
        let data = b"T:12345\nR:relayhost\n";
        let nonce = solve_text(data, 16, crate::timestamp::unixtime() + 60).unwrap();
        assert!(verify_text(data, nonce, 16));
    }
}
