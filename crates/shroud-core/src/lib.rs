//! shroud protocol core
//!
//! wire objects, proof of work, field arithmetic and the exchange data model
//! shared by the node and the wallet
//!
//! # architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      SHROUD CORE                          │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                           │
//! │  wire layer                                               │
//! │  ├─ framed objects {size, tag} + proof of work + body     │
//! │  ├─ fixed-layout codec (LE ints, BE bigints, utf-8 tail)  │
//! │  └─ per-tag proof-of-work difficulty and clock allowance  │
//! │                                                           │
//! │  state layer                                              │
//! │  ├─ field elements mod the proof-system prime             │
//! │  ├─ commit-tree leaf/node hashing                         │
//! │  └─ serial numbers derived from the monitor secret        │
//! │                                                           │
//! │  exchange layer                                           │
//! │  ├─ crosschain requests (Xreq) and matches (Xmatch)       │
//! │  └─ UniFloat log-float rate encoding for bucketed scans   │
//! │                                                           │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod field;
pub mod merkle;
pub mod pow;
pub mod serialnum;
pub mod tags;
pub mod timestamp;
pub mod unifloat;
pub mod xmatch;
pub mod xreq;

pub use codec::{Reader, Writer, MSG_HEADER_SIZE};
pub use field::{FieldElement, FIELD_BYTES};
pub use merkle::{hash_leaf, hash_node, MERKLE_DEPTH};
pub use pow::{POW_SIZE, POW_NPROOFS};
pub use unifloat::{UNIFLOAT_BITS, UNIFLOAT_WIRE_BYTES};
pub use xmatch::{Xmatch, Xmatchreq};
pub use xreq::{Xreq, XreqFlags};

use thiserror::Error;

/// domain separator for commit-tree leaf hashes
pub const LEAF_DOMAIN: &[u8] = b"shroud.commit-tree.leaf.v1";
/// domain separator for commit-tree interior hashes
pub const NODE_DOMAIN: &[u8] = b"shroud.commit-tree.node.v1";
/// domain separator for serial number derivation
pub const SERIALNUM_DOMAIN: &[u8] = b"shroud.serialnum.v1";

/// wire width of the blockchain number
pub const TX_CHAIN_BYTES: usize = 4;
/// wire width of an output address
pub const TX_ADDRESS_BYTES: usize = 32;
/// wire width of a commitment IV
pub const TX_COMMIT_IV_BYTES: usize = 16;
/// wire width of a serial number
pub const TX_SERIALNUM_BYTES: usize = 32;
/// wire width of a spend hashkey
pub const TX_HASHKEY_BYTES: usize = 32;
/// wire width of an amount
pub const TX_AMOUNT_BYTES: usize = 16;

/// maximum serial numbers per serial-number query
pub const TX_MAXIN: usize = 8;
/// maximum commitment numbers per input-path query
pub const TX_MAXINPATH: usize = 8;

/// number of mint-era parameter levels
pub const MINT_COUNT: u64 = 2000;
/// levels around the current indelible level inside which a mint is accepted
pub const MINT_ACCEPT_SPAN: u64 = 5;

/// epoch offset subtracted before bucketing chain timestamps
pub const CHAIN_TIME_OFFSET: u64 = 1_546_300_800;
/// chain timestamp bucket width in seconds
pub const CHAIN_TIME_DIVISOR: u64 = 30;

/// chain id 1 is the main network, everything else is a testnet
pub fn is_testnet(blockchain: u64) -> bool {
    blockchain != 1
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed object: {0}")]
    Malformed(&'static str),

    #[error("buffer exhausted at byte {0}")]
    Exhausted(usize),

    #[error("trailing bytes after object body")]
    TrailingBytes,

    #[error("invalid utf-8 tail")]
    InvalidUtf8,

    #[error("value out of range: {0}")]
    OutOfRange(&'static str),
}

pub type Result<T> = std::result::Result<T, CoreError>;
