//! persistent node state for shroud
//!
//! one sled keyspace holds every table, distinguished by a one-byte key
//! prefix. writers stage mutations in a batch that lands atomically;
//! readers take a snapshot guard under which every read observes the same
//! committed state.
//!
//! | prefix | table |
//! |--------|-------|
//! | `P` | parameters (key, subkey) → blob |
//! | `T` | commit tree (height, offset) → field bytes |
//! | `R` | commit roots by block level |
//! | `C` | commit root lookup by next commitnum |
//! | `O` | tx outputs (address, commitnum) |
//! | `S` | indelible serial numbers |
//! | `Q` | pending serial numbers |
//! | `X` | exchange requests by xreqnum |
//! | `Y` | open-rate index (asset hash, wire rate, xreqnum) |
//! | `Z` | pending-match-rate index (wire rate, xreqnum) |
//! | `M` | exchange matches by xmatchnum |
//! | `N` | match index by xreqnum |
//! | `B` | match-request index by object id |

pub mod kv;
pub mod store;

pub use kv::{Keyspace, ReadSnapshot, WriteTxn};
pub use store::{CommitRoot, SerialStatus, Store, StoreReader, StoreWriter, TxOutputRow, XreqScan};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("duplicate commitment at commitnum {0}")]
    DuplicateCommitment(u64),

    #[error("duplicate commit root at level {0}")]
    DuplicateCommitRoot(u64),

    #[error("corrupt record in table {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// parameter keys stored in the `P` table
pub mod param_key {
    /// block level of the last commit-tree update
    pub const COMMIT_BLOCKLEVEL: u8 = 1;
    /// highest commitnum incorporated into the tree
    pub const COMMIT_COMMITNUM_HI: u8 = 2;
    /// null-sibling value used at the current frontier
    pub const COMMIT_NULL_INPUT: u8 = 3;
}
