//! shroud wallet core
//!
//! the wallet side of the output lifecycle. a billet is one output the
//! wallet owns; its status advances from pending through cleared to spent
//! as the chain confirms it, and every transition fans out into the totals
//! index so balance queries never rescan the billet table.
//!
//! spends by other wallets (or by an earlier life of this one) are detected
//! by batching serial numbers through the node's serial query; a serial
//! observed indelible moves the billet to spent and flags any transaction
//! that recorded a different spend.

pub mod billet;
pub mod db;
pub mod totals;

pub use billet::{bill_status, Billet, BilletNotify, SerialQueryStatus, TxQueryClient};
pub use db::WalletDb;
pub use totals::{total_type, NoWaitAmounts};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet db error: {0}")]
    Store(#[from] shroud_store::StoreError),

    #[error("record encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("invalid billet transition from status {0}")]
    InvalidTransition(u8),

    #[error("billet {0} not found")]
    BilletNotFound(u64),

    #[error("billets span multiple blockchains")]
    BlockchainMismatch,

    #[error("node query failed: {0}")]
    Query(String),

    #[error("shutdown in progress")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, WalletError>;
