//! shroud node services
//!
//! the state machine of a full node on the transaction side: the append-only
//! commitment tree, the exchange match book, the transact wire server that
//! wallets talk to through the anonymity network, the asynchronous
//! transaction validation queue, and the rendezvous host directory used to
//! discover peers.
//!
//! everything hangs off a [`NodeContext`] passed around by `Arc`; there is
//! no module-level mutable state.

pub mod book;
pub mod chain;
pub mod commitments;
pub mod hostdir;
pub mod params;
pub mod service;
pub mod transact;
pub mod validate;

pub use chain::ChainState;
pub use commitments::CommitmentTree;
pub use params::NodeParams;
pub use service::{Service, TransactService};

use shroud_store::Store;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("store error: {0}")]
    Store(#[from] shroud_store::StoreError),

    #[error("protocol error: {0}")]
    Core(#[from] shroud_core::CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("corrupt state: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// everything a node service needs, in one explicitly passed context
pub struct NodeContext {
    pub params: NodeParams,
    pub chain: ChainState,
    pub store: Store,
    pub tree: CommitmentTree,
}

impl NodeContext {
    pub fn open(params: NodeParams, path: &Path) -> Result<Arc<Self>> {
        let store = Store::open(path)?;
        let tree = CommitmentTree::init(&store)?;
        Ok(Arc::new(Self {
            params,
            chain: ChainState::new(),
            store,
            tree,
        }))
    }
}
