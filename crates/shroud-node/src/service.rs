//! service lifecycle
//!
//! the node runs several socket services (transact, relay, block-serve)
//! with the same shape: configure, bind, serve until shutdown. the trait
//! carries the shared lifecycle; each service owns its configuration.

use crate::transact;
use crate::validate::TxValidator;
use crate::{NodeContext, NodeError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// apply configuration defaults before start
    fn preset(&mut self) {}

    /// validate configuration after all settings are applied
    fn postset(&mut self) -> Result<()> {
        Ok(())
    }

    fn enabled(&self) -> bool;

    fn start_shutdown(&self);
}

#[derive(Debug, Clone)]
pub struct TransactConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
    /// seconds since the last relay object or indelible block before the
    /// node stops accepting transactions; 0 disables
    pub max_net_sec: u64,
    /// maximum age of the last indelible block's timestamp; 0 disables
    pub max_block_sec: u64,
    pub query_work_difficulty: u64,
}

impl Default for TransactConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:9220".parse().expect("literal addr"),
            max_net_sec: 0,
            max_block_sec: 0,
            query_work_difficulty: 0,
        }
    }
}

/// the transaction ingestion service
pub struct TransactService {
    pub config: TransactConfig,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TransactService {
    pub fn new(config: TransactConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            handle: Mutex::new(None),
        })
    }

    /// true iff the node looks attached to the network: recent relay
    /// traffic, a recent indelible block, and a fresh block timestamp.
    /// each window is disabled when its parameter is 0.
    pub fn is_connected_to_net(&self, ctx: &NodeContext) -> bool {
        if self.config.max_net_sec != 0 {
            match ctx.chain.seconds_since_last_network() {
                Some(secs) if secs <= self.config.max_net_sec => {}
                _ => return false,
            }
            match ctx.chain.seconds_since_last_indelible() {
                Some(secs) if secs <= self.config.max_net_sec => {}
                _ => return false,
            }
        }

        if self.config.max_block_sec != 0 {
            let blocktime = ctx.chain.status().last_indelible_timestamp;
            let age = shroud_core::timestamp::unixtime().saturating_sub(blocktime);
            if age > self.config.max_block_sec {
                return false;
            }
        }

        true
    }

    /// bind and start serving; returns the bound address
    pub async fn start(
        self: &Arc<Self>,
        ctx: Arc<NodeContext>,
        validator: Arc<TxValidator>,
    ) -> Result<SocketAddr> {
        if !self.config.enabled {
            return Err(NodeError::Config("transact service disabled".into()));
        }

        let listener = TcpListener::bind(self.config.listen).await?;
        let local = listener.local_addr()?;
        tracing::info!("transact service listening on {local}");

        let service = self.clone();
        let task = tokio::spawn(transact::serve(listener, ctx, service, validator));
        *self.handle.lock().await = Some(task);
        Ok(local)
    }

    pub async fn wait_for_shutdown(&self) {
        if let Some(task) = self.handle.lock().await.take() {
            let _ = task.await;
        }
    }
}

impl Service for TransactService {
    fn name(&self) -> &'static str {
        "Transact"
    }

    fn preset(&mut self) {
        if self.config.max_net_sec != 0 && self.config.max_net_sec < 60 {
            self.config.max_net_sec = 60;
        }
    }

    fn postset(&mut self) -> Result<()> {
        if self.config.enabled && self.config.listen.port() == 0 && !cfg!(test) {
            tracing::debug!("transact port 0: an ephemeral port will be assigned");
        }
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn start_shutdown(&self) {
        // the serve loop watches the chain shutdown signal; nothing
        // service-local to tear down beyond that
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeParams;
    use tempfile::tempdir;

    #[test]
    fn connected_checks_disabled_by_zero() {
        let dir = tempdir().unwrap();
        let ctx = NodeContext::open(NodeParams::default(), dir.path()).unwrap();
        let svc = TransactService::new(TransactConfig::default());
        assert!(svc.is_connected_to_net(&ctx));
    }

    #[test]
    fn connected_requires_recent_blocks() {
        let dir = tempdir().unwrap();
        let ctx = NodeContext::open(NodeParams::default(), dir.path()).unwrap();

        let svc = TransactService::new(TransactConfig {
            max_net_sec: 600,
            ..Default::default()
        });
        // no network activity ever seen
        assert!(!svc.is_connected_to_net(&ctx));

        ctx.chain.note_network_activity();
        ctx.chain.set_indelible(1, shroud_core::timestamp::unixtime());
        assert!(svc.is_connected_to_net(&ctx));
    }

    #[test]
    fn connected_requires_fresh_block_timestamp() {
        let dir = tempdir().unwrap();
        let ctx = NodeContext::open(NodeParams::default(), dir.path()).unwrap();
        let svc = TransactService::new(TransactConfig {
            max_block_sec: 3600,
            ..Default::default()
        });

        ctx.chain.set_indelible(1, shroud_core::timestamp::unixtime() - 7200);
        assert!(!svc.is_connected_to_net(&ctx));

        ctx.chain.set_indelible(2, shroud_core::timestamp::unixtime());
        assert!(svc.is_connected_to_net(&ctx));
    }
}
