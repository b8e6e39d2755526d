//! blockchain state surface
//!
//! the slice of the consensus core the transact side consults: the last
//! indelible block, when blocks were last seen, and the process-wide fatal
//! error switch. block processing itself is an external collaborator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::watch;

/// values echoed in query replies
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockchainStatus {
    pub last_indelible_level: u64,
    pub last_indelible_timestamp: u64,
    pub last_matching_completed_block_time: u64,
    pub last_matching_start_block_time: u64,
}

pub struct ChainState {
    last_indelible_level: AtomicU64,
    last_indelible_timestamp: AtomicU64,
    last_matching_completed_block_time: AtomicU64,
    last_matching_start_block_time: AtomicU64,
    /// instants of the last indelible block and the last object received
    /// from the relay network, for the connected-to-net windows
    last_indelible_instant: Mutex<Option<Instant>>,
    last_network_instant: Mutex<Option<Instant>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ChainState {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            last_indelible_level: AtomicU64::new(0),
            last_indelible_timestamp: AtomicU64::new(0),
            last_matching_completed_block_time: AtomicU64::new(0),
            last_matching_start_block_time: AtomicU64::new(0),
            last_indelible_instant: Mutex::new(None),
            last_network_instant: Mutex::new(None),
            shutdown_tx,
        }
    }

    pub fn status(&self) -> BlockchainStatus {
        BlockchainStatus {
            last_indelible_level: self.last_indelible_level.load(Ordering::Acquire),
            last_indelible_timestamp: self.last_indelible_timestamp.load(Ordering::Acquire),
            last_matching_completed_block_time: self
                .last_matching_completed_block_time
                .load(Ordering::Acquire),
            last_matching_start_block_time: self
                .last_matching_start_block_time
                .load(Ordering::Acquire),
        }
    }

    pub fn last_indelible_level(&self) -> u64 {
        self.last_indelible_level.load(Ordering::Acquire)
    }

    pub fn set_indelible(&self, level: u64, timestamp: u64) {
        self.last_indelible_level.store(level, Ordering::Release);
        self.last_indelible_timestamp
            .store(timestamp, Ordering::Release);
        *self.last_indelible_instant.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Instant::now());
    }

    /// note an object arriving from the relay network
    pub fn note_network_activity(&self) {
        *self.last_network_instant.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Instant::now());
    }

    pub fn seconds_since_last_network(&self) -> Option<u64> {
        self.last_network_instant
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_secs())
    }

    pub fn seconds_since_last_indelible(&self) -> Option<u64> {
        self.last_indelible_instant
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_secs())
    }

    /// log an unrecoverable invariant failure and trip the shutdown watch
    pub fn set_fatal_error(&self, msg: &str) {
        tracing::error!("FATAL ERROR {msg}");
        let _ = self.shutdown_tx.send(true);
    }

    pub fn start_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::new()
    }
}
