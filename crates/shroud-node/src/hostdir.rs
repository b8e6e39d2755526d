//! rendezvous host directory
//!
//! peers are discovered through out-of-band directory servers reached over
//! the local anonymity-network proxy. the node sends a short text query
//! naming its own relay and block-serve hostnames, pays a proof of work
//! over the query, and receives a JSON directory of peer hostnames.

use crate::{NodeError, Result};
use serde::Deserialize;
use shroud_core::{pow, timestamp::unixtime, CHAIN_TIME_OFFSET};
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// directory query timestamps are bucketed to 10 minutes
const QUERY_TIME_GRANULARITY: u64 = 600;
/// extra POW scale applied to the configured directory difficulty
const QUERY_POW_SCALE: u64 = 100_000;
/// how long to grind the query proof before giving up
const QUERY_POW_DEADLINE: u64 = 5 * 60;
/// SOCKS4a reply length skipped before the JSON body
const SOCKS_REPLY_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    Relay,
    Blockserve,
}

#[derive(Debug, Clone)]
pub struct HostDirConfig {
    /// local anonymity-proxy port
    pub proxy_port: u16,
    pub difficulty: u64,
    /// nonzero skips the proof-of-work grind with a fixed nonce
    pub magic_nonce: u64,
    /// our own service hostnames, removed from returned lists
    pub relay_hostname: String,
    pub blockserve_hostname: String,
}

impl Default for HostDirConfig {
    fn default() -> Self {
        Self {
            proxy_port: 9050,
            difficulty: 0,
            magic_nonce: 0,
            relay_hostname: String::new(),
            blockserve_hostname: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirReply {
    #[serde(rename = "Relay", default)]
    relay: Vec<String>,
    #[serde(rename = "Block", default)]
    block: Vec<String>,
}

pub struct HostDir {
    config: HostDirConfig,
    servers: Vec<String>,
    hostnames: Mutex<[VecDeque<String>; 2]>,
}

impl HostDir {
    /// load the rendezvous server list; one hostname per line, a trailing
    /// `.onion` suffix is stripped
    pub fn load(config: HostDirConfig, servers_file: &Path) -> Result<Self> {
        let file = std::fs::File::open(servers_file).map_err(|e| {
            NodeError::Config(format!(
                "cannot open rendezvous servers file {}: {e}",
                servers_file.display()
            ))
        })?;

        let mut servers = Vec::new();
        for line in std::io::BufReader::new(file).lines() {
            let mut line = line.map_err(|e| {
                NodeError::Config(format!("error reading rendezvous servers file: {e}"))
            })?;
            line = line.trim().to_string();
            if let Some(stripped) = line.strip_suffix(".onion") {
                line = stripped.to_string();
            }
            if !line.is_empty() {
                servers.push(line);
            }
        }
        tracing::debug!("loaded {} rendezvous hostnames", servers.len());

        Ok(Self::with_servers(config, servers))
    }

    pub fn with_servers(config: HostDirConfig, servers: Vec<String>) -> Self {
        Self {
            config,
            servers,
            hostnames: Mutex::new([VecDeque::new(), VecDeque::new()]),
        }
    }

    /// compose the directory query for a randomly chosen server. returns
    /// the server name and the bytes to send through the proxy, or `None`
    /// when no server is configured or the proof cannot be ground in time.
    pub fn prepare_query(&self) -> Option<(String, Vec<u8>)> {
        if self.servers.is_empty() {
            return None;
        }
        let server = &self.servers[rand::random::<usize>() % self.servers.len()];

        let mut lines = String::new();
        lines.push_str(&format!(
            "T:{}\n",
            unixtime().saturating_sub(CHAIN_TIME_OFFSET) / QUERY_TIME_GRANULARITY
        ));
        if !self.config.relay_hostname.is_empty() {
            lines.push_str(&format!("R:{}\n", self.config.relay_hostname));
        }
        if !self.config.blockserve_hostname.is_empty() {
            lines.push_str(&format!("B:{}\n", self.config.blockserve_hostname));
        }

        // the proof covers the query lines salted with the server name,
        // binding it to the server it will be sent to
        let nonce = if self.config.magic_nonce != 0 {
            self.config.magic_nonce
        } else {
            let mut salted = lines.clone().into_bytes();
            salted.extend_from_slice(server.as_bytes());
            pow::solve_text(
                &salted,
                self.config.difficulty.saturating_mul(QUERY_POW_SCALE),
                unixtime() + QUERY_POW_DEADLINE,
            )?
        };

        let mut query = socks_connect_preamble(server);
        query.extend_from_slice(lines.as_bytes());
        query.extend_from_slice(format!("W:{nonce}\nQRB").as_bytes());
        query.push(0);

        Some((server.clone(), query))
    }

    /// fetch a fresh directory through the local proxy
    pub async fn refresh(&self) -> Result<()> {
        let (server, query) = self
            .prepare_query()
            .ok_or_else(|| NodeError::Config("no rendezvous server available".into()))?;
        tracing::info!("querying rendezvous server {server}");

        let mut stream =
            TcpStream::connect(("127.0.0.1", self.config.proxy_port)).await?;
        stream.write_all(&query).await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        if reply.len() <= SOCKS_REPLY_SIZE {
            return Err(NodeError::Config("short rendezvous reply".into()));
        }

        self.ingest_reply(&reply[SOCKS_REPLY_SIZE..])
    }

    /// parse a directory reply body and queue the returned hostnames,
    /// dropping our own
    pub fn ingest_reply(&self, body: &[u8]) -> Result<()> {
        let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
        let reply: DirReply = serde_json::from_slice(&body[..end])
            .map_err(|e| NodeError::Config(format!("bad rendezvous reply: {e}")))?;

        let mut queues = self.hostnames.lock().unwrap_or_else(|e| e.into_inner());
        for name in reply.relay {
            if !name.is_empty() && name != self.config.relay_hostname {
                queues[HostType::Relay as usize].push_back(name);
            }
        }
        for name in reply.block {
            if !name.is_empty() && name != self.config.blockserve_hostname {
                queues[HostType::Blockserve as usize].push_back(name);
            }
        }
        Ok(())
    }

    /// next known hostname of the given type, refreshing the directory
    /// when the queue runs dry
    pub async fn get_hostname(&self, host_type: HostType) -> Option<String> {
        {
            let mut queues = self.hostnames.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(name) = queues[host_type as usize].pop_front() {
                return Some(name);
            }
        }

        if let Err(e) = self.refresh().await {
            tracing::warn!("rendezvous refresh failed: {e}");
            return None;
        }

        self.hostnames
            .lock()
            .unwrap_or_else(|e| e.into_inner())[host_type as usize]
            .pop_front()
    }
}

/// SOCKS4a connect request for a named host on port 80 through the proxy
fn socks_connect_preamble(host: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + host.len());
    buf.push(0x04); // version
    buf.push(0x01); // connect
    buf.extend_from_slice(&80u16.to_be_bytes());
    buf.extend_from_slice(&[0, 0, 0, 1]); // invalid ip marks a named host
    buf.push(0); // empty userid
    buf.extend_from_slice(host.as_bytes());
    buf.push(0);
    buf
}
