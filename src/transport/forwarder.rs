//! HTTP Forwarder
//!
//! Sends task messages and partial results to other nodes.
//!
//! ## Delivery rules
//! - Requests to one peer go out in submission order (a per-peer lock).
//! - Connection failures and 5xx answers are retried with backoff, then the
//!   payload is appended to a per-peer JSON lines file under `buffer/`.
//! - While a peer has buffered payloads, new ones are appended behind them so
//!   the order is kept. `resume` replays them once the peer answers again.
//! - A 4xx answer is a rejection: reported as an error, never buffered.

use super::protocol::{ENDPOINT_MESSAGE, ENDPOINT_RESULT};
use super::retry::Backoff;
use super::types::{Delivery, Transport, peer_of};
use crate::planner::{Message, PartialResult};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const BUFFER_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BufferedRequest {
    path: String,
    body: Value,
}

enum SendFailure {
    /// Peer down or overloaded; worth buffering.
    Unreachable(anyhow::Error),
    /// Peer refused the payload.
    Rejected(anyhow::Error),
}

pub struct Forwarder {
    http_client: reqwest::Client,
    buffer_dir: PathBuf,
    peer_locks: DashMap<String, Arc<Mutex<()>>>,
    timeout: Duration,
    attempts: usize,
}

impl Forwarder {
    /// Buffers undeliverable payloads under `<state_dir>/buffer`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            buffer_dir: state_dir.join("buffer"),
            peer_locks: DashMap::new(),
            timeout: Duration::from_secs(2),
            attempts: 3,
        }
    }

    pub fn with_retry(mut self, timeout: Duration, attempts: usize) -> Self {
        self.timeout = timeout;
        self.attempts = attempts.max(1);
        self
    }

    pub fn buffer_dir(&self) -> &Path {
        &self.buffer_dir
    }

    /// Peers with payloads waiting on disk.
    pub async fn buffered_peers(&self) -> Result<Vec<String>> {
        let mut peers = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.buffer_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(peers),
            Err(error) => return Err(error.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BUFFER_EXTENSION) {
                continue;
            }
            if let Some(peer) = path.file_stem().and_then(|stem| stem.to_str()).map(peer_from_stem) {
                peers.push(peer);
            }
        }
        peers.sort();
        Ok(peers)
    }

    /// POSTs `body` to `path` on `peer`, buffering it when the peer cannot take it now.
    pub async fn deliver(&self, peer: &str, path: &str, body: Value) -> Result<Delivery> {
        let lock = self.lock_for(peer);
        let _guard = lock.lock().await;

        let buffer = self.buffer_path(peer);
        if tokio::fs::try_exists(&buffer).await.unwrap_or(false) {
            self.append(&buffer, &BufferedRequest {
                path: path.to_string(),
                body,
            })
            .await?;
            return Ok(Delivery::Buffered);
        }

        match self.post_with_retry(peer, path, &body).await {
            Ok(()) => Ok(Delivery::Sent),
            Err(SendFailure::Rejected(error)) => Err(error),
            Err(SendFailure::Unreachable(error)) => {
                tracing::warn!("Peer {} unreachable, buffering {}: {:#}", peer, path, error);
                self.append(&buffer, &BufferedRequest {
                    path: path.to_string(),
                    body,
                })
                .await?;
                Ok(Delivery::Buffered)
            }
        }
    }

    /// Replays buffered payloads of every peer. Returns how many were delivered.
    pub async fn resume(&self) -> Result<usize> {
        let mut delivered = 0;
        for peer in self.buffered_peers().await? {
            delivered += self.resume_peer(&peer).await?;
        }
        Ok(delivered)
    }

    async fn resume_peer(&self, peer: &str) -> Result<usize> {
        let lock = self.lock_for(peer);
        let _guard = lock.lock().await;

        let buffer = self.buffer_path(peer);
        let contents = match tokio::fs::read_to_string(&buffer).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(error.into()),
        };

        let lines: Vec<&str> = contents.lines().filter(|line| !line.trim().is_empty()).collect();
        let mut delivered = 0;
        let mut remaining = lines.len();

        for (position, line) in lines.iter().enumerate() {
            let request: BufferedRequest = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(error) => {
                    tracing::error!("Dropping corrupt buffer entry for {}: {}", peer, error);
                    remaining = lines.len() - position - 1;
                    continue;
                }
            };

            match self.post_with_retry(peer, &request.path, &request.body).await {
                Ok(()) => delivered += 1,
                Err(SendFailure::Rejected(error)) => {
                    tracing::error!("Peer {} rejected buffered {}: {:#}", peer, request.path, error);
                }
                Err(SendFailure::Unreachable(_)) => {
                    // Keep this entry and everything after it
                    remaining = lines.len() - position;
                    break;
                }
            }
            remaining = lines.len() - position - 1;
        }

        if remaining == 0 {
            tokio::fs::remove_file(&buffer).await?;
            tracing::info!("Flushed {} buffered requests to {}", delivered, peer);
        } else {
            let rest = lines[lines.len() - remaining..].join("\n") + "\n";
            let temporary = buffer.with_extension("tmp");
            tokio::fs::write(&temporary, rest).await?;
            tokio::fs::rename(&temporary, &buffer).await?;
            tracing::debug!("{} requests still buffered for {}", remaining, peer);
        }
        Ok(delivered)
    }

    /// Runs `resume` every `interval` until the runtime stops.
    pub fn spawn_resume_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.resume().await {
                    tracing::error!("Failed to resume buffered requests: {:#}", e);
                }
            }
        })
    }

    async fn post_with_retry(&self, peer: &str, path: &str, payload: &Value) -> Result<(), SendFailure> {
        let url = format!("http://{}{}", peer, path);
        let mut backoff = Backoff::new(self.attempts);

        loop {
            let failure = match self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) if resp.status().is_client_error() => {
                    return Err(SendFailure::Rejected(anyhow!(
                        "POST {} failed {}",
                        url,
                        resp.status()
                    )));
                }
                Ok(resp) => anyhow!("POST {} failed {}", url, resp.status()),
                Err(e) => anyhow!(e),
            };

            if !backoff.wait().await {
                return Err(SendFailure::Unreachable(failure));
            }
        }
    }

    async fn append(&self, buffer: &Path, request: &BufferedRequest) -> Result<()> {
        tokio::fs::create_dir_all(&self.buffer_dir).await?;
        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(buffer)
            .await
            .with_context(|| format!("Cannot open buffer {}", buffer.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    fn lock_for(&self, peer: &str) -> Arc<Mutex<()>> {
        self.peer_locks
            .entry(peer.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn buffer_path(&self, peer: &str) -> PathBuf {
        self.buffer_dir
            .join(format!("{}.{}", peer.replace(':', "_"), BUFFER_EXTENSION))
    }
}

/// `h1_10031` -> `h1:10031`
fn peer_from_stem(stem: &str) -> String {
    match stem.rfind('_') {
        Some(underscore) => format!("{}:{}", &stem[..underscore], &stem[underscore + 1..]),
        None => stem.to_string(),
    }
}

#[async_trait]
impl Transport for Forwarder {
    async fn send_message(&self, destination: &str, message: &Message) -> Result<Delivery> {
        self.deliver(peer_of(destination), ENDPOINT_MESSAGE, serde_json::to_value(message)?)
            .await
    }

    async fn send_result(&self, destination: &str, result: &PartialResult) -> Result<Delivery> {
        self.deliver(peer_of(destination), ENDPOINT_RESULT, serde_json::to_value(result)?)
            .await
    }
}
