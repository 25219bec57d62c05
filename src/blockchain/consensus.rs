use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::block::{hash_block, Block};
use super::chain::{Ledger, LedgerError};
use super::pow;
use super::wallet::WalletBook;

/// Default per-peer request timeout
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of peers queried at once
pub const DEFAULT_MAX_CONCURRENT_PEERS: usize = 8;

/// Errors from a single peer. None of them abort a resolution pass.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer {node} unreachable: {reason}")]
    Unreachable { node: String, reason: String },

    #[error("Peer {0} timed out")]
    Timeout(String),

    #[error("Peer {node} sent a malformed response: {reason}")]
    Malformed { node: String, reason: String },
}

/// Body of `GET /chain`, served by every node and fetched from peers
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// The length of the chain
    pub length: usize,
}

impl ChainResponse {
    pub fn new(chain: Vec<Block>) -> Self {
        ChainResponse {
            length: chain.len(),
            chain,
        }
    }

    /// Rejects a response whose `length` disagrees with the blocks it carries
    pub fn ensure_consistent(self, node: &str) -> Result<Self, PeerError> {
        if self.length != self.chain.len() {
            return Err(PeerError::Malformed {
                node: node.to_string(),
                reason: format!(
                    "reported length {} but sent {} blocks",
                    self.length,
                    self.chain.len()
                ),
            });
        }

        Ok(self)
    }
}

/// Somewhere peer chains can be fetched from
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn fetch_chain(&self, node: &str) -> Result<ChainResponse, PeerError>;
}

/// Fetches `http://{node}/chain` with a fixed timeout
#[derive(Debug, Clone)]
pub struct HttpChainSource {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpChainSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(HttpChainSource { client, timeout })
    }

    fn classify(node: &str, err: reqwest::Error) -> PeerError {
        if err.is_timeout() {
            PeerError::Timeout(node.to_string())
        } else if err.is_decode() {
            PeerError::Malformed {
                node: node.to_string(),
                reason: err.to_string(),
            }
        } else {
            PeerError::Unreachable {
                node: node.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl ChainSource for HttpChainSource {
    async fn fetch_chain(&self, node: &str) -> Result<ChainResponse, PeerError> {
        let url = format!("http://{}/chain", node);

        let request = async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| Self::classify(node, e))?;

            if response.status() != reqwest::StatusCode::OK {
                return Err(PeerError::Malformed {
                    node: node.to_string(),
                    reason: format!("unexpected status {}", response.status()),
                });
            }

            response
                .json::<ChainResponse>()
                .await
                .map_err(|e| Self::classify(node, e))
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| PeerError::Timeout(node.to_string()))?
    }
}

/// Checks that indexes run 1, 2, 3... and every block's hash link and proof
/// match its predecessor.
///
/// The empty chain has nothing to check and is valid.
pub fn valid_chain(chain: &[Block]) -> bool {
    if let Some(first) = chain.first() {
        if first.index != 1 {
            debug!("Chain starts at index {} instead of 1", first.index);
            return false;
        }
    }

    chain.windows(2).all(|pair| {
        let (previous, block) = (&pair[0], &pair[1]);

        if previous.index.checked_add(1) != Some(block.index) {
            debug!("Block {} does not follow block {}", block.index, previous.index);
            return false;
        }

        if block.previous_hash != hash_block(previous) {
            debug!("Block {} does not link to block {}", block.index, previous.index);
            return false;
        }

        if !pow::check(previous.proof, block.proof) {
            debug!("Block {} carries an invalid proof", block.index);
            return false;
        }

        true
    })
}

/// Longest-valid-chain resolution against the registered peers
pub struct ConsensusResolver {
    source: Arc<dyn ChainSource>,
    max_concurrent: usize,
}

impl ConsensusResolver {
    pub fn new(source: Arc<dyn ChainSource>, max_concurrent: usize) -> Self {
        ConsensusResolver {
            source,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Fetches every peer's chain and adopts the longest valid one that beats the local chain.
    ///
    /// Peers that fail are skipped. Among equally long candidates the first one
    /// observed wins. Returns whether the local chain was replaced.
    pub async fn resolve_conflicts(&self, ledger: &Ledger) -> Result<bool, LedgerError> {
        let nodes = ledger.nodes().nodes();
        if nodes.is_empty() {
            debug!("No nodes registered, nothing to resolve");
            return Ok(false);
        }

        let source = self.source.as_ref();
        let responses: Vec<(String, Result<ChainResponse, PeerError>)> = stream::iter(nodes)
            .map(|node| async move {
                let result = source.fetch_chain(&node).await;
                (node, result)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut max_length = ledger.chain_len();
        let mut best: Option<(String, Vec<Block>)> = None;

        for (node, result) in responses {
            let response = match result.and_then(|response| response.ensure_consistent(&node)) {
                Ok(response) => response,
                Err(err) => {
                    warn!("Skipping peer: {}", err);
                    continue;
                }
            };

            if response.length <= max_length {
                debug!(
                    "Peer {} chain of {} blocks is not longer than {}",
                    node, response.length, max_length
                );
                continue;
            }

            if !valid_chain(&response.chain) {
                warn!("Peer {} sent an invalid chain", node);
                continue;
            }

            if let Err(err) = WalletBook::replay(&response.chain) {
                warn!("Peer {} chain does not replay: {}", node, err);
                continue;
            }

            max_length = response.length;
            best = Some((node, response.chain));
        }

        let (node, chain) = match best {
            Some(best) => best,
            None => return Ok(false),
        };

        let replaced = ledger.replace_chain_if_longer(chain)?;
        if replaced {
            info!("Adopted chain of {} blocks from {}", max_length, node);
        }

        Ok(replaced)
    }
}
