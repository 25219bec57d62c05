use dashmap::DashSet;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Extracts `host[:port]` from a peer address such as `http://127.0.0.1:5001`.
///
/// A bare `host:port` is read as if it had an `http://` scheme.
pub fn parse_node_address(address: &str) -> Result<String, NodeError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(NodeError::InvalidAddress("address is empty".to_string()));
    }

    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| NodeError::InvalidAddress(format!("{}: {}", address, e)))?;

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| NodeError::InvalidAddress(format!("{}: missing host", address)))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// The set of known peer addresses
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: DashSet<String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry::default()
    }

    /// Parses and adds `address`. Returns the normalized address and whether it was new.
    pub fn register(&self, address: &str) -> Result<(String, bool), NodeError> {
        let node = parse_node_address(address)?;
        let inserted = self.nodes.insert(node.clone());
        Ok((node, inserted))
    }

    /// Adds an already normalized address, as loaded from storage
    pub fn insert(&self, node: String) {
        self.nodes.insert(node);
    }

    /// Snapshot of all known nodes, sorted for stable output
    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.nodes.iter().map(|node| node.key().clone()).collect();
        nodes.sort();
        nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
