use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::transaction::{canonical_json, Transaction};

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "1";

/// `proof` of the genesis block
pub const GENESIS_PROOF: u64 = 100;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// 1-based position of the block in the chain
    pub index: u64,

    /// Timestamp when the block was sealed
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Transactions sealed in this block, in submission order
    pub transactions: Vec<Transaction>,

    /// Proof of work linking this block to its predecessor's proof
    pub proof: u64,

    /// Hash of the previous block
    pub previous_hash: String,
}

impl Block {
    /// Creates a new block stamped with the current time
    pub fn new(index: u64, transactions: Vec<Transaction>, proof: u64, previous_hash: String) -> Self {
        Block {
            index,
            timestamp: Utc::now(),
            transactions,
            proof,
            previous_hash,
        }
    }
}

/// SHA-256 over the key-sorted JSON encoding of the block, hex encoded.
///
/// Transactions keep their stored order; only object keys are sorted.
pub fn hash_block(block: &Block) -> String {
    // A Block always serializes: every field is a string, number or list of those.
    let bytes = canonical_json(block).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
