// Ledger engine
//
// This module contains the core ledger implementation including:
// - Block structure and chain hashing
// - Transaction structure and signing payload
// - Cryptographic identities
// - Wallet balances
// - Proof of work algorithm
// - Peer registry and longest-chain consensus
// - Persistent storage

pub mod block;
pub mod chain;
pub mod consensus;
pub mod crypto;
pub mod nodes;
pub mod pow;
pub mod storage;
pub mod transaction;
pub mod wallet;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Ledger, LedgerConfig, LedgerError};
pub use consensus::{ChainResponse, ConsensusResolver, HttpChainSource};
pub use crypto::{Address, Keypair};
pub use transaction::{Transaction, TransactionPayload};
pub use wallet::Wallet;
