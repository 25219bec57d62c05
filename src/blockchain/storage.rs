use std::path::Path;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionResult, Transactional};
use sled::{Db, IVec, Tree};
use thiserror::Error;

use super::block::Block;
use super::wallet::Wallet;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// sled-backed storage for blocks, wallets and peer nodes.
///
/// Blocks are keyed by their big-endian index so that iteration yields chain order.
pub struct LedgerStorage {
    db: Db,
    blocks: Tree,
    wallets: Tree,
    nodes: Tree,
}

impl std::fmt::Debug for LedgerStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStorage").finish()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::DeserializationError(e.to_string()))
}

fn block_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

impl LedgerStorage {
    /// Opens (or creates) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Opens a throwaway database that is removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let wallets = db.open_tree("wallets")?;
        let nodes = db.open_tree("nodes")?;

        Ok(Self {
            db,
            blocks,
            wallets,
            nodes,
        })
    }

    /// Loads every block in index order
    pub fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        self.blocks
            .iter()
            .values()
            .map(|value| decode::<Block>(&value?))
            .collect()
    }

    /// Loads all persisted wallets, skipping entries that no longer decode
    pub fn load_wallets(&self) -> Result<Vec<Wallet>, StorageError> {
        let mut wallets = Vec::new();
        for entry in self.wallets.iter() {
            let (key, value) = entry?;
            match decode::<Wallet>(&value) {
                Ok(wallet) => wallets.push(wallet),
                Err(e) => warn!(
                    "Skipping wallet {}: {}",
                    String::from_utf8_lossy(key.as_ref()),
                    e
                ),
            }
        }
        Ok(wallets)
    }

    pub fn load_nodes(&self) -> Result<Vec<String>, StorageError> {
        self.nodes
            .iter()
            .keys()
            .map(|key| -> Result<String, StorageError> {
                Ok(String::from_utf8_lossy(key?.as_ref()).to_string())
            })
            .collect()
    }

    pub fn save_wallet(&self, wallet: &Wallet) -> Result<(), StorageError> {
        self.wallets
            .insert(wallet.public_key.0.as_bytes(), encode(wallet)?)?;
        self.flush()
    }

    pub fn save_node(&self, address: &str) -> Result<(), StorageError> {
        self.nodes.insert(address.as_bytes(), Vec::<u8>::new())?;
        self.flush()
    }

    /// Writes a sealed block together with the wallets it touched in one transaction
    pub fn commit_block(&self, block: &Block, wallets: &[Wallet]) -> Result<(), StorageError> {
        let block_entry = (block_key(block.index), encode(block)?);
        let wallet_entries = Self::encode_wallets(wallets)?;

        (&self.blocks, &self.wallets)
            .transaction(|(blocks, wallet_tree)| -> ConflictableTransactionResult<(), ()> {
                blocks.insert(&block_entry.0[..], block_entry.1.as_slice())?;
                for (key, value) in &wallet_entries {
                    wallet_tree.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;

        self.flush()
    }

    /// Replaces every stored block and wallet in one transaction.
    ///
    /// Blocks are keyed by their position, and a block whose index disagrees
    /// with it is refused before anything is written.
    pub fn replace_all(&self, chain: &[Block], wallets: &[Wallet]) -> Result<(), StorageError> {
        let block_entries = chain
            .iter()
            .zip(1u64..)
            .map(|(block, position)| {
                if block.index != position {
                    return Err(StorageError::TransactionFailed(format!(
                        "block at position {} has index {}",
                        position, block.index
                    )));
                }
                Ok((block_key(position).to_vec(), encode(block)?))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let stale_blocks = self.blocks.iter().keys().collect::<Result<Vec<IVec>, _>>()?;
        let stale_wallets = self.wallets.iter().keys().collect::<Result<Vec<IVec>, _>>()?;
        let wallet_entries = Self::encode_wallets(wallets)?;

        (&self.blocks, &self.wallets)
            .transaction(|(blocks, wallet_tree)| -> ConflictableTransactionResult<(), ()> {
                for key in &stale_blocks {
                    blocks.remove(key.clone())?;
                }
                for key in &stale_wallets {
                    wallet_tree.remove(key.clone())?;
                }
                for (key, value) in &block_entries {
                    blocks.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &wallet_entries {
                    wallet_tree.insert(key.as_slice(), value.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e| StorageError::TransactionFailed(format!("{:?}", e)))?;

        self.flush()
    }

    fn encode_wallets(wallets: &[Wallet]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        wallets
            .iter()
            .map(|wallet| Ok((wallet.public_key.0.as_bytes().to_vec(), encode(wallet)?)))
            .collect()
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::transaction::Transaction;

    fn block(index: u64) -> Block {
        Block::new(
            index,
            vec![Transaction::new_reward(Address::from("alice"), 1.0)],
            index * 10,
            format!("hash-{}", index),
        )
    }

    #[test]
    fn test_commit_and_load_in_index_order() {
        let storage = LedgerStorage::temporary().unwrap();
        let wallet = Wallet {
            public_key: Address::from("alice"),
            balance: 1.0,
        };

        // Insert out of order; big-endian keys sort them back
        storage.commit_block(&block(2), &[]).unwrap();
        storage.commit_block(&block(1), &[wallet.clone()]).unwrap();

        let chain = storage.load_chain().unwrap();
        assert_eq!(chain.iter().map(|b| b.index).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(chain[0].proof, 10);
        assert_eq!(chain[0].previous_hash, "hash-1");
        assert_eq!(storage.load_wallets().unwrap(), vec![wallet]);
    }

    #[test]
    fn test_replace_all_drops_old_entries() {
        let storage = LedgerStorage::temporary().unwrap();
        for index in 1..=3 {
            storage.commit_block(&block(index), &[]).unwrap();
        }
        storage
            .save_wallet(&Wallet::new(Address::from("stale")))
            .unwrap();

        let fresh = Wallet {
            public_key: Address::from("fresh"),
            balance: 2.0,
        };
        storage.replace_all(&[block(1), block(2)], &[fresh.clone()]).unwrap();

        assert_eq!(storage.load_chain().unwrap().len(), 2);
        assert_eq!(storage.load_wallets().unwrap(), vec![fresh]);
    }

    #[test]
    fn test_replace_all_refuses_out_of_sequence_indexes() {
        let storage = LedgerStorage::temporary().unwrap();
        storage.commit_block(&block(1), &[]).unwrap();

        for chain in [vec![block(1), block(2), block(2)], vec![block(1), block(3)]] {
            assert!(matches!(
                storage.replace_all(&chain, &[]),
                Err(StorageError::TransactionFailed(_))
            ));
        }

        let stored = storage.load_chain().unwrap();
        assert_eq!(stored.iter().map(|b| b.index).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_nodes_are_deduplicated() {
        let storage = LedgerStorage::temporary().unwrap();
        storage.save_node("127.0.0.1:5001").unwrap();
        storage.save_node("127.0.0.1:5001").unwrap();
        storage.save_node("127.0.0.1:5002").unwrap();

        assert_eq!(
            storage.load_nodes().unwrap(),
            vec!["127.0.0.1:5001".to_string(), "127.0.0.1:5002".to_string()]
        );
    }
}
