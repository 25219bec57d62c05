use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{info, warn};
use thiserror::Error;

use super::block::{hash_block, Block, GENESIS_PREVIOUS_HASH, GENESIS_PROOF};
use super::consensus::valid_chain;
use super::crypto::{Address, CryptoError, Keypair};
use super::nodes::{NodeError, NodeRegistry};
use super::pow;
use super::storage::{LedgerStorage, StorageError};
use super::transaction::{Transaction, TransactionError};
use super::wallet::{Wallet, WalletBook, WalletError, BALANCE_TOLERANCE};

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unknown sender: {0}")]
    UnknownSender(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Chain head changed while mining")]
    StaleHead,

    #[error("Mining was cancelled")]
    MiningCancelled,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("System error: {0}")]
    SystemError(String),
}

impl From<TransactionError> for LedgerError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::InvalidSignature => LedgerError::InvalidSignature,
            TransactionError::InvalidAmount(msg) => LedgerError::InvalidAmount(msg),
            TransactionError::InvalidTransaction(msg) => LedgerError::InvalidTransaction(msg),
            TransactionError::CryptoError(e) => LedgerError::CryptoError(e),
            TransactionError::SerializationError(msg) => LedgerError::SystemError(msg),
        }
    }
}

impl From<WalletError> for LedgerError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::UnknownSender(sender) => LedgerError::UnknownSender(sender),
            WalletError::InsufficientFunds { required, available } => {
                LedgerError::InsufficientFunds { required, available }
            }
            WalletError::InvalidAmount(msg) => LedgerError::InvalidAmount(msg),
        }
    }
}

impl From<NodeError> for LedgerError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::InvalidAddress(msg) => LedgerError::InvalidAddress(msg),
        }
    }
}

/// Engine settings that affect ledger semantics
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Amount paid to the miner of each block
    pub mining_reward: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig { mining_reward: 1.0 }
    }
}

/// Everything a seal or a chain replacement must change together
#[derive(Debug, Default)]
struct LedgerState {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    wallets: WalletBook,
}

impl LedgerState {
    /// Confirmed balance minus what the sender already has waiting in the pool
    fn spendable(&self, sender: &Address) -> f64 {
        let pending_debits: f64 = self
            .pending
            .iter()
            .filter(|t| &t.sender == sender)
            .map(|t| t.amount)
            .sum();
        self.wallets.balance(sender) - pending_debits
    }
}

/// The ledger: committed chain, pending pool, wallets and known peers.
///
/// All state that a seal touches sits behind one lock, so readers never see a
/// block without its wallet effects.
#[derive(Debug)]
pub struct Ledger {
    state: RwLock<LedgerState>,

    nodes: NodeRegistry,

    storage: Option<Arc<LedgerStorage>>,

    /// Bumped on every chain replacement; in-flight mining compares against it
    generation: Arc<AtomicU64>,

    shutdown: Arc<AtomicBool>,

    config: LedgerConfig,
}

impl Ledger {
    /// Creates an in-memory ledger holding only the genesis block
    pub fn new(config: LedgerConfig) -> Self {
        let ledger = Ledger {
            state: RwLock::new(LedgerState::default()),
            nodes: NodeRegistry::new(),
            storage: None,
            generation: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        };

        // Without storage the genesis seal cannot fail
        if let Err(err) = ledger.seal_block(GENESIS_PROOF) {
            warn!("Failed to seal genesis block: {}", err);
        }

        ledger
    }

    /// Opens a ledger persisted at `path`, creating the genesis block on first use
    pub fn with_storage<P: AsRef<Path>>(path: P, config: LedgerConfig) -> Result<Self, LedgerError> {
        let storage = LedgerStorage::open(path)?;
        Self::from_storage(storage, config)
    }

    pub(crate) fn from_storage(storage: LedgerStorage, config: LedgerConfig) -> Result<Self, LedgerError> {
        let chain = storage.load_chain()?;

        let mut wallets = WalletBook::replay(&chain)
            .map_err(|e| LedgerError::InvalidChain(format!("stored chain does not replay: {}", e)))?;

        // Wallets opened at key generation hold nothing on chain but must still exist
        for wallet in storage.load_wallets()? {
            wallets.open(wallet.public_key);
        }

        let nodes = NodeRegistry::new();
        for node in storage.load_nodes()? {
            nodes.insert(node);
        }

        if !chain.is_empty() && !valid_chain(&chain) {
            warn!("Stored chain failed validation; it will be kept but peers may replace it");
        }

        let is_empty = chain.is_empty();
        info!("Loaded {} blocks and {} nodes from storage", chain.len(), nodes.len());

        let ledger = Ledger {
            state: RwLock::new(LedgerState {
                chain,
                pending: Vec::new(),
                wallets,
            }),
            nodes,
            storage: Some(Arc::new(storage)),
            generation: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        };

        if is_empty {
            info!("No existing chain found in storage, creating genesis block");
            ledger.seal_block(GENESIS_PROOF)?;
        }

        Ok(ledger)
    }

    // Writers stage their changes and swap them in last, so a poisoned lock
    // still guards consistent state.
    fn read_state(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates and queues a transfer.
    ///
    /// Returns the index of the block the transaction is expected to land in.
    pub fn submit_transaction(
        &self,
        sender: Address,
        recipient: Address,
        amount: f64,
        signature: Option<String>,
    ) -> Result<u64, LedgerError> {
        self.submit(Transaction {
            sender,
            recipient,
            amount,
            signature,
        })
    }

    /// Validates and queues an already built transaction
    pub fn submit(&self, transaction: Transaction) -> Result<u64, LedgerError> {
        transaction.validate_structure()?;
        transaction.verify_signature()?;

        let mut state = self.write_state();

        if !transaction.is_reward() {
            if !state.wallets.contains(&transaction.sender) {
                return Err(LedgerError::UnknownSender(transaction.sender.0.clone()));
            }

            let available = state.spendable(&transaction.sender);
            if available + BALANCE_TOLERANCE < transaction.amount {
                return Err(LedgerError::InsufficientFunds {
                    required: transaction.amount,
                    available,
                });
            }
        }

        state.pending.push(transaction);
        Ok(state.chain.len() as u64 + 1)
    }

    /// Seals every pending transaction into a new block on top of the current head
    pub fn seal_block(&self, proof: u64) -> Result<Block, LedgerError> {
        let mut state = self.write_state();
        self.seal_locked(&mut state, proof, None)
    }

    fn seal_locked(
        &self,
        state: &mut LedgerState,
        proof: u64,
        reward: Option<Transaction>,
    ) -> Result<Block, LedgerError> {
        let previous_hash = state
            .chain
            .last()
            .map(hash_block)
            .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());

        let mut transactions = state.pending.clone();
        transactions.extend(reward);

        let mut wallets = state.wallets.clone();
        wallets.apply_all(&transactions)?;

        let block = Block::new(state.chain.len() as u64 + 1, transactions, proof, previous_hash);

        if let Some(storage) = &self.storage {
            let touched = touched_wallets(&block, &wallets);
            storage.commit_block(&block, &touched)?;
        }

        state.chain.push(block.clone());
        state.wallets = wallets;
        state.pending.clear();

        info!(
            "Sealed block {} with {} transactions",
            block.index,
            block.transactions.len()
        );

        Ok(block)
    }

    /// Solves the puzzle for the current head off the async runtime, then seals
    /// the pending pool plus a reward for `miner`.
    ///
    /// Fails with `StaleHead` if the chain moved while the search was running.
    pub async fn mine(&self, miner: Address) -> Result<Block, LedgerError> {
        let reward = Transaction::new_reward(miner, self.config.mining_reward);
        reward.validate_structure()?;

        let target = self.mining_target()?;

        let generation = self.generation.clone();
        let shutdown = self.shutdown.clone();
        let (last_proof, started_at) = (target.last_proof, target.generation);
        let proof = tokio::task::spawn_blocking(move || {
            pow::solve_until(last_proof, || {
                shutdown.load(Ordering::SeqCst) || generation.load(Ordering::SeqCst) != started_at
            })
        })
        .await
        .map_err(|e| LedgerError::SystemError(e.to_string()))?;

        let proof = match proof {
            Some(proof) => proof,
            None if self.shutdown.load(Ordering::SeqCst) => return Err(LedgerError::MiningCancelled),
            None => return Err(LedgerError::StaleHead),
        };

        self.seal_mined(&target, proof, reward)
    }

    fn mining_target(&self) -> Result<MiningTarget, LedgerError> {
        let state = self.read_state();
        let last = state
            .chain
            .last()
            .ok_or_else(|| LedgerError::InvalidChain("chain is empty".to_string()))?;

        Ok(MiningTarget {
            last_proof: last.proof,
            last_hash: hash_block(last),
            generation: self.generation.load(Ordering::SeqCst),
        })
    }

    /// Seals a solved block unless the head it was solved for has been replaced
    fn seal_mined(
        &self,
        target: &MiningTarget,
        proof: u64,
        reward: Transaction,
    ) -> Result<Block, LedgerError> {
        let mut state = self.write_state();
        let head_unchanged =
            state.chain.last().map(hash_block).as_deref() == Some(target.last_hash.as_str());
        if self.generation.load(Ordering::SeqCst) != target.generation || !head_unchanged {
            warn!("Discarding proof {}: chain head moved during the search", proof);
            return Err(LedgerError::StaleHead);
        }

        self.seal_locked(&mut state, proof, Some(reward))
    }

    /// Stops in-flight and future proof searches
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Generates a keypair and opens an empty wallet for it.
    ///
    /// The private key is handed back to the caller and never stored.
    pub fn create_wallet(&self) -> Result<Keypair, LedgerError> {
        let keypair = Keypair::generate();
        let address = keypair.address().clone();

        let mut state = self.write_state();
        if let Some(storage) = &self.storage {
            storage.save_wallet(&Wallet::new(address.clone()))?;
        }
        state.wallets.open(address);

        Ok(keypair)
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.read_state().chain.clone()
    }

    pub fn chain_len(&self) -> usize {
        self.read_state().chain.len()
    }

    pub fn last_block(&self) -> Option<Block> {
        self.read_state().chain.last().cloned()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.read_state().pending.clone()
    }

    pub fn get_wallet(&self, address: &Address) -> Option<Wallet> {
        self.read_state().wallets.get(address).cloned()
    }

    pub fn wallets(&self) -> Vec<Wallet> {
        self.read_state().wallets.all()
    }

    /// Checks hash links and proofs of the local chain
    pub fn is_valid(&self) -> bool {
        valid_chain(&self.read_state().chain)
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    /// Registers a peer, returning its normalized `host:port`
    pub fn register_node(&self, address: &str) -> Result<String, LedgerError> {
        let (node, inserted) = self.nodes.register(address)?;

        if inserted {
            if let Some(storage) = &self.storage {
                storage.save_node(&node)?;
            }
            info!("Registered node {}", node);
        }

        Ok(node)
    }

    /// Discards the local chain and pending pool and rebuilds all wallets from `new_chain`
    pub fn replace_chain(&self, new_chain: Vec<Block>) -> Result<(), LedgerError> {
        let wallets = Self::prepare_replacement(&new_chain)?;
        let mut state = self.write_state();
        self.install_chain(&mut state, new_chain, wallets)
    }

    /// Replaces the chain only if `new_chain` is still strictly longer once the lock is held
    pub fn replace_chain_if_longer(&self, new_chain: Vec<Block>) -> Result<bool, LedgerError> {
        let wallets = Self::prepare_replacement(&new_chain)?;
        let mut state = self.write_state();

        if new_chain.len() <= state.chain.len() {
            return Ok(false);
        }

        self.install_chain(&mut state, new_chain, wallets)?;
        Ok(true)
    }

    fn prepare_replacement(new_chain: &[Block]) -> Result<WalletBook, LedgerError> {
        if new_chain.is_empty() {
            return Err(LedgerError::InvalidChain("chain is empty".to_string()));
        }

        if !valid_chain(new_chain) {
            return Err(LedgerError::InvalidChain(
                "indexes, hash links or proofs do not verify".to_string(),
            ));
        }

        WalletBook::replay(new_chain).map_err(|e| LedgerError::InvalidChain(e.to_string()))
    }

    fn install_chain(
        &self,
        state: &mut LedgerState,
        new_chain: Vec<Block>,
        wallets: WalletBook,
    ) -> Result<(), LedgerError> {
        if let Some(storage) = &self.storage {
            storage.replace_all(&new_chain, &wallets.all())?;
        }

        let dropped = state.pending.len();
        info!(
            "Replacing chain of {} blocks with {} blocks ({} pending transactions dropped)",
            state.chain.len(),
            new_chain.len(),
            dropped
        );

        state.chain = new_chain;
        state.wallets = wallets;
        state.pending.clear();
        self.generation.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }
}

/// The head a proof search started from
#[derive(Debug, Clone)]
struct MiningTarget {
    last_proof: u64,
    last_hash: String,
    generation: u64,
}

/// Wallets whose balance a block changes
fn touched_wallets(block: &Block, wallets: &WalletBook) -> Vec<Wallet> {
    let mut addresses: Vec<&Address> = block
        .transactions
        .iter()
        .flat_map(|t| [&t.sender, &t.recipient])
        .filter(|address| !address.is_reward_sender())
        .collect();
    addresses.sort();
    addresses.dedup();

    addresses
        .into_iter()
        .filter_map(|address| wallets.get(address).cloned())
        .collect()
}
