use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{self, Address, CryptoError, Keypair};

/// Errors that can occur while building or checking a transaction
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// The signed part of a transfer: everything except the signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransactionPayload {
    pub sender: Address,
    pub recipient: Address,
    pub amount: f64,
}

impl TransactionPayload {
    pub fn new(sender: Address, recipient: Address, amount: f64) -> Self {
        TransactionPayload {
            sender,
            recipient,
            amount,
        }
    }

    /// JSON with keys in sorted order, the exact bytes that get signed
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        canonical_json(self).map_err(|e| TransactionError::SerializationError(e.to_string()))
    }

    /// Signs the payload with a hex encoded private key
    pub fn sign(&self, private_key: &str) -> Result<String, TransactionError> {
        let message = self.canonical_bytes()?;
        Ok(crypto::sign(private_key, &message)?)
    }

    /// Checks `signature` against the sender's public key
    pub fn verify(&self, signature: &str) -> bool {
        match self.canonical_bytes() {
            Ok(message) => crypto::verify(&self.sender, &message, signature),
            Err(_) => false,
        }
    }
}

/// Represents a value transfer between two addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address, `"0"` for mining rewards
    pub sender: Address,

    /// Recipient's address
    pub recipient: Address,

    /// Amount being transferred
    pub amount: f64,

    /// Base58 signature over the canonical payload
    pub signature: Option<String>,
}

impl Transaction {
    /// Creates a new unsigned transaction
    pub fn new(sender: Address, recipient: Address, amount: f64) -> Self {
        Transaction {
            sender,
            recipient,
            amount,
            signature: None,
        }
    }

    /// Creates a mining reward transaction
    pub fn new_reward(recipient: Address, amount: f64) -> Self {
        Transaction::new(Address::reward_sender(), recipient, amount)
    }

    /// Creates a transaction signed by `keypair`
    pub fn new_signed(keypair: &Keypair, recipient: Address, amount: f64) -> Result<Self, TransactionError> {
        let mut transaction = Transaction::new(keypair.address().clone(), recipient, amount);
        let message = transaction.payload().canonical_bytes()?;
        transaction.signature = Some(keypair.sign(&message));
        Ok(transaction)
    }

    pub fn payload(&self) -> TransactionPayload {
        TransactionPayload::new(self.sender.clone(), self.recipient.clone(), self.amount)
    }

    pub fn is_reward(&self) -> bool {
        self.sender.is_reward_sender()
    }

    /// Checks the fields that do not depend on ledger state
    pub fn validate_structure(&self) -> Result<(), TransactionError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(TransactionError::InvalidAmount(format!(
                "Amount must be a positive number: {}",
                self.amount
            )));
        }

        if self.sender.0.trim().is_empty() {
            return Err(TransactionError::InvalidTransaction("Sender is empty".to_string()));
        }

        if self.recipient.0.trim().is_empty() {
            return Err(TransactionError::InvalidTransaction("Recipient is empty".to_string()));
        }

        if self.is_reward() && self.signature.is_some() {
            return Err(TransactionError::InvalidTransaction(
                "Reward transactions carry no signature".to_string(),
            ));
        }

        Ok(())
    }

    /// Verifies the sender's signature. Reward transactions have nothing to verify.
    pub fn verify_signature(&self) -> Result<(), TransactionError> {
        if self.is_reward() {
            return Ok(());
        }

        match &self.signature {
            Some(signature) if self.payload().verify(signature) => Ok(()),
            _ => Err(TransactionError::InvalidSignature),
        }
    }
}

/// Serializes `value` through `serde_json::Value`, whose maps are sorted by key,
/// so the output never depends on struct field order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&value)
}
