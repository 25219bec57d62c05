use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::collections::HashMap;

use super::block::Block;
use super::crypto::Address;
use super::transaction::Transaction;

/// Slack allowed when comparing balances, absorbing `f64` rounding such as
/// `0.3 - 0.1 < 0.2`
pub const BALANCE_TOLERANCE: f64 = 1e-9;

/// Errors that can occur while moving funds between wallets
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Unknown sender: {0}")]
    UnknownSender(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Balance held by a public key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Wallet {
    /// The wallet's address
    pub public_key: Address,

    /// Confirmed balance
    pub balance: f64,
}

impl Wallet {
    pub fn new(public_key: Address) -> Self {
        Wallet {
            public_key,
            balance: 0.0,
        }
    }

    /// Increases the balance
    pub fn deposit(&mut self, amount: f64) -> Result<(), WalletError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(WalletError::InvalidAmount(format!(
                "Amount must be positive: {}",
                amount
            )));
        }

        self.balance += amount;
        Ok(())
    }

    /// Decreases the balance, refusing to go below zero.
    ///
    /// A shortfall within `BALANCE_TOLERANCE` is rounding and empties the wallet.
    pub fn withdraw(&mut self, amount: f64) -> Result<(), WalletError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(WalletError::InvalidAmount(format!(
                "Amount must be positive: {}",
                amount
            )));
        }

        if self.balance + BALANCE_TOLERANCE < amount {
            return Err(WalletError::InsufficientFunds {
                required: amount,
                available: self.balance,
            });
        }

        self.balance = (self.balance - amount).max(0.0);
        Ok(())
    }
}

/// All wallets known to the ledger, keyed by public key.
///
/// Balances only ever change through `apply_transaction`, which is called for
/// committed transactions.
#[derive(Debug, Clone, Default)]
pub struct WalletBook {
    wallets: HashMap<Address, Wallet>,
}

impl WalletBook {
    pub fn new() -> Self {
        WalletBook::default()
    }

    /// Rebuilds balances by replaying every transaction of `chain` in order
    pub fn replay(chain: &[Block]) -> Result<Self, WalletError> {
        let mut book = WalletBook::new();
        for block in chain {
            for transaction in &block.transactions {
                book.apply_transaction(transaction)?;
            }
        }
        Ok(book)
    }

    pub fn get(&self, address: &Address) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.wallets.contains_key(address)
    }

    /// Registers an empty wallet. Existing wallets are left untouched.
    pub fn open(&mut self, address: Address) {
        self.wallets
            .entry(address.clone())
            .or_insert_with(|| Wallet::new(address));
    }

    /// Confirmed balance, or zero for unknown addresses
    pub fn balance(&self, address: &Address) -> f64 {
        self.wallets.get(address).map(|w| w.balance).unwrap_or(0.0)
    }

    /// Applies one committed transaction: debits the sender unless it is a reward,
    /// then credits the recipient, creating its wallet when needed.
    ///
    /// Nothing is changed when the debit fails.
    pub fn apply_transaction(&mut self, transaction: &Transaction) -> Result<(), WalletError> {
        if !transaction.is_reward() {
            let sender = self
                .wallets
                .get_mut(&transaction.sender)
                .ok_or_else(|| WalletError::UnknownSender(transaction.sender.0.clone()))?;
            sender.withdraw(transaction.amount)?;
        }

        self.wallets
            .entry(transaction.recipient.clone())
            .or_insert_with(|| Wallet::new(transaction.recipient.clone()))
            .deposit(transaction.amount)
    }

    /// Applies a batch atomically: either every transaction lands or the book is unchanged
    pub fn apply_all(&mut self, transactions: &[Transaction]) -> Result<(), WalletError> {
        let mut staged = self.clone();
        for transaction in transactions {
            staged.apply_transaction(transaction)?;
        }
        *self = staged;
        Ok(())
    }

    /// All wallets sorted by address
    pub fn all(&self) -> Vec<Wallet> {
        let mut wallets: Vec<Wallet> = self.wallets.values().cloned().collect();
        wallets.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        wallets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::from(s)
    }

    #[test]
    fn test_deposit_and_withdraw() {
        let mut wallet = Wallet::new(addr("alice"));

        wallet.deposit(100.0).unwrap();
        assert_eq!(wallet.balance, 100.0);

        wallet.withdraw(50.0).unwrap();
        assert_eq!(wallet.balance, 50.0);

        assert!(matches!(
            wallet.withdraw(100.0),
            Err(WalletError::InsufficientFunds { .. })
        ));
        assert!(wallet.deposit(-1.0).is_err());
    }

    #[test]
    fn test_withdraw_tolerates_rounding() {
        let mut wallet = Wallet::new(addr("alice"));
        wallet.deposit(0.3).unwrap();

        wallet.withdraw(0.1).unwrap();
        wallet.withdraw(0.2).unwrap();
        assert_eq!(wallet.balance, 0.0);

        assert!(matches!(
            wallet.withdraw(0.1),
            Err(WalletError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_reward_creates_wallet() {
        let mut book = WalletBook::new();
        book.apply_transaction(&Transaction::new_reward(addr("alice"), 1.0))
            .unwrap();

        assert_eq!(book.balance(&addr("alice")), 1.0);
        assert!(book.contains(&addr("alice")));
    }

    #[test]
    fn test_transfer_between_wallets() {
        let mut book = WalletBook::new();
        book.apply_transaction(&Transaction::new_reward(addr("alice"), 5.0))
            .unwrap();
        book.apply_transaction(&Transaction::new(addr("alice"), addr("bob"), 2.0))
            .unwrap();

        assert_eq!(book.balance(&addr("alice")), 3.0);
        assert_eq!(book.balance(&addr("bob")), 2.0);
        assert_eq!(book.all().iter().map(|w| w.balance).sum::<f64>(), 5.0);
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let mut book = WalletBook::new();
        let result = book.apply_transaction(&Transaction::new(addr("ghost"), addr("bob"), 1.0));

        assert!(matches!(result, Err(WalletError::UnknownSender(_))));
        assert!(!book.contains(&addr("bob")));
    }

    #[test]
    fn test_apply_all_is_atomic() {
        let mut book = WalletBook::new();
        book.open(addr("alice"));

        let batch = vec![
            Transaction::new_reward(addr("alice"), 1.0),
            Transaction::new(addr("alice"), addr("bob"), 5.0),
        ];

        assert!(book.apply_all(&batch).is_err());
        assert_eq!(book.balance(&addr("alice")), 0.0);
        assert!(!book.contains(&addr("bob")));
    }

    #[test]
    fn test_open_keeps_existing_balance() {
        let mut book = WalletBook::new();
        book.apply_transaction(&Transaction::new_reward(addr("alice"), 4.0))
            .unwrap();
        book.open(addr("alice"));

        assert_eq!(book.balance(&addr("alice")), 4.0);
        assert_eq!(book.all().len(), 1);
    }
}
