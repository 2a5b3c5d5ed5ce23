// ABOUTME: ResourceLedger - per-user compute credit and reward balances.
// ABOUTME: Each account has its own lock so unrelated users never contend.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::LedgerError;

/// Balance record for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Unique user identifier.
    pub id: String,
    /// Compute credit available for task submissions.
    pub resources: u64,
    /// Rewards accumulated from completed work.
    pub rewards: u64,
}

/// Store of user balances.
///
/// The outer map is only write-locked to add accounts; balance changes lock
/// the single account involved. A debit checks and subtracts under that lock,
/// so two concurrent debits can never overdraw an account together.
#[derive(Default)]
pub struct ResourceLedger {
    accounts: RwLock<HashMap<String, Arc<Mutex<UserAccount>>>>,
}

impl ResourceLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account.
    ///
    /// Returns `Err(LedgerError::AlreadyExists)` if the id is taken; the
    /// existing account is left untouched.
    pub async fn register(
        &self,
        user_id: &str,
        resources: u64,
        rewards: u64,
    ) -> Result<UserAccount, LedgerError> {
        let mut accounts = self.accounts.write().await;
        match accounts.entry(user_id.to_string()) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists(user_id.to_string())),
            Entry::Vacant(slot) => {
                let account = UserAccount {
                    id: user_id.to_string(),
                    resources,
                    rewards,
                };
                slot.insert(Arc::new(Mutex::new(account.clone())));
                Ok(account)
            }
        }
    }

    async fn account(&self, user_id: &str) -> Result<Arc<Mutex<UserAccount>>, LedgerError> {
        self.accounts
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(user_id.to_string()))
    }

    /// Replace a user's resource balance.
    ///
    /// This is an overwrite, not a delta. Amounts outside `0..=u64::MAX` are
    /// rejected with `LedgerError::InvalidAmount`.
    pub async fn set_resources(&self, user_id: &str, resources: i128) -> Result<(), LedgerError> {
        let account = self.account(user_id).await?;
        let resources = u64::try_from(resources).map_err(|_| LedgerError::InvalidAmount {
            user_id: user_id.to_string(),
            amount: resources,
        })?;
        account.lock().await.resources = resources;
        Ok(())
    }

    /// Subtract `amount` from a user's resources.
    ///
    /// Returns the remaining balance, or `LedgerError::InsufficientResources`
    /// with the balance unchanged.
    pub async fn debit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        let account = self.account(user_id).await?;
        let mut account = account.lock().await;
        if account.resources < amount {
            return Err(LedgerError::InsufficientResources {
                user_id: user_id.to_string(),
                requested: amount,
                available: account.resources,
            });
        }
        account.resources -= amount;
        Ok(account.resources)
    }

    /// Add `amount` to a user's rewards. Returns the new reward total.
    pub async fn credit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        let account = self.account(user_id).await?;
        let mut account = account.lock().await;
        account.rewards = account.rewards.saturating_add(amount);
        Ok(account.rewards)
    }

    /// Snapshot of an account.
    pub async fn get(&self, user_id: &str) -> Option<UserAccount> {
        let account = self.account(user_id).await.ok()?;
        let snapshot = account.lock().await.clone();
        Some(snapshot)
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.accounts.read().await.contains_key(user_id)
    }

    /// Current resource balance.
    pub async fn resources(&self, user_id: &str) -> Result<u64, LedgerError> {
        let account = self.account(user_id).await?;
        let resources = account.lock().await.resources;
        Ok(resources)
    }

    /// Current reward total.
    pub async fn rewards(&self, user_id: &str) -> Result<u64, LedgerError> {
        let account = self.account(user_id).await?;
        let rewards = account.lock().await.rewards;
        Ok(rewards)
    }

    /// Sum of every user's resources.
    pub async fn total_resources(&self) -> u64 {
        let accounts: Vec<_> = self.accounts.read().await.values().cloned().collect();
        let mut total: u64 = 0;
        for account in accounts {
            total = total.saturating_add(account.lock().await.resources);
        }
        total
    }

    /// Number of registered users.
    pub async fn count(&self) -> usize {
        self.accounts.read().await.len()
    }
}
