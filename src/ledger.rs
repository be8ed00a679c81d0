//! Prep balance ledger.
//!
//! Every debit is keyed by the session it pays for, which makes a debit
//! safe to repeat and gives refunds something to undo.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::model::{SessionId, UserBalance, UserId};

#[async_trait]
pub trait BalanceLedger: Send + Sync {
    async fn balance(&self, user: &UserId) -> Result<UserBalance, LedgerError>;

    /// Takes one prep for `session`. Fails with `InsufficientBalance` when
    /// nothing remains. Repeating a debit for the same session returns the
    /// remaining balance recorded the first time.
    async fn debit(&self, user: &UserId, session: &SessionId) -> Result<u32, LedgerError>;

    /// Returns the prep taken for `session`. A second refund is a no-op.
    async fn refund(&self, user: &UserId, session: &SessionId) -> Result<u32, LedgerError>;

    async fn grant(&self, user: &UserId, preps: u32) -> Result<UserBalance, LedgerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
pub enum PrepPackage {
    Basic,
    Standard,
    Premium,
}

impl PrepPackage {
    pub fn preps(&self) -> u32 {
        match self {
            PrepPackage::Basic => 5,
            PrepPackage::Standard => 12,
            PrepPackage::Premium => 25,
        }
    }

    pub fn price_cents(&self) -> u32 {
        match self {
            PrepPackage::Basic => 999,
            PrepPackage::Standard => 1999,
            PrepPackage::Premium => 3499,
        }
    }

    pub fn price_label(&self) -> String {
        let cents = self.price_cents();
        format!("${}.{:02}", cents / 100, cents % 100)
    }

    pub fn all() -> [PrepPackage; 3] {
        [PrepPackage::Basic, PrepPackage::Standard, PrepPackage::Premium]
    }
}

#[derive(Debug, Clone, Copy)]
struct Receipt {
    remaining_after: u32,
    refunded: bool,
}

#[derive(Debug, Default)]
struct Account {
    remaining: u32,
    total_purchased: u32,
    receipts: HashMap<SessionId, Receipt>,
}

/// In-process ledger. The mutex makes check-and-decrement a single step.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: Mutex<HashMap<UserId, Account>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(user: &UserId, preps: u32) -> Self {
        let ledger = Self::new();
        ledger.accounts.lock().insert(
            user.clone(),
            Account {
                remaining: preps,
                total_purchased: preps,
                receipts: HashMap::new(),
            },
        );
        ledger
    }
}

#[async_trait]
impl BalanceLedger for MemoryLedger {
    async fn balance(&self, user: &UserId) -> Result<UserBalance, LedgerError> {
        let accounts = self.accounts.lock();
        Ok(match accounts.get(user) {
            Some(acct) => UserBalance {
                user_id: user.clone(),
                remaining: acct.remaining,
                total_purchased: acct.total_purchased,
            },
            None => UserBalance::empty(user.clone()),
        })
    }

    async fn debit(&self, user: &UserId, session: &SessionId) -> Result<u32, LedgerError> {
        let mut accounts = self.accounts.lock();
        let acct = accounts
            .get_mut(user)
            .ok_or(LedgerError::InsufficientBalance)?;

        if let Some(receipt) = acct.receipts.get(session) {
            debug!(%user, %session, "repeated debit, returning recorded balance");
            return Ok(receipt.remaining_after);
        }
        if acct.remaining == 0 {
            return Err(LedgerError::InsufficientBalance);
        }
        acct.remaining -= 1;
        acct.receipts.insert(
            *session,
            Receipt {
                remaining_after: acct.remaining,
                refunded: false,
            },
        );
        info!(%user, %session, remaining = acct.remaining, "debited prep");
        Ok(acct.remaining)
    }

    async fn refund(&self, user: &UserId, session: &SessionId) -> Result<u32, LedgerError> {
        let mut accounts = self.accounts.lock();
        let Some(acct) = accounts.get_mut(user) else {
            return Ok(0);
        };
        if let Some(receipt) = acct.receipts.get_mut(session) {
            if !receipt.refunded {
                receipt.refunded = true;
                acct.remaining += 1;
                info!(%user, %session, remaining = acct.remaining, "refunded prep");
            }
        }
        Ok(acct.remaining)
    }

    async fn grant(&self, user: &UserId, preps: u32) -> Result<UserBalance, LedgerError> {
        let mut accounts = self.accounts.lock();
        let acct = accounts.entry(user.clone()).or_default();
        acct.remaining += preps;
        acct.total_purchased += preps;
        Ok(UserBalance {
            user_id: user.clone(),
            remaining: acct.remaining,
            total_purchased: acct.total_purchased,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn alex() -> UserId {
        UserId::new("alex")
    }

    #[tokio::test]
    async fn debit_never_goes_below_zero() {
        let ledger = MemoryLedger::with_balance(&alex(), 1);

        assert_eq!(ledger.debit(&alex(), &SessionId::new()).await, Ok(0));
        assert_matches!(
            ledger.debit(&alex(), &SessionId::new()).await,
            Err(LedgerError::InsufficientBalance)
        );
        assert_eq!(ledger.balance(&alex()).await.unwrap().remaining, 0);
    }

    #[tokio::test]
    async fn unknown_user_has_nothing_to_debit() {
        let ledger = MemoryLedger::new();
        assert_matches!(
            ledger.debit(&alex(), &SessionId::new()).await,
            Err(LedgerError::InsufficientBalance)
        );
    }

    #[tokio::test]
    async fn repeated_debit_for_one_session_takes_one_prep() {
        let ledger = MemoryLedger::with_balance(&alex(), 3);
        let session = SessionId::new();

        assert_eq!(ledger.debit(&alex(), &session).await, Ok(2));
        assert_eq!(ledger.debit(&alex(), &session).await, Ok(2));
        assert_eq!(ledger.balance(&alex()).await.unwrap().remaining, 2);
    }

    #[tokio::test]
    async fn refund_is_applied_once() {
        let ledger = MemoryLedger::with_balance(&alex(), 2);
        let session = SessionId::new();
        ledger.debit(&alex(), &session).await.unwrap();

        assert_eq!(ledger.refund(&alex(), &session).await, Ok(2));
        assert_eq!(ledger.refund(&alex(), &session).await, Ok(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_succeed_at_most_remaining_times() {
        let ledger = Arc::new(MemoryLedger::with_balance(&alex(), 3));

        let attempts = (0..10).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.debit(&alex(), &SessionId::new()).await })
        });
        let mut ok = 0;
        for handle in attempts {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }

        assert_eq!(ok, 3);
        assert_eq!(ledger.balance(&alex()).await.unwrap().remaining, 0);
    }

    #[tokio::test]
    async fn grant_adds_to_remaining_and_purchased() {
        let ledger = MemoryLedger::new();
        let b = ledger
            .grant(&alex(), PrepPackage::Standard.preps())
            .await
            .unwrap();
        assert_eq!(b.remaining, 12);
        assert_eq!(b.total_purchased, 12);
    }

    #[test]
    fn package_prices_render_as_dollars() {
        assert_eq!(PrepPackage::Basic.price_label(), "$9.99");
        assert_eq!(PrepPackage::Premium.price_label(), "$34.99");
    }
}
