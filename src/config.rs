use std::time::Duration;

use rust_decimal::Decimal;

use crate::domain::{AccountId, Currency, Error};

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_MAX_AMOUNT: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Number of transfers issued by the foreground driver.
    Transfers(u64),
    /// Wall-clock length of the measured run.
    Duration(Duration),
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub currency: Currency,
    pub workers: usize,
    pub budget: Budget,
    /// Upper bound (inclusive) of the random whole-unit transfer amount.
    pub max_amount: u64,
    /// Only accounts holding strictly more than this take part.
    pub min_balance: Decimal,
    /// Explicit account set; overrides `min_balance` selection.
    pub accounts: Option<Vec<AccountId>>,
    pub lock_timeout: Option<Duration>,
    pub seed: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            currency: Currency::Idrt,
            workers: DEFAULT_WORKERS,
            budget: Budget::Transfers(10_000),
            max_amount: DEFAULT_MAX_AMOUNT,
            min_balance: Decimal::ZERO,
            accounts: None,
            lock_timeout: None,
            seed: None,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(accounts) = &self.accounts {
            let mut distinct = accounts.clone();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() < 2 {
                return Err(Error::Config(
                    "at least two distinct accounts are required".to_string(),
                ));
            }
        }
        if self.min_balance.is_sign_negative() {
            return Err(Error::Config("min balance must not be negative".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    /// One connection per worker plus one for the foreground driver.
    pub fn for_workers(workers: usize) -> Self {
        Self {
            max_connections: workers as u32 + 1,
            ..Self::default()
        }
    }

    /// Rejects pools too small for every task to hold a transaction at once.
    pub fn check_capacity(&self, workers: usize) -> Result<(), Error> {
        let required = Self::for_workers(workers).max_connections;
        if self.max_connections < required {
            return Err(Error::Config(format!(
                "pool size {} is below workers + 1 ({})",
                self.max_connections, required
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_WORKERS as u32 + 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}
