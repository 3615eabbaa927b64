//! In-process ledger with the same locking contract as the Postgres gateway.
//!
//! Every row sits behind its own `tokio::sync::Mutex`. A transaction holds
//! the guards of the rows it touched until it commits or is dropped, so rows
//! are exclusively locked exactly like `SELECT ... FOR UPDATE`. Because two
//! mutexes cannot be taken atomically, `lock_pair` always locks the lower id
//! first; every other multi-row read follows the same ascending order, which
//! rules out lock cycles.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, RwLock, Semaphore};

use crate::config::PoolConfig;
use crate::domain::{
    Account, AccountId, Amount, Currency, Ledger, LedgerTx, LockedPair, TransferError,
};

#[derive(Debug)]
struct Row {
    user_id: i64,
    currency: Currency,
    amount: Decimal,
}

type Table = BTreeMap<AccountId, Arc<Mutex<Row>>>;

#[derive(Debug, Default)]
pub struct LedgerStats {
    locks_acquired: AtomicU64,
    mutations: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl LedgerStats {
    pub fn locks_acquired(&self) -> u64 {
        self.locks_acquired.load(Ordering::Relaxed)
    }

    /// Row updates applied, including ones later rolled back.
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Inner {
    table: RwLock<Table>,
    connections: Arc<Semaphore>,
    acquire_timeout: Duration,
    stats: LedgerStats,
}

#[derive(Debug, Clone)]
pub struct MemoryLedger {
    inner: Arc<Inner>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}

impl MemoryLedger {
    pub fn new(pool: &PoolConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: RwLock::new(BTreeMap::new()),
                connections: Arc::new(Semaphore::new(pool.max_connections as usize)),
                acquire_timeout: pool.acquire_timeout,
                stats: LedgerStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> &LedgerStats {
        &self.inner.stats
    }

    /// Current committed amount. Waits for any transaction holding the row.
    pub async fn amount(&self, id: AccountId) -> Option<Decimal> {
        let row = self.inner.table.read().await.get(&id).cloned()?;
        let amount = row.lock().await.amount;
        Some(amount)
    }

    /// Locks every row (ascending id) and returns a consistent copy.
    async fn snapshot(&self) -> Vec<Account> {
        let rows: Vec<(AccountId, Arc<Mutex<Row>>)> = self
            .inner
            .table
            .read()
            .await
            .iter()
            .map(|(id, row)| (*id, Arc::clone(row)))
            .collect();

        let mut guards = Vec::with_capacity(rows.len());
        for (id, row) in rows {
            guards.push((id, row.lock_owned().await));
        }

        guards
            .iter()
            .map(|(id, row)| Account::new(*id, row.user_id, row.currency, row.amount))
            .collect()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, TransferError> {
        let acquire = Arc::clone(&self.inner.connections).acquire_owned();
        let permit = match tokio::time::timeout(self.inner.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(TransferError::ResourceUnavailable(
                    "connection pool closed".to_string(),
                ));
            }
            Err(_) => {
                return Err(TransferError::ResourceUnavailable(format!(
                    "no connection available within {}ms",
                    self.inner.acquire_timeout.as_millis()
                )));
            }
        };

        Ok(MemoryTx {
            inner: Arc::clone(&self.inner),
            _permit: permit,
            locked: BTreeMap::new(),
            undo: BTreeMap::new(),
            committed: false,
        })
    }

    async fn currency_total(&self, currency: Currency) -> Result<Decimal, TransferError> {
        let accounts = self.snapshot().await;
        Ok(crate::domain::account::currency_total(&accounts, currency))
    }

    async fn eligible_accounts(
        &self,
        currency: Currency,
        min_amount: Decimal,
    ) -> Result<Vec<AccountId>, TransferError> {
        Ok(self
            .snapshot()
            .await
            .into_iter()
            .filter(|a| a.currency == currency && a.amount > min_amount)
            .map(|a| a.id)
            .collect())
    }

    async fn balances(&self, currency: Currency) -> Result<Vec<Account>, TransferError> {
        Ok(self
            .snapshot()
            .await
            .into_iter()
            .filter(|a| a.currency == currency)
            .collect())
    }

    /// Replaces rows wholesale. Not meant to run while transactions are open.
    async fn seed(&self, accounts: &[Account]) -> Result<u64, TransferError> {
        let mut table = self.inner.table.write().await;
        for account in accounts {
            let row = Row {
                user_id: account.user_id,
                currency: account.currency,
                amount: account.amount,
            };
            table.insert(account.id, Arc::new(Mutex::new(row)));
        }
        tracing::debug!(accounts = accounts.len(), "memory ledger seeded");
        Ok(accounts.len() as u64)
    }
}

/// Transaction over [`MemoryLedger`].
///
/// Updates are written through to the locked rows and undone on drop unless
/// the transaction committed. Other transactions cannot observe them in the
/// meantime because they would need the row lock first.
pub struct MemoryTx {
    inner: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
    locked: BTreeMap<AccountId, OwnedMutexGuard<Row>>,
    undo: BTreeMap<AccountId, Decimal>,
    committed: bool,
}

impl MemoryTx {
    /// Returns false when the row does not exist.
    async fn lock_row(&mut self, id: AccountId) -> bool {
        if self.locked.contains_key(&id) {
            return true;
        }
        let row = self.inner.table.read().await.get(&id).cloned();
        let Some(row) = row else {
            return false;
        };
        let guard = row.lock_owned().await;
        self.inner
            .stats
            .locks_acquired
            .fetch_add(1, Ordering::Relaxed);
        self.locked.insert(id, guard);
        true
    }

    async fn adjust(&mut self, id: AccountId, delta: Decimal) -> u64 {
        if !self.lock_row(id).await {
            return 0;
        }
        let Some(row) = self.locked.get_mut(&id) else {
            return 0;
        };
        self.undo.entry(id).or_insert(row.amount);
        row.amount += delta;
        self.inner.stats.mutations.fetch_add(1, Ordering::Relaxed);
        1
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_pair(
        &mut self,
        from: AccountId,
        to: AccountId,
    ) -> Result<LockedPair, TransferError> {
        let (low, high) = if from <= to { (from, to) } else { (to, from) };
        self.lock_row(low).await;
        if high != low {
            self.lock_row(high).await;
        }

        let currencies: BTreeSet<Currency> = [from, to]
            .iter()
            .filter_map(|id| self.locked.get(id).map(|row| row.currency))
            .collect();

        Ok(LockedPair {
            from_amount: self.locked.get(&from).map(|row| row.amount),
            to_amount: self.locked.get(&to).map(|row| row.amount),
            currencies: currencies.len() as i64,
        })
    }

    async fn debit(&mut self, account: AccountId, amount: Amount) -> Result<u64, TransferError> {
        Ok(self.adjust(account, -amount.as_decimal()).await)
    }

    async fn credit(&mut self, account: AccountId, amount: Amount) -> Result<u64, TransferError> {
        Ok(self.adjust(account, amount.as_decimal()).await)
    }

    async fn commit(self) -> Result<(), TransferError> {
        let mut tx = self;
        tx.committed = true;
        tx.inner.stats.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(self) -> Result<(), TransferError> {
        drop(self);
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (id, amount) in &self.undo {
            if let Some(row) = self.locked.get_mut(id) {
                row.amount = *amount;
            }
        }
        self.inner.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn two_accounts() -> MemoryLedger {
        let ledger = MemoryLedger::default();
        ledger
            .seed(&[
                Account::new(1, 10, Currency::Idrt, dec!(100)),
                Account::new(2, 20, Currency::Idrt, dec!(50)),
            ])
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn lock_pair_reads_both_rows() {
        let ledger = two_accounts().await;
        let mut tx = ledger.begin().await.unwrap();

        let locked = tx.lock_pair(2, 1).await.unwrap();
        assert_eq!(locked.from_amount, Some(dec!(50)));
        assert_eq!(locked.to_amount, Some(dec!(100)));
        assert_eq!(locked.currencies, 1);
        assert_eq!(ledger.stats().locks_acquired(), 2);
    }

    #[tokio::test]
    async fn missing_row_reads_as_none() {
        let ledger = two_accounts().await;
        let mut tx = ledger.begin().await.unwrap();

        let locked = tx.lock_pair(1, 3).await.unwrap();
        assert_eq!(locked.to_amount, None);
        assert_eq!(locked.currencies, 1);
        assert_eq!(tx.debit(3, Amount::from_units(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_publishes_and_drop_restores() {
        let ledger = two_accounts().await;

        let mut tx = ledger.begin().await.unwrap();
        tx.debit(1, Amount::from_units(30)).await.unwrap();
        tx.credit(2, Amount::from_units(30)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(ledger.amount(1).await, Some(dec!(70)));
        assert_eq!(ledger.amount(2).await, Some(dec!(80)));

        let mut tx = ledger.begin().await.unwrap();
        tx.debit(1, Amount::from_units(70)).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(ledger.amount(1).await, Some(dec!(70)));
        assert_eq!(ledger.stats().commits(), 1);
        assert_eq!(ledger.stats().rollbacks(), 1);
    }

    #[tokio::test]
    async fn locked_row_blocks_other_transactions() {
        let ledger = two_accounts().await;
        let mut holder = ledger.begin().await.unwrap();
        holder.lock_pair(1, 2).await.unwrap();

        let mut other = ledger.begin().await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(30), other.lock_pair(2, 1)).await;
        assert!(blocked.is_err());

        holder.commit().await.unwrap();
        let locked = tokio::time::timeout(Duration::from_secs(1), other.lock_pair(2, 1))
            .await
            .expect("released on commit")
            .unwrap();
        assert_eq!(locked.from_amount, Some(dec!(50)));
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let ledger = MemoryLedger::new(&PoolConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(20),
        });
        let held = ledger.begin().await.unwrap();

        let err = ledger.begin().await.err().expect("pool exhausted");
        assert!(matches!(err, TransferError::ResourceUnavailable(_)));

        drop(held);
        assert!(ledger.begin().await.is_ok());
    }

    #[tokio::test]
    async fn eligibility_filters_currency_and_threshold() {
        let ledger = two_accounts().await;
        ledger
            .seed(&[Account::new(3, 30, Currency::Usdt, dec!(1000))])
            .await
            .unwrap();

        let ids = ledger
            .eligible_accounts(Currency::Idrt, dec!(50))
            .await
            .unwrap();
        assert_eq!(ids, vec![1]);
        assert_eq!(
            ledger.currency_total(Currency::Idrt).await.unwrap(),
            dec!(150)
        );
        assert_eq!(ledger.balances(Currency::Usdt).await.unwrap().len(), 1);
    }
}
