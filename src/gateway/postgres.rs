//! PostgreSQL gateway.
//!
//! Every statement is parameterized. The pair lock is a single
//! `SELECT ... FOR UPDATE` over both ids, so Postgres takes both row locks
//! as part of one statement and concurrent transfers over the same pair in
//! opposite directions cannot deadlock on acquisition order.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};

use crate::config::PoolConfig;
use crate::domain::{
    Account, AccountId, Amount, Currency, Ledger, LedgerTx, LockedPair, TransferError,
};

const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS test";

const CREATE_ACCOUNTS: &str = r#"
    CREATE TABLE IF NOT EXISTS test.accounts (
        id       BIGINT PRIMARY KEY,
        user_id  BIGINT NOT NULL,
        currency TEXT NOT NULL,
        amount   NUMERIC NOT NULL
    )
"#;

const LOCK_PAIR: &str = r#"
    SELECT max(CASE WHEN id = $1 THEN amount END) AS amount_from,
           max(CASE WHEN id = $2 THEN amount END) AS amount_to,
           count(DISTINCT currency)               AS currencies
      FROM (SELECT id, amount, currency
              FROM test.accounts
             WHERE id IN ($1, $2)
               FOR UPDATE) locked
"#;

const DEBIT: &str = "UPDATE test.accounts SET amount = amount - $1 WHERE id = $2";

const CREDIT: &str = "UPDATE test.accounts SET amount = amount + $1 WHERE id = $2";

const UPSERT_ACCOUNT: &str = r#"
    INSERT INTO test.accounts (id, user_id, currency, amount)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (id) DO UPDATE
       SET user_id = EXCLUDED.user_id,
           currency = EXCLUDED.currency,
           amount = EXCLUDED.amount
"#;

/// Ledger backed by a `PgPool`.
///
/// The pool is the backpressure point: `begin` waits for a free connection
/// for at most the configured acquire timeout.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgLedger {
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, TransferError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Server-side bound on row lock waits, applied to every transaction.
    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub async fn ensure_schema(&self) -> Result<(), TransferError> {
        sqlx::query(CREATE_SCHEMA).execute(&self.pool).await?;
        sqlx::query(CREATE_ACCOUNTS).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), TransferError> {
        sqlx::query("TRUNCATE test.accounts")
            .execute(&self.pool)
            .await?;
        tracing::info!("accounts table truncated");
        Ok(())
    }
}

#[async_trait]
impl Ledger for PgLedger {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx, TransferError> {
        let mut tx = self.pool.begin().await?;
        let backend_pid = sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()")
            .fetch_one(&mut *tx)
            .await?;
        if let Some(limit) = self.lock_timeout {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", limit.as_millis()))
                .execute(&mut *tx)
                .await?;
        }
        Ok(PgLedgerTx {
            tx,
            pool: self.pool.clone(),
            backend_pid,
        })
    }

    async fn currency_total(&self, currency: Currency) -> Result<Decimal, TransferError> {
        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT coalesce(sum(amount), 0) FROM test.accounts WHERE currency = $1",
        )
        .bind(currency.code())
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn eligible_accounts(
        &self,
        currency: Currency,
        min_amount: Decimal,
    ) -> Result<Vec<AccountId>, TransferError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM test.accounts WHERE currency = $1 AND amount > $2 ORDER BY id",
        )
        .bind(currency.code())
        .bind(min_amount)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn balances(&self, currency: Currency) -> Result<Vec<Account>, TransferError> {
        let rows = sqlx::query(
            "SELECT id, user_id, amount FROM test.accounts WHERE currency = $1 ORDER BY id",
        )
        .bind(currency.code())
        .fetch_all(&self.pool)
        .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(Account::new(
                row.try_get("id")?,
                row.try_get("user_id")?,
                currency,
                row.try_get("amount")?,
            ));
        }
        Ok(accounts)
    }

    async fn seed(&self, accounts: &[Account]) -> Result<u64, TransferError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for account in accounts {
            written += sqlx::query(UPSERT_ACCOUNT)
                .bind(account.id)
                .bind(account.user_id)
                .bind(account.currency.code())
                .bind(account.amount)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        tracing::info!(accounts = written, "accounts seeded");
        Ok(written)
    }
}

/// Transaction on a pooled connection. Dropping it without `commit` rolls
/// back and returns the connection to the pool.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
    // Used to cancel an abandoned lock wait from another connection.
    pool: PgPool,
    backend_pid: i32,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_pair(
        &mut self,
        from: AccountId,
        to: AccountId,
    ) -> Result<LockedPair, TransferError> {
        let row = sqlx::query(LOCK_PAIR)
            .bind(from)
            .bind(to)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(LockedPair {
            from_amount: row.try_get("amount_from")?,
            to_amount: row.try_get("amount_to")?,
            currencies: row.try_get("currencies")?,
        })
    }

    /// Dropping the `lock_pair` future leaves the statement queued behind the
    /// row lock on the server, so the backend is asked to cancel it.
    async fn cancel_lock_wait(&mut self) -> Result<(), TransferError> {
        let cancelled = sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
            .bind(self.backend_pid)
            .fetch_one(&self.pool)
            .await?;
        tracing::debug!(backend_pid = self.backend_pid, cancelled, "lock wait cancelled");
        Ok(())
    }

    async fn debit(&mut self, account: AccountId, amount: Amount) -> Result<u64, TransferError> {
        let result = sqlx::query(DEBIT)
            .bind(amount.as_decimal())
            .bind(account)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn credit(&mut self, account: AccountId, amount: Amount) -> Result<u64, TransferError> {
        let result = sqlx::query(CREDIT)
            .bind(amount.as_decimal())
            .bind(account)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self) -> Result<(), TransferError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), TransferError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
