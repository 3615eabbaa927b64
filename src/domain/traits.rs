use async_trait::async_trait;
use futures::Stream;
use rust_decimal::Decimal;

use crate::domain::{Account, AccountId, Amount, Currency, Error, LockedPair, TransferError};

/// A unit of work on the ledger, owned by exactly one task.
///
/// Dropping a transaction without calling `commit` rolls it back and
/// releases every row lock it holds.
#[async_trait]
pub trait LedgerTx: Send {
    /// Takes exclusive row locks on both accounts as one step and reads their
    /// amounts plus the number of distinct currencies among the rows found.
    ///
    /// Blocks while another transaction holds either row.
    async fn lock_pair(&mut self, from: AccountId, to: AccountId)
    -> Result<LockedPair, TransferError>;

    /// Called after a `lock_pair` future was dropped before it finished.
    /// Stores that keep waiting server-side must abort the wait here so the
    /// transaction can be rolled back without waiting for the lock holder.
    async fn cancel_lock_wait(&mut self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Subtracts `amount` from the account. Returns the number of rows affected.
    async fn debit(&mut self, account: AccountId, amount: Amount) -> Result<u64, TransferError>;

    /// Adds `amount` to the account. Returns the number of rows affected.
    async fn credit(&mut self, account: AccountId, amount: Amount) -> Result<u64, TransferError>;

    async fn commit(self) -> Result<(), TransferError>;

    async fn rollback(self) -> Result<(), TransferError>;
}

/// Data-access gateway the harness drives.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    type Tx: LedgerTx + 'static;

    /// Opens a transaction on a pooled connection. Blocks while the pool is
    /// exhausted, up to the configured acquire timeout.
    async fn begin(&self) -> Result<Self::Tx, TransferError>;

    async fn currency_total(&self, currency: Currency) -> Result<Decimal, TransferError>;

    /// Ids of accounts in `currency` holding strictly more than `min_amount`,
    /// ascending.
    async fn eligible_accounts(
        &self,
        currency: Currency,
        min_amount: Decimal,
    ) -> Result<Vec<AccountId>, TransferError>;

    async fn balances(&self, currency: Currency) -> Result<Vec<Account>, TransferError>;

    /// Inserts or replaces accounts. Returns how many were written.
    async fn seed(&self, accounts: &[Account]) -> Result<u64, TransferError>;
}

pub trait AccountStream {
    type Accounts: Stream<Item = Result<Account, Error>> + Send + Unpin + 'static;
    fn stream(&mut self) -> Self::Accounts;
}

pub trait DeadLetterQueue {
    fn report(&self, error: &Error);
}

pub trait ReportSink {
    fn write_run(&mut self, report: &crate::harness::RunReport) -> Result<(), Error>;
    fn write_balances(&mut self, accounts: &[Account]) -> Result<(), Error>;
}
