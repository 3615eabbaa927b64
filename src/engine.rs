use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    AccountId, LedgerTx, LockedPair, TransferError, TransferReceipt, TransferRequest, TransferState,
};
use crate::shutdown::ShutdownSignal;

/// Moves value between two accounts under pessimistic row locks.
///
/// The engine never commits or rolls back; the caller owns the transaction.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    shutdown: Arc<ShutdownSignal>,
    lock_timeout: Option<Duration>,
}

impl TransferEngine {
    pub fn new(shutdown: Arc<ShutdownSignal>) -> Self {
        Self {
            shutdown,
            lock_timeout: None,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub async fn transfer<T>(
        &self,
        tx: &mut T,
        request: &TransferRequest,
    ) -> Result<TransferReceipt, TransferError>
    where
        T: LedgerTx,
    {
        let mut state = TransferState::Start;

        request.validate()?;
        state = advance(state, request);

        let locked = self.lock_pair(tx, request).await?;
        state = advance(state, request);

        let (from_amount, to_amount) = check(&locked, request)?;
        state = advance(state, request);

        let amount = request.amount;
        let affected = tx.debit(request.from, amount).await?;
        if affected != 1 {
            return Err(integrity_violation("debit", request.from, affected));
        }
        state = advance(state, request);

        let affected = tx.credit(request.to, amount).await?;
        if affected != 1 {
            return Err(integrity_violation("credit", request.to, affected));
        }
        state = advance(state, request);

        advance(state, request);
        Ok(TransferReceipt {
            from_balance: from_amount - amount.as_decimal(),
            to_balance: to_amount + amount.as_decimal(),
        })
    }

    /// The only wait on contention. Abandoned when shutdown is requested or
    /// the lock timeout elapses; both surface as `ResourceUnavailable` and
    /// the gateway is told to stop waiting.
    async fn lock_pair<T>(
        &self,
        tx: &mut T,
        request: &TransferRequest,
    ) -> Result<LockedPair, TransferError>
    where
        T: LedgerTx,
    {
        let abandoned = {
            let wait = tx.lock_pair(request.from, request.to);
            let deadline = async {
                match self.lock_timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                res = wait => return res,
                _ = deadline => TransferError::ResourceUnavailable(format!(
                    "lock wait exceeded {}ms",
                    self.lock_timeout.unwrap_or_default().as_millis()
                )),
                _ = self.shutdown.cancelled() => TransferError::ResourceUnavailable(
                    "lock wait abandoned: shutdown requested".to_string(),
                ),
            }
        };

        tracing::debug!(%request, error = %abandoned, "lock wait abandoned");
        if let Err(e) = tx.cancel_lock_wait().await {
            tracing::warn!(%request, error = %e, "failed to cancel lock wait");
        }
        Err(abandoned)
    }
}

fn advance(state: TransferState, request: &TransferRequest) -> TransferState {
    let next = state.next().unwrap_or(state);
    tracing::trace!(%request, ?next, "transfer state");
    next
}

/// Business rules, all evaluated before any row is written.
fn check(
    locked: &LockedPair,
    request: &TransferRequest,
) -> Result<(rust_decimal::Decimal, rust_decimal::Decimal), TransferError> {
    let (from_amount, to_amount) = match (locked.from_amount, locked.to_amount) {
        (Some(from), Some(to)) => (from, to),
        (None, _) => return Err(TransferError::AccountNotFound(request.from)),
        (_, None) => return Err(TransferError::AccountNotFound(request.to)),
    };

    if locked.currencies != 1 {
        return Err(TransferError::CurrencyMismatch);
    }

    if from_amount < request.amount.as_decimal() {
        return Err(TransferError::InsufficientBalance {
            account: request.from,
            available: from_amount,
            requested: request.amount.as_decimal(),
        });
    }

    Ok((from_amount, to_amount))
}

fn integrity_violation(step: &str, account: AccountId, affected: u64) -> TransferError {
    tracing::error!(step, account, affected, "mutation did not affect exactly one row");
    TransferError::Integrity(format!(
        "{} of account {} affected {} rows",
        step, account, affected
    ))
}
