use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::config::{Budget, HarnessConfig};
use crate::domain::{
    AccountId, Amount, Currency, Error, Ledger, LedgerTx, TransferError, TransferRequest,
};
use crate::engine::TransferEngine;
use crate::shutdown::ShutdownSignal;

/// Random transfers over a fixed account set.
#[derive(Debug, Clone)]
pub struct Workload {
    accounts: Vec<AccountId>,
    max_amount: u64,
}

impl Workload {
    pub fn new(mut accounts: Vec<AccountId>, max_amount: u64) -> Result<Self, Error> {
        accounts.sort_unstable();
        accounts.dedup();
        if accounts.len() < 2 {
            return Err(Error::Config(format!(
                "need at least two eligible accounts, found {}",
                accounts.len()
            )));
        }
        Ok(Self {
            accounts,
            max_amount,
        })
    }

    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }

    /// Two distinct accounts and a whole amount in `[0, max_amount]`.
    pub fn next_request<R: Rng>(&self, rng: &mut R) -> TransferRequest {
        let n = self.accounts.len();
        let from = rng.gen_range(0..n);
        let mut to = rng.gen_range(0..n - 1);
        if to >= from {
            to += 1;
        }
        let amount = Amount::from_units(rng.gen_range(0..=self.max_amount));
        TransferRequest::new(self.accounts[from], self.accounts[to], amount)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rejections {
    pub invalid_request: u64,
    pub account_not_found: u64,
    pub currency_mismatch: u64,
    pub insufficient_balance: u64,
    pub resource_unavailable: u64,
}

impl Rejections {
    pub fn total(&self) -> u64 {
        self.invalid_request
            + self.account_not_found
            + self.currency_mismatch
            + self.insufficient_balance
            + self.resource_unavailable
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub currency: Currency,
    pub workers: usize,
    pub accounts: usize,
    pub attempted: u64,
    pub committed: u64,
    pub rejections: Rejections,
    pub total_before: Decimal,
    pub total_after: Decimal,
    pub elapsed: Duration,
}

impl RunReport {
    /// Attempts per second across all tasks.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.attempted as f64 / secs
    }
}

#[derive(Debug, Default)]
struct Counters {
    attempted: AtomicU64,
    committed: AtomicU64,
    invalid_request: AtomicU64,
    account_not_found: AtomicU64,
    currency_mismatch: AtomicU64,
    insufficient_balance: AtomicU64,
    resource_unavailable: AtomicU64,
}

impl Counters {
    fn rejections(&self) -> Rejections {
        Rejections {
            invalid_request: self.invalid_request.load(Ordering::Relaxed),
            account_not_found: self.account_not_found.load(Ordering::Relaxed),
            currency_mismatch: self.currency_mismatch.load(Ordering::Relaxed),
            insufficient_balance: self.insufficient_balance.load(Ordering::Relaxed),
            resource_unavailable: self.resource_unavailable.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stop {
    Never,
    After(u64),
    At(Instant),
}

/// Everything one task needs to issue transfers.
struct Driver<L: Ledger> {
    ledger: Arc<L>,
    engine: TransferEngine,
    workload: Arc<Workload>,
    counters: Arc<Counters>,
    shutdown: Arc<ShutdownSignal>,
}

impl<L: Ledger> Clone for Driver<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            engine: self.engine.clone(),
            workload: Arc::clone(&self.workload),
            counters: Arc::clone(&self.counters),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<L: Ledger> Driver<L> {
    /// Issues transfers until shutdown or `stop`. Shutdown is only checked
    /// between transfers.
    async fn run_loop(self, mut rng: StdRng, stop: Stop) -> Result<u64, TransferError> {
        let mut issued = 0;
        while !self.shutdown.is_shutdown_requested() {
            match stop {
                Stop::After(limit) if issued >= limit => break,
                Stop::At(deadline) if Instant::now() >= deadline => break,
                _ => {}
            }

            let request = self.workload.next_request(&mut rng);
            if let Err(e) = self.attempt(&request).await {
                self.shutdown.request_shutdown();
                return Err(e);
            }
            issued += 1;
        }
        Ok(issued)
    }

    /// One transfer in its own transaction. Only fatal errors are returned.
    async fn attempt(&self, request: &TransferRequest) -> Result<(), TransferError> {
        self.counters.attempted.fetch_add(1, Ordering::Relaxed);

        let mut tx = match self.ledger.begin().await {
            Ok(tx) => tx,
            Err(e) => return self.record_failure(request, e),
        };

        match self.engine.transfer(&mut tx, request).await {
            Ok(_) => match tx.commit().await {
                Ok(()) => {
                    self.counters.committed.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(e) => self.record_failure(request, e),
            },
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(%request, error = %rollback, "rollback failed");
                    if rollback.is_fatal() {
                        return Err(rollback);
                    }
                }
                self.record_failure(request, e)
            }
        }
    }

    fn record_failure(
        &self,
        request: &TransferRequest,
        error: TransferError,
    ) -> Result<(), TransferError> {
        let counter = match &error {
            TransferError::InvalidRequest(_) => &self.counters.invalid_request,
            TransferError::AccountNotFound(_) => &self.counters.account_not_found,
            TransferError::CurrencyMismatch => &self.counters.currency_mismatch,
            TransferError::InsufficientBalance { .. } => &self.counters.insufficient_balance,
            TransferError::ResourceUnavailable(_) => &self.counters.resource_unavailable,
            TransferError::Integrity(_) | TransferError::Database(_) => {
                tracing::error!(%request, %error, code = error.code(), "transfer failed fatally");
                return Err(error);
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%request, code = error.code(), "transfer rejected");
        Ok(())
    }
}

/// Drives concurrent transfers and checks that they conserve value.
///
/// A harness can be run repeatedly. Each run stops its tasks through a
/// signal of its own; the external signal only forwards into it.
pub struct Harness<L: Ledger> {
    ledger: Arc<L>,
    shutdown: Arc<ShutdownSignal>,
    config: HarnessConfig,
}

impl<L: Ledger> Harness<L> {
    pub fn new(ledger: Arc<L>, config: HarnessConfig) -> Self {
        Self {
            ledger,
            shutdown: Arc::new(ShutdownSignal::new()),
            config,
        }
    }

    /// Signal that stops the current and every later run; workers finish
    /// their current transfer first.
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    pub async fn run(&self) -> Result<RunReport, Error> {
        self.config.validate()?;
        let currency = self.config.currency;

        let total_before = self.ledger.currency_total(currency).await?;
        let accounts = match &self.config.accounts {
            Some(ids) => ids.clone(),
            None => {
                self.ledger
                    .eligible_accounts(currency, self.config.min_balance)
                    .await?
            }
        };
        let workload = Arc::new(Workload::new(accounts, self.config.max_amount)?);

        tracing::info!(
            %currency,
            workers = self.config.workers,
            accounts = workload.accounts().len(),
            %total_before,
            "starting transfer run"
        );

        let stop_run = Arc::new(ShutdownSignal::new());
        let forwarder = {
            let external = Arc::clone(&self.shutdown);
            let stop_run = Arc::clone(&stop_run);
            tokio::spawn(async move {
                tokio::select! {
                    _ = external.cancelled() => stop_run.request_shutdown(),
                    _ = stop_run.cancelled() => {}
                }
            })
        };

        let counters = Arc::new(Counters::default());
        let driver = Driver {
            ledger: Arc::clone(&self.ledger),
            engine: TransferEngine::new(Arc::clone(&stop_run))
                .with_lock_timeout(self.config.lock_timeout),
            workload: Arc::clone(&workload),
            counters: Arc::clone(&counters),
            shutdown: Arc::clone(&stop_run),
        };

        let started = Instant::now();
        let handles: Vec<_> = (0..self.config.workers)
            .map(|worker| {
                let driver = driver.clone();
                let rng = self.rng(worker as u64 + 1);
                tokio::spawn(async move { driver.run_loop(rng, Stop::Never).await })
            })
            .collect();

        let stop = match self.config.budget {
            Budget::Transfers(n) => Stop::After(n),
            Budget::Duration(d) => Stop::At(started + d),
        };
        let foreground = driver.run_loop(self.rng(0), stop).await;
        stop_run.request_shutdown();
        if let Err(e) = forwarder.await {
            tracing::warn!(error = %e, "shutdown forwarder failed");
        }

        let mut fatal: Option<Error> = foreground.err().map(Error::from);
        for (worker, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(issued)) => tracing::debug!(worker, issued, "worker stopped"),
                Ok(Err(e)) => {
                    fatal.get_or_insert(Error::from(e));
                }
                Err(e) => {
                    fatal.get_or_insert(Error::Worker(format!("worker {}: {}", worker, e)));
                }
            }
        }
        let elapsed = started.elapsed();

        if let Some(e) = fatal {
            return Err(e);
        }

        let total_after = self.ledger.currency_total(currency).await?;
        if total_before != total_after {
            tracing::error!(%currency, %total_before, %total_after, "conservation violated");
            return Err(Error::ConservationViolated {
                currency,
                before: total_before,
                after: total_after,
            });
        }

        let report = RunReport {
            currency,
            workers: self.config.workers,
            accounts: workload.accounts().len(),
            attempted: counters.attempted.load(Ordering::Relaxed),
            committed: counters.committed.load(Ordering::Relaxed),
            rejections: counters.rejections(),
            total_before,
            total_after,
            elapsed,
        };
        tracing::info!(
            attempted = report.attempted,
            committed = report.committed,
            rejected = report.rejections.total(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            throughput = report.throughput(),
            "transfer run finished"
        );
        Ok(report)
    }

    fn rng(&self, stream: u64) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        }
    }
}
