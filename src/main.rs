use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

use lockbench::config::{Budget, DEFAULT_MAX_AMOUNT, DEFAULT_WORKERS, HarnessConfig, PoolConfig};
use lockbench::dlq::LogDLQ;
use lockbench::domain::account::uniform_accounts;
use lockbench::domain::{Account, AccountId, Amount, Currency, Error, Ledger, ReportSink};
use lockbench::gateway::{MemoryLedger, PgLedger};
use lockbench::harness::Harness;
use lockbench::ingestion::{CsvReader, collect_accounts};
use lockbench::logging::init_logging;
use lockbench::report::CsvReport;

#[derive(Parser, Debug)]
#[command(name = "lockbench", about = "Concurrent locking balance-transfer benchmark")]
struct Cli {
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load accounts from a CSV file (id,user_id,currency,amount) into PostgreSQL.
    Seed {
        #[command(flatten)]
        db: DbArgs,

        #[arg(long)]
        accounts: PathBuf,

        /// Truncate the accounts table first.
        #[arg(long)]
        reset: bool,
    },
    /// Run the transfer benchmark against PostgreSQL.
    Run {
        #[command(flatten)]
        db: DbArgs,

        #[command(flatten)]
        workload: WorkloadArgs,
    },
    /// Run the transfer benchmark against the in-memory ledger.
    Simulate {
        /// Seed accounts from a CSV file.
        #[arg(long, conflicts_with = "generate")]
        accounts: Option<PathBuf>,

        /// Generate this many accounts in the run currency.
        #[arg(long)]
        generate: Option<usize>,

        /// Starting balance of generated accounts.
        #[arg(long, default_value = "1000", value_parser = parse_amount)]
        initial: Amount,

        #[command(flatten)]
        pool: PoolArgs,

        #[command(flatten)]
        workload: WorkloadArgs,
    },
}

#[derive(Args, Debug)]
struct DbArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(flatten)]
    pool: PoolArgs,
}

#[derive(Args, Debug)]
struct PoolArgs {
    /// Connection pool size, at least workers + 1 (the default).
    #[arg(long)]
    pool_size: Option<u32>,

    #[arg(long, default_value_t = 5000)]
    acquire_timeout_ms: u64,
}

#[derive(Args, Debug)]
struct WorkloadArgs {
    #[arg(long, default_value = "IDRT")]
    currency: Currency,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Transfers issued by the foreground driver.
    #[arg(long, default_value_t = 10_000)]
    transfers: u64,

    /// Run for a fixed time instead of a fixed number of transfers.
    #[arg(long)]
    duration_secs: Option<u64>,

    #[arg(long, default_value_t = DEFAULT_MAX_AMOUNT)]
    max_amount: u64,

    /// Only accounts holding more than this take part.
    #[arg(long, default_value = "0")]
    min_balance: Decimal,

    /// Explicit account ids (comma separated); overrides --min-balance.
    #[arg(long = "account", value_delimiter = ',')]
    account_ids: Vec<AccountId>,

    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    /// Seed for the workload generator.
    #[arg(long)]
    seed: Option<u64>,

    /// Print final balances after the run summary.
    #[arg(long)]
    balances: bool,
}

impl WorkloadArgs {
    fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            currency: self.currency,
            workers: self.workers,
            budget: match self.duration_secs {
                Some(secs) => Budget::Duration(Duration::from_secs(secs)),
                None => Budget::Transfers(self.transfers),
            },
            max_amount: self.max_amount,
            min_balance: self.min_balance,
            accounts: (!self.account_ids.is_empty()).then(|| self.account_ids.clone()),
            lock_timeout: self.lock_timeout_ms.map(Duration::from_millis),
            seed: self.seed,
        }
    }
}

impl PoolArgs {
    fn pool_config(&self, workers: usize) -> Result<PoolConfig, Error> {
        let mut config = PoolConfig::for_workers(workers);
        config.acquire_timeout = Duration::from_millis(self.acquire_timeout_ms);
        if let Some(size) = self.pool_size {
            config.max_connections = size;
        }
        config.check_capacity(workers)?;
        Ok(config)
    }
}

fn parse_amount(s: &str) -> Result<Amount, String> {
    Amount::from_decimal_str(s).ok_or_else(|| format!("invalid amount: {}", s))
}

async fn read_accounts(path: &Path) -> anyhow::Result<Vec<Account>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = CsvReader::new(file);
    let dlq = LogDLQ::default();
    let accounts = collect_accounts(&mut reader, &dlq).await;
    if dlq.reported() > 0 {
        tracing::warn!(skipped = dlq.reported(), "some account rows were rejected");
    }
    Ok(accounts)
}

async fn run_harness<L: Ledger>(
    ledger: Arc<L>,
    config: HarnessConfig,
    show_balances: bool,
) -> anyhow::Result<()> {
    let currency = config.currency;
    let harness = Harness::new(Arc::clone(&ledger), config);

    let signal = harness.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping workers");
            signal.request_shutdown();
        }
    });

    let report = harness.run().await?;

    let mut sink = CsvReport::stdout();
    sink.write_run(&report)?;
    if show_balances {
        sink.write_balances(&ledger.balances(currency).await?)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    match cli.command {
        Command::Seed {
            db,
            accounts,
            reset,
        } => {
            let pool = db.pool.pool_config(0)?;
            let ledger = PgLedger::connect(&db.database_url, &pool).await?;
            ledger.ensure_schema().await?;
            if reset {
                ledger.reset().await?;
            }
            let accounts = read_accounts(&accounts).await?;
            let written = ledger.seed(&accounts).await?;
            println!("seeded,{}", written);
        }
        Command::Run { db, workload } => {
            let config = workload.harness_config();
            let pool = db.pool.pool_config(config.workers)?;
            let ledger = PgLedger::connect(&db.database_url, &pool)
                .await?
                .with_lock_timeout(config.lock_timeout);
            ledger.ensure_schema().await?;
            run_harness(Arc::new(ledger), config, workload.balances).await?;
        }
        Command::Simulate {
            accounts,
            generate,
            initial,
            pool,
            workload,
        } => {
            let config = workload.harness_config();
            let ledger = MemoryLedger::new(&pool.pool_config(config.workers)?);
            let seed = match accounts {
                Some(path) => read_accounts(&path).await?,
                None => uniform_accounts(
                    generate.unwrap_or(10),
                    config.currency,
                    initial.as_decimal(),
                ),
            };
            ledger.seed(&seed).await?;
            run_harness(Arc::new(ledger), config, workload.balances).await?;
        }
    }

    Ok(())
}
