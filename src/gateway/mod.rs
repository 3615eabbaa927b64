//! Data-access gateways implementing [`Ledger`](crate::domain::Ledger).

pub mod memory;
pub mod postgres;

pub use memory::{LedgerStats, MemoryLedger, MemoryTx};
pub use postgres::{PgLedger, PgLedgerTx};
