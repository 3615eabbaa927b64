pub mod account;
pub mod error;
pub mod money;
pub mod traits;
pub mod transfer;

pub use account::{Account, AccountId, Currency};
pub use error::{Error, TransferError};
pub use money::Amount;
pub use traits::{AccountStream, DeadLetterQueue, Ledger, LedgerTx, ReportSink};
pub use transfer::{LockedPair, TransferReceipt, TransferRequest, TransferState};
