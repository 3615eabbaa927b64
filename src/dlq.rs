use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::{DeadLetterQueue, Error};

/// Logs rejected input rows and counts them.
#[derive(Default, Debug)]
pub struct LogDLQ {
    reported: AtomicU64,
}

impl LogDLQ {
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }
}

impl DeadLetterQueue for LogDLQ {
    fn report(&self, error: &Error) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%error, "DLQ report");
    }
}
