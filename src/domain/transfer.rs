use rust_decimal::Decimal;

use crate::domain::{AccountId, Amount, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
}

impl TransferRequest {
    pub fn new(from: AccountId, to: AccountId, amount: Amount) -> Self {
        Self { from, to, amount }
    }

    /// Checks that need no I/O.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.from == self.to {
            return Err(TransferError::InvalidRequest(format!(
                "can't transfer account {} to itself",
                self.from
            )));
        }
        Ok(())
    }
}

impl core::fmt::Display for TransferRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "from={},to={},amount={}", self.from, self.to, self.amount)
    }
}

/// Progress of a single transfer through the locking protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransferState {
    Start,
    Validated,
    Locked,
    Checked,
    Debited,
    Credited,
    Done,
}

impl TransferState {
    pub fn next(self) -> Option<TransferState> {
        match self {
            TransferState::Start => Some(TransferState::Validated),
            TransferState::Validated => Some(TransferState::Locked),
            TransferState::Locked => Some(TransferState::Checked),
            TransferState::Checked => Some(TransferState::Debited),
            TransferState::Debited => Some(TransferState::Credited),
            TransferState::Credited => Some(TransferState::Done),
            TransferState::Done => None,
        }
    }
}

/// Result of the combined lock-and-read over both rows of a transfer.
///
/// Amounts are `None` when the row does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedPair {
    pub from_amount: Option<Decimal>,
    pub to_amount: Option<Decimal>,
    pub currencies: i64,
}

/// Balances after a successful transfer, derived from the locked pre-image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub from_balance: Decimal,
    pub to_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_transfer_is_invalid() {
        let req = TransferRequest::new(3, 3, Amount::from_units(1));
        assert!(matches!(
            req.validate(),
            Err(TransferError::InvalidRequest(_))
        ));
        assert!(TransferRequest::new(3, 4, Amount::ZERO).validate().is_ok());
    }

    #[test]
    fn states_advance_in_order() {
        let mut state = TransferState::Start;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state);
            state = next;
            seen.push(state);
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(state, TransferState::Done);
    }
}
