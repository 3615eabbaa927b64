use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::Error;

pub type AccountId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum Currency {
    Idrt,
    Usdt,
    Btc,
    Eth,
}

impl Currency {
    pub const ALL: [Currency; 4] = [Currency::Idrt, Currency::Usdt, Currency::Btc, Currency::Eth];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Idrt => "IDRT",
            Currency::Usdt => "USDT",
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
        }
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| Error::Ingestion(format!("Unknown currency: {}", code)))
    }
}

impl TryFrom<String> for Currency {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub user_id: i64,
    pub currency: Currency,
    pub amount: Decimal, // exact, never negative after a committed transfer
}

impl Account {
    pub fn new(id: AccountId, user_id: i64, currency: Currency, amount: Decimal) -> Self {
        Self {
            id,
            user_id,
            currency,
            amount,
        }
    }
}

/// Builds `count` accounts of one currency, ids starting at 1, each owned by
/// a user with the same id.
pub fn uniform_accounts(count: usize, currency: Currency, amount: Decimal) -> Vec<Account> {
    (1..=count as AccountId)
        .map(|id| Account::new(id, id, currency, amount))
        .collect()
}

/// Sum of all balances in `currency`.
pub fn currency_total<'a, I>(accounts: I, currency: Currency) -> Decimal
where
    I: IntoIterator<Item = &'a Account>,
{
    accounts
        .into_iter()
        .filter(|a| a.currency == currency)
        .map(|a| a.amount)
        .sum()
}
