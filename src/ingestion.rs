use std::io::Read;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::domain::traits::{AccountStream, DeadLetterQueue};
use crate::domain::{Account, AccountId, Amount, Currency, Error};

/// Reads account seed rows: `id,user_id,currency,amount`.
pub struct CsvReader<R: Read> {
    reader: Option<csv::Reader<R>>,
}

impl<R: Read> CsvReader<R> {
    pub fn new(reader: R) -> Self {
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        Self { reader: Some(rdr) }
    }
}

/// Internal shape used only for CSV deserialization.
#[derive(Debug, Deserialize)]
struct CsvRow {
    id: AccountId,
    user_id: i64,
    currency: Currency,
    amount: Amount,
}

impl From<CsvRow> for Account {
    fn from(row: CsvRow) -> Self {
        Account::new(row.id, row.user_id, row.currency, row.amount.as_decimal())
    }
}

impl<R: Read + Send + 'static> AccountStream for CsvReader<R> {
    type Accounts = Pin<Box<dyn Stream<Item = Result<Account, Error>> + Send>>;

    fn stream(&mut self) -> Self::Accounts {
        let Some(reader) = self.reader.take() else {
            return Box::pin(stream::empty());
        };

        let iter = reader
            .into_deserialize::<CsvRow>()
            .map(|row_res| match row_res {
                Ok(row) => Ok(Account::from(row)),
                Err(e) => Err(Error::Ingestion(format!(
                    "CSV deserialization error: {}",
                    e
                ))),
            });

        Box::pin(stream::iter(iter))
    }
}

/// Drains `source`, sending bad rows to `dlq`. Later rows win on duplicate ids.
pub async fn collect_accounts<S, D>(source: &mut S, dlq: &D) -> Vec<Account>
where
    S: AccountStream,
    D: DeadLetterQueue,
{
    let mut accounts: Vec<Account> = Vec::new();
    let mut rows = source.stream();
    while let Some(row) = rows.next().await {
        match row {
            Ok(account) => {
                if let Some(existing) = accounts.iter_mut().find(|a| a.id == account.id) {
                    *existing = account;
                } else {
                    accounts.push(account);
                }
            }
            Err(e) => dlq.report(&e),
        }
    }
    accounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::cell::RefCell;

    #[derive(Default)]
    struct CollectingDlq(RefCell<Vec<String>>);

    impl DeadLetterQueue for CollectingDlq {
        fn report(&self, error: &Error) {
            self.0.borrow_mut().push(error.to_string());
        }
    }

    #[tokio::test]
    async fn reads_rows_and_skips_bad_ones() {
        let data = "id, user_id, currency, amount\n\
                    1, 10, IDRT, 100\n\
                    2, 20, idrt, 50.25\n\
                    3, 30, DOGE, 1\n\
                    4, 40, USDT, -5\n\
                    5, 50, BTC\n\
                    1, 10, IDRT, 90\n";
        let mut reader = CsvReader::new(data.as_bytes());
        let dlq = CollectingDlq::default();

        let accounts = collect_accounts(&mut reader, &dlq).await;

        assert_eq!(
            accounts,
            vec![
                Account::new(1, 10, Currency::Idrt, dec!(90)),
                Account::new(2, 20, Currency::Idrt, dec!(50.25)),
            ]
        );
        assert_eq!(dlq.0.borrow().len(), 3);
    }

    #[tokio::test]
    async fn stream_is_single_use() {
        let mut reader = CsvReader::new("id,user_id,currency,amount\n1,1,ETH,2\n".as_bytes());
        assert_eq!(reader.stream().count().await, 1);
        assert_eq!(reader.stream().count().await, 0);
    }
}
