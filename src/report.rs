use std::io::Write;

use crate::domain::{Account, Error, ReportSink};
use crate::harness::RunReport;

const RUN_HEADER: [&str; 14] = [
    "currency",
    "workers",
    "accounts",
    "attempted",
    "committed",
    "invalid_request",
    "account_not_found",
    "currency_mismatch",
    "insufficient_balance",
    "resource_unavailable",
    "total_before",
    "total_after",
    "elapsed_ms",
    "throughput",
];

const BALANCE_HEADER: [&str; 4] = ["account", "user_id", "currency", "amount"];

/// Writes run summaries and balances as CSV sections.
pub struct CsvReport<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvReport<W> {
    pub fn new(out: W) -> Self {
        let writer = csv::WriterBuilder::new().flexible(true).from_writer(out);
        Self { writer }
    }

    pub fn into_inner(self) -> Result<W, Error> {
        self.writer
            .into_inner()
            .map_err(|e| Error::IO(e.into_error()))
    }
}

impl CsvReport<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ReportSink for CsvReport<W> {
    fn write_run(&mut self, report: &RunReport) -> Result<(), Error> {
        let r = &report.rejections;
        self.writer.write_record(RUN_HEADER)?;
        self.writer.write_record([
            report.currency.to_string(),
            report.workers.to_string(),
            report.accounts.to_string(),
            report.attempted.to_string(),
            report.committed.to_string(),
            r.invalid_request.to_string(),
            r.account_not_found.to_string(),
            r.currency_mismatch.to_string(),
            r.insufficient_balance.to_string(),
            r.resource_unavailable.to_string(),
            report.total_before.to_string(),
            report.total_after.to_string(),
            report.elapsed.as_millis().to_string(),
            format!("{:.1}", report.throughput()),
        ])?;
        self.writer.flush()?;
        Ok(())
    }

    fn write_balances(&mut self, accounts: &[Account]) -> Result<(), Error> {
        self.writer.write_record(BALANCE_HEADER)?;
        for account in accounts {
            self.writer.write_record([
                account.id.to_string(),
                account.user_id.to_string(),
                account.currency.to_string(),
                account.amount.to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use crate::harness::Rejections;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[test]
    fn writes_summary_then_balances() {
        let report = RunReport {
            currency: Currency::Idrt,
            workers: 8,
            accounts: 2,
            attempted: 1000,
            committed: 990,
            rejections: Rejections {
                insufficient_balance: 10,
                ..Rejections::default()
            },
            total_before: dec!(150),
            total_after: dec!(150),
            elapsed: Duration::from_millis(500),
        };
        let mut sink = CsvReport::new(Vec::new());
        sink.write_run(&report).unwrap();
        sink.write_balances(&[Account::new(1, 1, Currency::Idrt, dec!(100.5))])
            .unwrap();

        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], RUN_HEADER.join(","));
        assert_eq!(lines[1], "IDRT,8,2,1000,990,0,0,0,10,0,150,150,500,2000.0");
        assert_eq!(lines[2], "account,user_id,currency,amount");
        assert_eq!(lines[3], "1,1,IDRT,100.5");
    }
}
