//! Benchmark harness for a lock-based balance transfer.
//!
//! [`engine::TransferEngine`] moves value between two accounts of one
//! currency under pessimistic row locks; [`harness::Harness`] hammers it from
//! many tasks and checks that the currency total is unchanged afterwards.

pub mod config;
pub mod dlq;
pub mod domain;
pub mod engine;
pub mod gateway;
pub mod harness;
pub mod ingestion;
pub mod logging;
pub mod report;
pub mod shutdown;
