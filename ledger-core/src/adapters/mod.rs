//! Adapters - concrete implementations of storage and external capabilities

pub mod duckdb;
pub mod rates;
