//! SQLite storage layer.
//!
//! Store implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod ledger;
pub mod pool;
pub mod run;
pub mod template;
