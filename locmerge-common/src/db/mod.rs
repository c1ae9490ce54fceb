//! SQLite keyspace initialization

pub mod init;

pub use init::*;
