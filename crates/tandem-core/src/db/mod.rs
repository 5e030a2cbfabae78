//! Database layer for Tandem

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::LibSqlStore;
