//! # BLX Store
//!
//! SQLite-backed implementations of the persistence traits in
//! `blx_core::traits`. One database file holds all tables; every
//! mutation that races with another component is a single conditional
//! UPDATE keyed by row id, so no read-then-write is trusted anywhere.

pub mod sqlite;

pub use sqlite::SqliteStore;
