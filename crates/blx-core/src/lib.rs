//! # BLX Core
//!
//! Shared foundation for the BLX transportation booking backend:
//! domain types, configuration, the error taxonomy, reference-code
//! generation, and the capability traits the other crates implement
//! (stores, delivery channels, pricing).

pub mod config;
pub mod error;
pub mod ids;
pub mod traits;
pub mod types;

pub use config::BlxConfig;
pub use error::{BlxError, Result};
