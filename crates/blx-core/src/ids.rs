//! Reference-code generation.
//!
//! Human-readable codes follow fixed prefixes: bookings `BLX`, payments
//! `PAY`, drivers `DRV`. Internal identity is always an opaque UUID; the
//! reference codes exist for customers and operators.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Booking reference: `BLX<YYYYMMDD><6 uppercase alphanumeric>`.
pub fn booking_reference(now: DateTime<Utc>) -> String {
    format!("BLX{}{}", now.format("%Y%m%d"), short_code(6))
}

/// Payment reference: `PAY<YYYYMMDD><6 uppercase alphanumeric>`.
pub fn payment_reference(now: DateTime<Utc>) -> String {
    format!("PAY{}{}", now.format("%Y%m%d"), short_code(6))
}

/// Driver reference: `DRV` + zero-padded sequence number (`DRV007`).
pub fn driver_reference(sequence: u32) -> String {
    format!("DRV{sequence:03}")
}

/// Confirmation code handed to the customer: 8 uppercase alphanumerics.
pub fn confirmation_code() -> String {
    short_code(8)
}

/// Opaque internal id.
pub fn internal_id() -> String {
    Uuid::new_v4().to_string()
}

fn short_code(len: usize) -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(len)
        .collect::<String>()
        .to_uppercase()
}
