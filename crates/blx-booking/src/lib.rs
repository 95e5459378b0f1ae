//! Booking and payment domain logic.
//!
//! The state machine in [`machine`] owns every booking mutation; pricing
//! and audit are collaborators it calls through traits, and gateway
//! webhook verification guards the one entry point that is driven by an
//! external system rather than an authenticated actor.

pub mod audit;
pub mod gateway;
pub mod machine;
pub mod pricing;

pub use audit::AuditRecorder;
pub use gateway::SignatureVerifier;
pub use machine::{BookingRequest, BookingService, DriverRequest};
pub use pricing::TieredPricing;
