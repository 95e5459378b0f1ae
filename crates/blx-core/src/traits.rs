//! Capability traits: the seams between the core and its collaborators.
//!
//! Stores are opaque persistent tables with atomic conditional updates;
//! channel senders are thin delivery capabilities. Implementations live
//! in `blx-store` and `blx-channels`; tests substitute mocks.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AuditLogEntry, Booking, BookingStatus, DeliveryStatus, DomainEvent, Driver, Notification,
    Payment, VehicleRates, VehicleType,
};

// ─── Stores ───────────────────────────────────────────────

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: &Booking) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Booking>>;

    /// Conditional status update keyed on the previously-read status.
    /// Returns `false` when the row no longer matches `from` (lost race).
    async fn transition_status(
        &self,
        id: &str,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<bool>;

    /// Store the driver reference and move the booking to `assigned` in
    /// one update. `false` when the booking is missing or terminal.
    async fn assign_driver(&self, id: &str, driver_id: &str) -> Result<bool>;

    /// Idempotent payment application: sets payment_state=paid and
    /// status=confirmed only when the booking is not already paid.
    /// Returns `false` on replay (already paid), leaving the row as-is.
    async fn mark_paid(&self, id: &str) -> Result<bool>;

    async fn recent(&self, limit: u32) -> Result<Vec<Booking>>;

    async fn by_status(&self, status: BookingStatus) -> Result<Vec<Booking>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: &Payment) -> Result<()>;

    async fn get_by_transaction(&self, gateway_transaction_id: &str) -> Result<Option<Payment>>;

    /// Whether any payment for this booking has reached `completed`.
    async fn has_completed(&self, booking_id: &str) -> Result<bool>;

    /// Move a pending payment to `completed`. `false` when no pending
    /// payment matches the transaction id (replay or unknown).
    async fn complete_by_transaction(&self, gateway_transaction_id: &str) -> Result<bool>;

    /// Move a pending payment to `failed`.
    async fn fail_by_transaction(&self, gateway_transaction_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait DriverStore: Send + Sync {
    async fn insert(&self, driver: &Driver) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Driver>>;

    /// Next value for the sequential DRV reference.
    async fn next_sequence(&self) -> Result<u32>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// At-most-once insert keyed on `event_key`. Returns `false` when an
    /// entry for the same event already exists; nothing is written.
    async fn insert_unique(&self, notification: &Notification) -> Result<bool>;

    async fn get(&self, id: &str) -> Result<Option<Notification>>;

    async fn get_by_event_key(&self, event_key: &str) -> Result<Option<Notification>>;

    /// Record one delivery attempt's channel outcomes in a single atomic
    /// update. Channel flags only ever go from unsent to sent.
    async fn apply_attempt(
        &self,
        id: &str,
        email_sent: bool,
        sms_sent: bool,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Conditional retry claim: increments retry_count and flips the
    /// entry to `pending`, but only while it is `failed` and under the
    /// cap. `false` means another cycle owns this attempt.
    async fn claim_for_retry(&self, id: &str) -> Result<bool>;

    /// Entries eligible for another retry cycle.
    async fn pending_retry(&self) -> Result<Vec<Notification>>;

    /// Entries that exhausted their retries; operator-facing.
    async fn failed_permanently(&self) -> Result<Vec<Notification>>;

    async fn recent(&self, limit: u32) -> Result<Vec<Notification>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()>;

    async fn recent(&self, limit: u32) -> Result<Vec<AuditLogEntry>>;
}

#[async_trait]
pub trait VehicleRateStore: Send + Sync {
    /// Rate card of an available vehicle of this type, if any.
    async fn available_rates(&self, vehicle_type: VehicleType) -> Result<Option<VehicleRates>>;

    async fn upsert_rates(&self, rates: &VehicleRates) -> Result<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

// ─── Delivery channels ────────────────────────────────────

/// Outbound email capability. A failed send is an `Err` value the
/// dispatcher records on the ledger; implementations never panic on
/// provider errors.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// Outbound text-message capability (WhatsApp relay).
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, phone: &str, text: &str) -> Result<()>;
}

// ─── Events ───────────────────────────────────────────────

/// Consumer of domain events raised by successful state transitions.
/// Publishing is best-effort from the producer's point of view; delivery
/// tracking lives in the notification ledger, not here.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: DomainEvent);
}

// ─── Pricing ──────────────────────────────────────────────

/// External pricing collaborator. Infallible by contract: missing
/// catalog/settings tiers degrade to hardcoded defaults.
#[async_trait]
pub trait PricingProvider: Send + Sync {
    /// Price in cents for a trip, floored at the vehicle's minimum charge.
    async fn price_for(
        &self,
        vehicle_type: VehicleType,
        duration_minutes: u32,
        is_airport_transfer: bool,
    ) -> i64;

    /// Minimum charge in cents for the vehicle type.
    async fn minimum_charge(&self, vehicle_type: VehicleType) -> i64;
}
