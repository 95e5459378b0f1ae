//! Domain types: bookings, payments, the notification ledger, audit
//! entries, and the domain events that connect the state machine to the
//! notification dispatcher.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;

// ─── Vehicles ─────────────────────────────────────────────

/// Fleet vehicle classes offered for booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    ExecutiveSedan,
    LuxurySuv,
    SprinterVan,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::ExecutiveSedan => "executive_sedan",
            VehicleType::LuxurySuv => "luxury_suv",
            VehicleType::SprinterVan => "sprinter_van",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "executive_sedan" => Some(VehicleType::ExecutiveSedan),
            "luxury_suv" => Some(VehicleType::LuxurySuv),
            "sprinter_van" => Some(VehicleType::SprinterVan),
            _ => None,
        }
    }

    /// Customer-facing label ("Executive Sedan").
    pub fn display_name(&self) -> String {
        self.as_str()
            .split('_')
            .map(|w| {
                let mut c = w.chars();
                match c.next() {
                    Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Per-vehicle-type rate card, the preferred pricing source. All amounts
/// are integer cents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleRates {
    pub vehicle_type: VehicleType,
    pub base_rate_cents: i64,
    pub per_hour_rate_cents: i64,
    pub airport_surcharge_cents: i64,
    /// Explicit floor; when absent the floor is 2x the base rate.
    pub minimum_charge_cents: Option<i64>,
    pub available: bool,
}

// ─── Booking ──────────────────────────────────────────────

/// Booking lifecycle. `Cancelled` is reachable from any non-terminal
/// state; payment progress is tracked separately in [`PaymentState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Assigned,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Assigned => "assigned",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "assigned" => Some(BookingStatus::Assigned),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Legal transition graph: pending → assigned → confirmed → completed,
    /// with cancellation allowed from any non-terminal state.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        if *self == next {
            return false;
        }
        match (self, next) {
            (_, BookingStatus::Cancelled) => !self.is_terminal(),
            (BookingStatus::Pending, BookingStatus::Assigned) => true,
            (BookingStatus::Pending, BookingStatus::Confirmed) => true,
            (BookingStatus::Assigned, BookingStatus::Confirmed) => true,
            (BookingStatus::Confirmed, BookingStatus::Completed) => true,
            _ => false,
        }
    }
}

/// Payment progress as seen on the booking row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Paid,
    Failed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Paid => "paid",
            PaymentState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentState::Pending),
            "paid" => Some(PaymentState::Paid),
            "failed" => Some(PaymentState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    /// Opaque internal id (UUID).
    pub id: String,
    /// Human-readable reference (`BLX20260830A1B2C3`).
    pub booking_id: String,
    pub confirmation_code: String,
    pub pickup_address: String,
    pub destination_address: String,
    pub pickup_date: String,
    pub pickup_time: String,
    pub vehicle_type: VehicleType,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub estimated_duration_minutes: u32,
    pub special_requests: String,
    /// Immutable once payment succeeds.
    pub total_amount_cents: i64,
    pub status: BookingStatus,
    pub payment_state: PaymentState,
    pub driver_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Payments ─────────────────────────────────────────────

/// Status of a payment record. Only the gateway-webhook-driven
/// transition moves a payment to `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    /// Human-readable reference (`PAY20260830A1B2C3`).
    pub payment_id: String,
    /// UUID of the owning booking.
    pub booking_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub gateway_transaction_id: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn pending(booking: &Booking, gateway_transaction_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: ids::internal_id(),
            payment_id: ids::payment_reference(now),
            booking_id: booking.id.clone(),
            amount_cents: booking.total_amount_cents,
            currency: "USD".into(),
            gateway_transaction_id: gateway_transaction_id.into(),
            status: PaymentStatus::Pending,
            created_at: now,
            processed_at: None,
        }
    }
}

// ─── Drivers ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: String,
    /// Sequential reference (`DRV007`).
    pub driver_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

impl Driver {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// ─── Notification ledger ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Customer,
    Driver,
    Admin,
}

impl RecipientRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientRole::Customer => "customer",
            RecipientRole::Driver => "driver",
            RecipientRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(RecipientRole::Customer),
            "driver" => Some(RecipientRole::Driver),
            "admin" => Some(RecipientRole::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Welcome,
    BookingConfirmation,
    StatusUpdate,
    PaymentConfirmation,
    DriverAssigned,
    BookingAssigned,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Welcome => "welcome",
            NotificationKind::BookingConfirmation => "booking_confirmation",
            NotificationKind::StatusUpdate => "status_update",
            NotificationKind::PaymentConfirmation => "payment_confirmation",
            NotificationKind::DriverAssigned => "driver_assigned",
            NotificationKind::BookingAssigned => "booking_assigned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "welcome" => Some(NotificationKind::Welcome),
            "booking_confirmation" => Some(NotificationKind::BookingConfirmation),
            "status_update" => Some(NotificationKind::StatusUpdate),
            "payment_confirmation" => Some(NotificationKind::PaymentConfirmation),
            "driver_assigned" => Some(NotificationKind::DriverAssigned),
            "booking_assigned" => Some(NotificationKind::BookingAssigned),
            _ => None,
        }
    }
}

/// Ledger status of a notification. `Sent` is terminal; `Failed` entries
/// are rescanned by the retry scheduler until the retry cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A durable record of one notification: what to say, to whom, and the
/// per-channel delivery outcome. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub recipient_role: RecipientRole,
    /// Email address, when the email channel applies to this recipient.
    pub recipient_email: Option<String>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Free-form key/value payload; the message channel reads `phone`.
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub email_sent: bool,
    pub sms_sent: bool,
    pub error_message: Option<String>,
    /// Unique key tying this entry to the domain event that produced it.
    pub event_key: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recipient_id: &str,
        recipient_role: RecipientRole,
        recipient_email: Option<&str>,
        kind: NotificationKind,
        title: &str,
        message: &str,
        metadata: BTreeMap<String, serde_json::Value>,
        event_key: &str,
    ) -> Self {
        Self {
            id: ids::internal_id(),
            recipient_id: recipient_id.into(),
            recipient_role,
            recipient_email: recipient_email.map(String::from),
            kind,
            title: title.into(),
            message: message.into(),
            metadata,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            email_sent: false,
            sms_sent: false,
            error_message: None,
            event_key: event_key.into(),
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    /// Phone number for the message channel, if the event supplied one.
    pub fn phone(&self) -> Option<&str> {
        self.metadata.get("phone").and_then(|v| v.as_str())
    }

    /// Whether the email channel still needs a successful send.
    pub fn needs_email(&self) -> bool {
        self.recipient_email.is_some() && !self.email_sent
    }

    /// Whether the message channel still needs a successful send.
    pub fn needs_sms(&self) -> bool {
        self.phone().is_some() && !self.sms_sent
    }

    /// Terminal when every requested channel has succeeded.
    pub fn is_delivered(&self) -> bool {
        !self.needs_email() && !self.needs_sms()
    }

    /// Whether the retry scheduler may still pick this entry up.
    pub fn retry_eligible(&self) -> bool {
        self.status == DeliveryStatus::Failed && self.retry_count < self.max_retries
    }
}

// ─── Audit log ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Driver,
    Admin,
    System,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Customer => "customer",
            ActorRole::Driver => "driver",
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
        }
    }
}

/// The authenticated caller of a mutating operation. Identity arrives
/// pre-verified; the core never checks tokens itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn system() -> Self {
        Self { id: "system".into(), role: ActorRole::System }
    }

    pub fn customer(id: &str) -> Self {
        Self { id: id.into(), role: ActorRole::Customer }
    }

    pub fn admin(id: &str) -> Self {
        Self { id: id.into(), role: ActorRole::Admin }
    }
}

/// Where a request came from, recorded verbatim in the audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOrigin {
    pub remote_addr: String,
    pub user_agent: String,
}

/// Append-only record of one state-changing call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub actor_id: String,
    pub actor_role: ActorRole,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: serde_json::Value,
    pub origin: RequestOrigin,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        actor: &Actor,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        details: serde_json::Value,
        origin: RequestOrigin,
    ) -> Self {
        Self {
            id: ids::internal_id(),
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            details,
            origin,
            created_at: Utc::now(),
        }
    }
}

// ─── Domain events ────────────────────────────────────────

/// Internal signal raised by a successful state transition and consumed
/// by the notification dispatcher. Exactly one per transition.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    UserRegistered {
        user_id: String,
        role: RecipientRole,
        full_name: String,
        email: String,
    },
    BookingCreated {
        booking: Booking,
    },
    StatusChanged {
        booking: Booking,
        old_status: BookingStatus,
        new_status: BookingStatus,
    },
    PaymentCompleted {
        booking: Booking,
        amount_cents: i64,
    },
    DriverAssigned {
        booking: Booking,
        driver: Driver,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::UserRegistered { .. } => "user_registered",
            DomainEvent::BookingCreated { .. } => "booking_created",
            DomainEvent::StatusChanged { .. } => "status_changed",
            DomainEvent::PaymentCompleted { .. } => "payment_completed",
            DomainEvent::DriverAssigned { .. } => "driver_assigned",
        }
    }
}
