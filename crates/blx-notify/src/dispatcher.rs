//! Event-to-notification dispatcher.
//!
//! One domain event maps to a fixed set of recipients; each recipient
//! gets one ledger entry keyed by a deterministic `event_key`, so a
//! replayed event finds its existing entry instead of creating another.
//! Channel attempts run in a fixed order, email then message, and every
//! outcome lands on the ledger whether it succeeded or not.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use blx_core::error::Result;
use blx_core::traits::{EmailSender, EventSink, MessageSender, NotificationStore};
use blx_core::types::{
    DeliveryStatus, DomainEvent, Notification, NotificationKind, RecipientRole,
};

pub struct Dispatcher {
    ledger: Arc<dyn NotificationStore>,
    email: Arc<dyn EmailSender>,
    messages: Arc<dyn MessageSender>,
}

impl Dispatcher {
    pub fn new(
        ledger: Arc<dyn NotificationStore>,
        email: Arc<dyn EmailSender>,
        messages: Arc<dyn MessageSender>,
    ) -> Self {
        Self { ledger, email, messages }
    }

    /// Persist ledger entries for `event` and attempt delivery once.
    /// Returns the ledger ids touched, existing entries included.
    pub async fn dispatch(&self, event: &DomainEvent) -> Result<Vec<String>> {
        let mut handles = Vec::new();
        for notification in compose(event) {
            if self.ledger.insert_unique(&notification).await? {
                self.attempt(&notification).await?;
                handles.push(notification.id);
            } else if let Some(existing) =
                self.ledger.get_by_event_key(&notification.event_key).await?
            {
                tracing::debug!(
                    "event {} already has ledger entry {}, skipping",
                    notification.event_key,
                    existing.id
                );
                handles.push(existing.id);
            }
        }
        Ok(handles)
    }

    /// Fire the delivery attempt on a background task so request paths
    /// do not block on provider I/O.
    pub fn dispatch_detached(self: &Arc<Self>, event: DomainEvent) -> tokio::task::JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&event).await {
                tracing::error!("dispatch of {} failed: {e}", event.name());
            }
        })
    }

    /// One attempt across the channels `notification` still needs, then
    /// record the outcome. Channel errors become ledger state, never
    /// propagated errors.
    async fn attempt(&self, notification: &Notification) -> Result<()> {
        let mut email_sent = false;
        let mut sms_sent = false;
        let mut error = None;

        if notification.needs_email() {
            if let Some(to) = &notification.recipient_email {
                match self.email.send(to, &notification.title, &notification.message).await {
                    Ok(()) => email_sent = true,
                    Err(e) => {
                        tracing::warn!("email delivery failed for {}: {e}", notification.id);
                        error = Some(e.to_string());
                    }
                }
            }
        }
        if notification.needs_sms() {
            if let Some(phone) = notification.phone() {
                match self.messages.send(phone, &notification.message).await {
                    Ok(()) => sms_sent = true,
                    Err(e) => {
                        tracing::warn!("message delivery failed for {}: {e}", notification.id);
                        error.get_or_insert(e.to_string());
                    }
                }
            }
        }

        let delivered = (!notification.needs_email() || email_sent)
            && (!notification.needs_sms() || sms_sent);
        let status = if delivered { DeliveryStatus::Sent } else { DeliveryStatus::Failed };
        self.ledger
            .apply_attempt(&notification.id, email_sent, sms_sent, status, error.as_deref())
            .await
    }
}

#[async_trait]
impl EventSink for Dispatcher {
    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.dispatch(&event).await {
            tracing::error!("dispatch of {} failed: {e}", event.name());
        }
    }
}

/// Recipient fan-out: which ledger entries an event produces.
fn compose(event: &DomainEvent) -> Vec<Notification> {
    match event {
        DomainEvent::UserRegistered { user_id, role, full_name, email } => {
            vec![Notification::new(
                user_id,
                *role,
                Some(email),
                NotificationKind::Welcome,
                "Welcome to BLuxA Corp",
                &format!("Hello {full_name}, your account is ready."),
                BTreeMap::new(),
                &format!("user_registered:{user_id}"),
            )]
        }
        DomainEvent::BookingCreated { booking } => {
            vec![Notification::new(
                &booking.customer_email,
                RecipientRole::Customer,
                Some(&booking.customer_email),
                NotificationKind::BookingConfirmation,
                "Your BLuxA booking is received",
                &format!(
                    "Hello {}, booking {} is received for {} {} from {} to {}. \
                     Confirmation code: {}.",
                    booking.customer_name,
                    booking.booking_id,
                    booking.pickup_date,
                    booking.pickup_time,
                    booking.pickup_address,
                    booking.destination_address,
                    booking.confirmation_code,
                ),
                booking_metadata(booking),
                &format!("booking_created:{}:customer", booking.id),
            )]
        }
        DomainEvent::StatusChanged { booking, old_status, new_status } => {
            vec![Notification::new(
                &booking.customer_email,
                RecipientRole::Customer,
                Some(&booking.customer_email),
                NotificationKind::StatusUpdate,
                &format!("Booking {} is now {}", booking.booking_id, new_status.as_str()),
                &format!(
                    "Hello {}, booking {} moved from {} to {}.",
                    booking.customer_name,
                    booking.booking_id,
                    old_status.as_str(),
                    new_status.as_str(),
                ),
                booking_metadata(booking),
                &format!(
                    "status_changed:{}:{}:{}:customer",
                    booking.id,
                    old_status.as_str(),
                    new_status.as_str()
                ),
            )]
        }
        DomainEvent::PaymentCompleted { booking, amount_cents } => {
            vec![Notification::new(
                &booking.customer_email,
                RecipientRole::Customer,
                Some(&booking.customer_email),
                NotificationKind::PaymentConfirmation,
                "Payment received",
                &format!(
                    "Hello {}, we received ${}.{:02} for booking {}. You are all set.",
                    booking.customer_name,
                    amount_cents / 100,
                    amount_cents % 100,
                    booking.booking_id,
                ),
                booking_metadata(booking),
                &format!("payment_completed:{}:customer", booking.id),
            )]
        }
        DomainEvent::DriverAssigned { booking, driver } => {
            let mut driver_meta = BTreeMap::new();
            driver_meta.insert("phone".to_string(), serde_json::json!(driver.phone));
            driver_meta
                .insert("booking_id".to_string(), serde_json::json!(booking.booking_id));
            vec![
                Notification::new(
                    &booking.customer_email,
                    RecipientRole::Customer,
                    Some(&booking.customer_email),
                    NotificationKind::DriverAssigned,
                    "Your driver is assigned",
                    &format!(
                        "Hello {}, {} will drive booking {}.",
                        booking.customer_name,
                        driver.full_name(),
                        booking.booking_id,
                    ),
                    booking_metadata(booking),
                    &format!("driver_assigned:{}:customer", booking.id),
                ),
                Notification::new(
                    &driver.id,
                    RecipientRole::Driver,
                    Some(&driver.email),
                    NotificationKind::BookingAssigned,
                    "New trip assigned",
                    &format!(
                        "{}, you are assigned booking {}: {} {} from {} to {}.",
                        driver.full_name(),
                        booking.booking_id,
                        booking.pickup_date,
                        booking.pickup_time,
                        booking.pickup_address,
                        booking.destination_address,
                    ),
                    driver_meta,
                    &format!("driver_assigned:{}:driver", booking.id),
                ),
            ]
        }
    }
}

fn booking_metadata(
    booking: &blx_core::types::Booking,
) -> BTreeMap<String, serde_json::Value> {
    let mut meta = BTreeMap::new();
    meta.insert("phone".to_string(), serde_json::json!(booking.customer_phone));
    meta.insert("booking_id".to_string(), serde_json::json!(booking.booking_id));
    meta.insert(
        "confirmation_code".to_string(),
        serde_json::json!(booking.confirmation_code),
    );
    meta
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use blx_core::error::BlxError;
    use blx_core::ids;
    use blx_core::types::{Booking, BookingStatus, PaymentState, VehicleType};
    use blx_store::SqliteStore;
    use chrono::Utc;
    use std::sync::Mutex;

    pub(crate) struct ScriptedEmail {
        outcomes: Mutex<Vec<Result<()>>>,
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedEmail {
        pub fn new(outcomes: Vec<Result<()>>) -> Self {
            Self { outcomes: Mutex::new(outcomes), sent: Mutex::new(vec![]) }
        }

        pub fn always_ok() -> Self {
            Self::new(vec![])
        }
    }

    #[async_trait]
    impl EmailSender for ScriptedEmail {
        async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<()> {
            let next = self.outcomes.lock().unwrap().pop().unwrap_or(Ok(()));
            if next.is_ok() {
                self.sent.lock().unwrap().push((to.to_string(), subject.to_string()));
            }
            next
        }
    }

    pub(crate) struct ScriptedMessages {
        outcomes: Mutex<Vec<Result<()>>>,
        pub sent: Mutex<Vec<String>>,
    }

    impl ScriptedMessages {
        pub fn new(outcomes: Vec<Result<()>>) -> Self {
            Self { outcomes: Mutex::new(outcomes), sent: Mutex::new(vec![]) }
        }

        pub fn always_ok() -> Self {
            Self::new(vec![])
        }
    }

    #[async_trait]
    impl MessageSender for ScriptedMessages {
        async fn send(&self, phone: &str, _text: &str) -> Result<()> {
            let next = self.outcomes.lock().unwrap().pop().unwrap_or(Ok(()));
            if next.is_ok() {
                self.sent.lock().unwrap().push(phone.to_string());
            }
            next
        }
    }

    pub(crate) fn channel_err(msg: &str) -> BlxError {
        BlxError::Channel(msg.into())
    }

    pub(crate) fn sample_booking() -> Booking {
        let now = Utc::now();
        Booking {
            id: ids::internal_id(),
            booking_id: ids::booking_reference(now),
            confirmation_code: ids::confirmation_code(),
            pickup_address: "1 Main St".into(),
            destination_address: "2 Broadway".into(),
            pickup_date: "2026-09-01".into(),
            pickup_time: "10:00".into(),
            vehicle_type: VehicleType::ExecutiveSedan,
            customer_name: "Ada Lovelace".into(),
            customer_email: "ada@example.com".into(),
            customer_phone: "+15550001111".into(),
            estimated_duration_minutes: 60,
            special_requests: String::new(),
            total_amount_cents: 9000,
            status: BookingStatus::Pending,
            payment_state: PaymentState::Pending,
            driver_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn dispatcher(
        email: Arc<ScriptedEmail>,
        messages: Arc<ScriptedMessages>,
    ) -> (Dispatcher, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        (Dispatcher::new(store.clone(), email, messages), store)
    }

    #[tokio::test]
    async fn booking_created_delivers_both_channels() {
        let email = Arc::new(ScriptedEmail::always_ok());
        let messages = Arc::new(ScriptedMessages::always_ok());
        let (d, store) = dispatcher(email.clone(), messages.clone());

        let booking = sample_booking();
        let handles =
            d.dispatch(&DomainEvent::BookingCreated { booking: booking.clone() }).await.unwrap();
        assert_eq!(handles.len(), 1);

        let entry = store.get(&handles[0]).await.unwrap().unwrap();
        assert_eq!(entry.status, DeliveryStatus::Sent);
        assert!(entry.email_sent);
        assert!(entry.sms_sent);
        assert_eq!(email.sent.lock().unwrap().len(), 1);
        assert_eq!(messages.sent.lock().unwrap()[0], booking.customer_phone);
    }

    #[tokio::test]
    async fn replayed_event_creates_no_second_entry() {
        let email = Arc::new(ScriptedEmail::always_ok());
        let messages = Arc::new(ScriptedMessages::always_ok());
        let (d, store) = dispatcher(email.clone(), messages);

        let event = DomainEvent::BookingCreated { booking: sample_booking() };
        let first = d.dispatch(&event).await.unwrap();
        let second = d.dispatch(&event).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.recent(10).await.unwrap().len(), 1);
        // Only the first dispatch attempted delivery.
        assert_eq!(email.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn email_failure_marks_entry_failed_but_keeps_sms_flag() {
        let email = Arc::new(ScriptedEmail::new(vec![Err(channel_err("smtp 550"))]));
        let messages = Arc::new(ScriptedMessages::always_ok());
        let (d, store) = dispatcher(email, messages);

        let handles = d
            .dispatch(&DomainEvent::BookingCreated { booking: sample_booking() })
            .await
            .unwrap();
        let entry = store.get(&handles[0]).await.unwrap().unwrap();
        assert_eq!(entry.status, DeliveryStatus::Failed);
        assert!(!entry.email_sent);
        assert!(entry.sms_sent);
        assert_eq!(entry.error_message.as_deref(), Some("channel delivery failed: smtp 550"));
        assert!(entry.retry_eligible());
    }

    #[tokio::test]
    async fn welcome_event_uses_email_only() {
        let email = Arc::new(ScriptedEmail::always_ok());
        let messages = Arc::new(ScriptedMessages::always_ok());
        let (d, store) = dispatcher(email, messages.clone());

        let handles = d
            .dispatch(&DomainEvent::UserRegistered {
                user_id: "u1".into(),
                role: RecipientRole::Customer,
                full_name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
            })
            .await
            .unwrap();
        let entry = store.get(&handles[0]).await.unwrap().unwrap();
        assert_eq!(entry.kind, NotificationKind::Welcome);
        assert_eq!(entry.status, DeliveryStatus::Sent);
        assert!(messages.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn driver_assignment_notifies_customer_and_driver() {
        let email = Arc::new(ScriptedEmail::always_ok());
        let messages = Arc::new(ScriptedMessages::always_ok());
        let (d, store) = dispatcher(email.clone(), messages);

        let booking = sample_booking();
        let driver = blx_core::types::Driver {
            id: ids::internal_id(),
            driver_id: ids::driver_reference(1),
            first_name: "Max".into(),
            last_name: "Verstappen".into(),
            email: "max@example.com".into(),
            phone: "+15550002222".into(),
            created_at: Utc::now(),
        };
        let handles = d
            .dispatch(&DomainEvent::DriverAssigned { booking, driver })
            .await
            .unwrap();
        assert_eq!(handles.len(), 2);

        let entries = store.recent(10).await.unwrap();
        let roles: Vec<RecipientRole> = entries.iter().map(|e| e.recipient_role).collect();
        assert!(roles.contains(&RecipientRole::Customer));
        assert!(roles.contains(&RecipientRole::Driver));
        let recipients: Vec<String> =
            email.sent.lock().unwrap().iter().map(|(to, _)| to.clone()).collect();
        assert!(recipients.contains(&"ada@example.com".to_string()));
        assert!(recipients.contains(&"max@example.com".to_string()));
    }

    struct GatedEmail {
        gate: tokio::sync::Notify,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailSender for GatedEmail {
        async fn send(&self, to: &str, _subject: &str, _html_body: &str) -> Result<()> {
            self.gate.notified().await;
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn detached_dispatch_returns_while_delivery_is_in_flight() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let email =
            Arc::new(GatedEmail { gate: tokio::sync::Notify::new(), sent: Mutex::new(vec![]) });
        let messages = Arc::new(ScriptedMessages::always_ok());
        let d = Arc::new(Dispatcher::new(store.clone(), email.clone(), messages));

        let handle =
            d.dispatch_detached(DomainEvent::BookingCreated { booking: sample_booking() });

        // Control is back here while the email send is still parked on
        // the gate; nothing can have reached Sent yet.
        assert!(store
            .recent(10)
            .await
            .unwrap()
            .iter()
            .all(|e| e.status != DeliveryStatus::Sent));
        assert!(email.sent.lock().unwrap().is_empty());

        email.gate.notify_one();
        handle.await.unwrap();

        let entries = store.recent(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, DeliveryStatus::Sent);
        assert_eq!(email.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn distinct_transitions_notify_separately() {
        let email = Arc::new(ScriptedEmail::always_ok());
        let messages = Arc::new(ScriptedMessages::always_ok());
        let (d, store) = dispatcher(email, messages);

        let booking = sample_booking();
        d.dispatch(&DomainEvent::StatusChanged {
            booking: booking.clone(),
            old_status: BookingStatus::Pending,
            new_status: BookingStatus::Assigned,
        })
        .await
        .unwrap();
        d.dispatch(&DomainEvent::StatusChanged {
            booking,
            old_status: BookingStatus::Assigned,
            new_status: BookingStatus::Confirmed,
        })
        .await
        .unwrap();
        assert_eq!(store.recent(10).await.unwrap().len(), 2);
    }
}
