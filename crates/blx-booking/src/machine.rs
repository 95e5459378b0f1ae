//! Booking and payment state machine.
//!
//! Every mutation follows the same shape: validate, apply one atomic
//! conditional store update, audit, publish the domain event. Validation
//! and authorization failures leave the stores untouched; a lost
//! conditional update means a concurrent caller won and surfaces as a
//! validation error against the fresh state.

use std::sync::Arc;

use chrono::Utc;

use blx_core::error::{BlxError, Result};
use blx_core::ids;
use blx_core::traits::{
    BookingStore, DriverStore, EventSink, PaymentStore, PricingProvider,
};
use blx_core::types::{
    Actor, Booking, BookingStatus, DomainEvent, Driver, Payment, PaymentState, RecipientRole,
    RequestOrigin, VehicleType,
};

use crate::audit::AuditRecorder;
use crate::gateway::SignatureVerifier;

#[derive(Debug, Clone)]
pub struct BookingRequest {
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
}

#[derive(Debug, Clone)]
pub struct DriverRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

pub struct BookingService {
    bookings: Arc<dyn BookingStore>,
    payments: Arc<dyn PaymentStore>,
    drivers: Arc<dyn DriverStore>,
    pricing: Arc<dyn PricingProvider>,
    audit: AuditRecorder,
    verifier: SignatureVerifier,
    events: Arc<dyn EventSink>,
}

impl BookingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        payments: Arc<dyn PaymentStore>,
        drivers: Arc<dyn DriverStore>,
        pricing: Arc<dyn PricingProvider>,
        audit: AuditRecorder,
        verifier: SignatureVerifier,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { bookings, payments, drivers, pricing, audit, verifier, events }
    }

    pub async fn create_booking(
        &self,
        request: BookingRequest,
        actor: &Actor,
        origin: &RequestOrigin,
    ) -> Result<Booking> {
        require(&request.pickup_address, "pickup_address")?;
        require(&request.destination_address, "destination_address")?;
        require(&request.pickup_date, "pickup_date")?;
        require(&request.pickup_time, "pickup_time")?;
        require(&request.customer_name, "customer_name")?;
        require(&request.customer_email, "customer_email")?;
        require(&request.customer_phone, "customer_phone")?;
        if request.estimated_duration_minutes == 0 {
            return Err(BlxError::Validation("estimated_duration_minutes must be positive".into()));
        }

        let is_airport = is_airport_transfer(&request.pickup_address)
            || is_airport_transfer(&request.destination_address);
        let total = self
            .pricing
            .price_for(request.vehicle_type, request.estimated_duration_minutes, is_airport)
            .await;

        let now = Utc::now();
        let booking = Booking {
            id: ids::internal_id(),
            booking_id: ids::booking_reference(now),
            confirmation_code: ids::confirmation_code(),
            pickup_address: request.pickup_address,
            destination_address: request.destination_address,
            pickup_date: request.pickup_date,
            pickup_time: request.pickup_time,
            vehicle_type: request.vehicle_type,
            customer_name: request.customer_name,
            customer_email: request.customer_email,
            customer_phone: request.customer_phone,
            estimated_duration_minutes: request.estimated_duration_minutes,
            special_requests: request.special_requests,
            total_amount_cents: total,
            status: BookingStatus::Pending,
            payment_state: PaymentState::Pending,
            driver_id: None,
            created_at: now,
            updated_at: now,
        };
        self.bookings.insert(&booking).await?;

        self.audit
            .record(
                actor,
                "booking_created",
                "booking",
                &booking.id,
                serde_json::json!({
                    "booking_id": booking.booking_id,
                    "vehicle_type": booking.vehicle_type.as_str(),
                    "total_amount_cents": booking.total_amount_cents,
                    "is_airport_transfer": is_airport,
                }),
                origin,
            )
            .await;

        tracing::info!("booking {} created for {}", booking.booking_id, booking.customer_email);
        self.events.publish(DomainEvent::BookingCreated { booking: booking.clone() }).await;
        Ok(booking)
    }

    /// Record the pending payment for a gateway checkout session.
    /// `gateway_transaction_id` comes back from the gateway collaborator
    /// that opened the session.
    pub async fn create_payment_intent(
        &self,
        booking_uuid: &str,
        gateway_transaction_id: &str,
        actor: &Actor,
        origin: &RequestOrigin,
    ) -> Result<Payment> {
        let booking = self
            .bookings
            .get(booking_uuid)
            .await?
            .ok_or_else(|| BlxError::NotFound(format!("booking {booking_uuid}")))?;

        if self.payments.has_completed(&booking.id).await? {
            return Err(BlxError::Validation(format!(
                "booking {} is already paid",
                booking.booking_id
            )));
        }

        let payment = Payment::pending(&booking, gateway_transaction_id, Utc::now());
        self.payments.insert(&payment).await?;

        self.audit
            .record(
                actor,
                "payment_intent_created",
                "payment",
                &payment.id,
                serde_json::json!({
                    "payment_id": payment.payment_id,
                    "booking_id": booking.booking_id,
                    "amount_cents": payment.amount_cents,
                }),
                origin,
            )
            .await;
        Ok(payment)
    }

    /// Apply a signed gateway webhook. Signature failure is audited and
    /// changes nothing; replays of an already-applied success are no-ops.
    pub async fn apply_gateway_event(
        &self,
        payload: &str,
        signature_header: &str,
        origin: &RequestOrigin,
    ) -> Result<()> {
        if let Err(e) = self.verifier.verify(payload, signature_header, Utc::now().timestamp()) {
            self.audit
                .record(
                    &Actor::system(),
                    "webhook_signature_rejected",
                    "gateway_event",
                    "-",
                    serde_json::json!({"reason": e.to_string()}),
                    origin,
                )
                .await;
            return Err(e);
        }

        let event: serde_json::Value = serde_json::from_str(payload)?;
        let event_type = event["type"].as_str().unwrap_or("");
        let transaction_id = event["data"]["object"]["id"].as_str().unwrap_or("");
        if transaction_id.is_empty() {
            return Err(BlxError::Validation("gateway event missing transaction id".into()));
        }

        match event_type {
            "payment_intent.succeeded" => self.apply_payment_success(transaction_id, origin).await,
            "payment_intent.payment_failed" => {
                if !self.payments.fail_by_transaction(transaction_id).await? {
                    tracing::debug!("gateway failure for unknown or settled transaction {transaction_id}, ignoring");
                    return Ok(());
                }
                self.audit
                    .record(
                        &Actor::system(),
                        "payment_failed",
                        "payment",
                        transaction_id,
                        serde_json::Value::Null,
                        origin,
                    )
                    .await;
                Ok(())
            }
            other => {
                tracing::debug!("ignoring gateway event type {other}");
                Ok(())
            }
        }
    }

    async fn apply_payment_success(
        &self,
        transaction_id: &str,
        origin: &RequestOrigin,
    ) -> Result<()> {
        let payment = self
            .payments
            .get_by_transaction(transaction_id)
            .await?
            .ok_or_else(|| BlxError::NotFound(format!("payment for transaction {transaction_id}")))?;

        // Booking-level gate: at most one payment ever completes per
        // booking. A replay, or a success for a second intent on an
        // already-paid booking, loses here and changes nothing.
        if !self.bookings.mark_paid(&payment.booking_id).await? {
            tracing::debug!("gateway success for {transaction_id} on a paid booking, ignoring");
            return Ok(());
        }
        self.payments.complete_by_transaction(transaction_id).await?;

        let booking = self
            .bookings
            .get(&payment.booking_id)
            .await?
            .ok_or_else(|| BlxError::NotFound(format!("booking {}", payment.booking_id)))?;

        self.audit
            .record(
                &Actor::system(),
                "payment_completed",
                "payment",
                &payment.id,
                serde_json::json!({
                    "booking_id": booking.booking_id,
                    "amount_cents": payment.amount_cents,
                }),
                origin,
            )
            .await;

        tracing::info!("payment completed for booking {}", booking.booking_id);
        self.events
            .publish(DomainEvent::PaymentCompleted {
                booking,
                amount_cents: payment.amount_cents,
            })
            .await;
        Ok(())
    }

    pub async fn update_status(
        &self,
        booking_uuid: &str,
        new_status: BookingStatus,
        actor: &Actor,
        origin: &RequestOrigin,
    ) -> Result<Booking> {
        let booking = self
            .bookings
            .get(booking_uuid)
            .await?
            .ok_or_else(|| BlxError::NotFound(format!("booking {booking_uuid}")))?;

        let old_status = booking.status;
        if !old_status.can_transition_to(new_status) {
            return Err(BlxError::Validation(format!(
                "illegal transition {} -> {}",
                old_status.as_str(),
                new_status.as_str()
            )));
        }

        if !self.bookings.transition_status(&booking.id, old_status, new_status).await? {
            return Err(BlxError::Validation(format!(
                "booking {} changed concurrently, re-read and retry",
                booking.booking_id
            )));
        }

        self.audit
            .record(
                actor,
                "booking_status_updated",
                "booking",
                &booking.id,
                serde_json::json!({
                    "old_status": old_status.as_str(),
                    "new_status": new_status.as_str(),
                }),
                origin,
            )
            .await;

        let mut updated = booking;
        updated.status = new_status;
        self.events
            .publish(DomainEvent::StatusChanged {
                booking: updated.clone(),
                old_status,
                new_status,
            })
            .await;
        Ok(updated)
    }

    pub async fn assign_driver(
        &self,
        booking_uuid: &str,
        driver_uuid: &str,
        actor: &Actor,
        origin: &RequestOrigin,
    ) -> Result<Booking> {
        let booking = self
            .bookings
            .get(booking_uuid)
            .await?
            .ok_or_else(|| BlxError::NotFound(format!("booking {booking_uuid}")))?;
        let driver = self
            .drivers
            .get(driver_uuid)
            .await?
            .ok_or_else(|| BlxError::NotFound(format!("driver {driver_uuid}")))?;

        if !self.bookings.assign_driver(&booking.id, &driver.id).await? {
            return Err(BlxError::Validation(format!(
                "booking {} is {} and cannot take a driver",
                booking.booking_id,
                booking.status.as_str()
            )));
        }

        self.audit
            .record(
                actor,
                "driver_assigned",
                "booking",
                &booking.id,
                serde_json::json!({
                    "driver_id": driver.driver_id,
                    "driver_name": driver.full_name(),
                }),
                origin,
            )
            .await;

        let mut updated = booking;
        updated.status = BookingStatus::Assigned;
        updated.driver_id = Some(driver.id.clone());
        self.events
            .publish(DomainEvent::DriverAssigned { booking: updated.clone(), driver })
            .await;
        Ok(updated)
    }

    pub async fn register_driver(
        &self,
        request: DriverRequest,
        actor: &Actor,
        origin: &RequestOrigin,
    ) -> Result<Driver> {
        require(&request.first_name, "first_name")?;
        require(&request.last_name, "last_name")?;
        require(&request.email, "email")?;
        require(&request.phone, "phone")?;

        let sequence = self.drivers.next_sequence().await?;
        let driver = Driver {
            id: ids::internal_id(),
            driver_id: ids::driver_reference(sequence),
            first_name: request.first_name,
            last_name: request.last_name,
            email: request.email,
            phone: request.phone,
            created_at: Utc::now(),
        };
        self.drivers.insert(&driver).await?;

        self.audit
            .record(
                actor,
                "driver_registered",
                "driver",
                &driver.id,
                serde_json::json!({"driver_id": driver.driver_id}),
                origin,
            )
            .await;

        self.events
            .publish(DomainEvent::UserRegistered {
                user_id: driver.id.clone(),
                role: RecipientRole::Driver,
                full_name: driver.full_name(),
                email: driver.email.clone(),
            })
            .await;
        Ok(driver)
    }

    /// Registration of a customer account; raises the welcome event.
    pub async fn register_user(
        &self,
        full_name: &str,
        email: &str,
        actor: &Actor,
        origin: &RequestOrigin,
    ) -> Result<String> {
        require(full_name, "full_name")?;
        require(email, "email")?;

        let user_id = ids::internal_id();
        self.audit
            .record(
                actor,
                "user_registered",
                "user",
                &user_id,
                serde_json::json!({"email": email}),
                origin,
            )
            .await;

        self.events
            .publish(DomainEvent::UserRegistered {
                user_id: user_id.clone(),
                role: RecipientRole::Customer,
                full_name: full_name.to_string(),
                email: email.to_string(),
            })
            .await;
        Ok(user_id)
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BlxError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn is_airport_transfer(address: &str) -> bool {
    address.to_lowercase().contains("airport")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blx_core::config::GatewayConfig;
    use blx_core::traits::AuditStore;
    use blx_core::types::AuditLogEntry;
    use blx_store::SqliteStore;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<String>>);

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, event: DomainEvent) {
            self.0.lock().unwrap().push(event.name().to_string());
        }
    }

    struct FlatPricing;

    #[async_trait]
    impl PricingProvider for FlatPricing {
        async fn price_for(&self, _v: VehicleType, _d: u32, airport: bool) -> i64 {
            if airport { 7500 } else { 9000 }
        }
        async fn minimum_charge(&self, _v: VehicleType) -> i64 {
            5000
        }
    }

    struct Harness {
        store: Arc<SqliteStore>,
        service: BookingService,
        events: Arc<RecordingSink>,
        verifier: SignatureVerifier,
    }

    fn harness() -> Harness {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let events = Arc::new(RecordingSink(Mutex::new(vec![])));
        let gateway = GatewayConfig {
            webhook_secret: "whsec_test".into(),
            signature_tolerance_secs: 300,
        };
        let service = BookingService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(FlatPricing),
            AuditRecorder::new(store.clone()),
            SignatureVerifier::new(&gateway),
            events.clone(),
        );
        Harness { store, service, events, verifier: SignatureVerifier::new(&gateway) }
    }

    fn request() -> BookingRequest {
        BookingRequest {
            pickup_address: "1 Main St".into(),
            destination_address: "2 Broadway".into(),
            pickup_date: "2026-09-01".into(),
            pickup_time: "10:00".into(),
            vehicle_type: VehicleType::ExecutiveSedan,
            customer_name: "Ada Lovelace".into(),
            customer_email: "ada@example.com".into(),
            customer_phone: "+15550001111".into(),
            estimated_duration_minutes: 120,
            special_requests: String::new(),
        }
    }

    fn events_of(h: &Harness) -> Vec<String> {
        h.events.0.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn create_booking_prices_persists_audits_and_emits() {
        let h = harness();
        let booking =
            h.service.create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
                .await
                .unwrap();

        assert!(booking.booking_id.starts_with("BLX"));
        assert_eq!(booking.booking_id.len(), 3 + 8 + 6);
        assert_eq!(booking.confirmation_code.len(), 8);
        assert_eq!(booking.total_amount_cents, 9000);
        assert_eq!(booking.status, BookingStatus::Pending);

        let stored = BookingStore::get(&*h.store, &booking.id).await.unwrap().unwrap();
        assert_eq!(stored.booking_id, booking.booking_id);

        let audit = AuditStore::recent(&*h.store, 10).await.unwrap();
        assert_eq!(audit[0].action, "booking_created");
        assert_eq!(events_of(&h), vec!["booking_created"]);
    }

    #[tokio::test]
    async fn airport_address_switches_to_flat_pricing() {
        let h = harness();
        let mut req = request();
        req.destination_address = "JFK International Airport".into();
        let booking = h
            .service
            .create_booking(req, &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(booking.total_amount_cents, 7500);
    }

    #[tokio::test]
    async fn missing_field_is_named_in_the_error() {
        let h = harness();
        let mut req = request();
        req.customer_email = "  ".into();
        let err = h
            .service
            .create_booking(req, &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("customer_email"));
        assert!(events_of(&h).is_empty());
    }

    #[tokio::test]
    async fn illegal_transition_rejected_without_side_effects() {
        let h = harness();
        let booking = h
            .service
            .create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();

        let err = h
            .service
            .update_status(&booking.id, BookingStatus::Completed, &Actor::admin("a1"), &RequestOrigin::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BlxError::Validation(_)));

        let stored = BookingStore::get(&*h.store, &booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        assert_eq!(events_of(&h), vec!["booking_created"]);
    }

    #[tokio::test]
    async fn legal_transition_audits_old_and_new() {
        let h = harness();
        let booking = h
            .service
            .create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();

        let updated = h
            .service
            .update_status(&booking.id, BookingStatus::Cancelled, &Actor::admin("a1"), &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(updated.status, BookingStatus::Cancelled);

        let audit = AuditStore::recent(&*h.store, 10).await.unwrap();
        let entry = audit.iter().find(|e| e.action == "booking_status_updated").unwrap();
        assert_eq!(entry.details["old_status"], "pending");
        assert_eq!(entry.details["new_status"], "cancelled");
        assert_eq!(events_of(&h), vec!["booking_created", "status_changed"]);
    }

    #[tokio::test]
    async fn assign_driver_moves_booking_and_emits() {
        let h = harness();
        let booking = h
            .service
            .create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        let driver = h
            .service
            .register_driver(
                DriverRequest {
                    first_name: "Max".into(),
                    last_name: "Verstappen".into(),
                    email: "max@example.com".into(),
                    phone: "+15550002222".into(),
                },
                &Actor::admin("a1"),
                &RequestOrigin::default(),
            )
            .await
            .unwrap();
        assert_eq!(driver.driver_id, "DRV001");

        let updated = h
            .service
            .assign_driver(&booking.id, &driver.id, &Actor::admin("a1"), &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(updated.status, BookingStatus::Assigned);
        assert_eq!(updated.driver_id.as_deref(), Some(driver.id.as_str()));
        assert!(events_of(&h).contains(&"driver_assigned".to_string()));
    }

    #[tokio::test]
    async fn assign_driver_rejects_unknown_driver() {
        let h = harness();
        let booking = h
            .service
            .create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        let err = h
            .service
            .assign_driver(&booking.id, "nope", &Actor::admin("a1"), &RequestOrigin::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BlxError::NotFound(_)));
    }

    #[tokio::test]
    async fn payment_intent_rejected_when_already_paid() {
        let h = harness();
        let booking = h
            .service
            .create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        h.service
            .create_payment_intent(&booking.id, "pi_1", &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        h.store.complete_by_transaction("pi_1").await.unwrap();

        let err = h
            .service
            .create_payment_intent(&booking.id, "pi_2", &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already paid"));
    }

    fn success_payload(transaction_id: &str) -> String {
        serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": transaction_id}},
        })
        .to_string()
    }

    #[tokio::test]
    async fn gateway_success_confirms_booking_once() {
        let h = harness();
        let booking = h
            .service
            .create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        h.service
            .create_payment_intent(&booking.id, "pi_1", &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();

        let payload = success_payload("pi_1");
        let now = Utc::now().timestamp();
        let header = h.verifier.sign(&payload, now).unwrap();
        h.service.apply_gateway_event(&payload, &header, &RequestOrigin::default()).await.unwrap();

        let stored = BookingStore::get(&*h.store, &booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.payment_state, PaymentState::Paid);
        assert_eq!(
            events_of(&h).iter().filter(|e| *e == "payment_completed").count(),
            1
        );

        // Replay: accepted, but nothing changes and no second event.
        h.service.apply_gateway_event(&payload, &header, &RequestOrigin::default()).await.unwrap();
        assert_eq!(
            events_of(&h).iter().filter(|e| *e == "payment_completed").count(),
            1
        );
    }

    #[tokio::test]
    async fn success_for_second_intent_cannot_pay_booking_twice() {
        use blx_core::types::PaymentStatus;

        let h = harness();
        let booking = h
            .service
            .create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        h.service
            .create_payment_intent(&booking.id, "pi_1", &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        h.service
            .create_payment_intent(&booking.id, "pi_2", &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();

        let now = Utc::now().timestamp();
        for txn in ["pi_1", "pi_2"] {
            let payload = success_payload(txn);
            let header = h.verifier.sign(&payload, now).unwrap();
            h.service.apply_gateway_event(&payload, &header, &RequestOrigin::default()).await.unwrap();
        }

        // Only the first success settles; the second intent stays open.
        let first = h.store.get_by_transaction("pi_1").await.unwrap().unwrap();
        let second = h.store.get_by_transaction("pi_2").await.unwrap().unwrap();
        assert_eq!(first.status, PaymentStatus::Completed);
        assert_eq!(second.status, PaymentStatus::Pending);
        assert_eq!(
            events_of(&h).iter().filter(|e| *e == "payment_completed").count(),
            1
        );
        let audit = AuditStore::recent(&*h.store, 20).await.unwrap();
        assert_eq!(audit.iter().filter(|e| e.action == "payment_completed").count(), 1);
    }

    fn failure_payload(transaction_id: &str) -> String {
        serde_json::json!({
            "type": "payment_intent.payment_failed",
            "data": {"object": {"id": transaction_id}},
        })
        .to_string()
    }

    #[tokio::test]
    async fn gateway_failure_marks_payment_and_audits() {
        use blx_core::types::PaymentStatus;

        let h = harness();
        let booking = h
            .service
            .create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        h.service
            .create_payment_intent(&booking.id, "pi_1", &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();

        let payload = failure_payload("pi_1");
        let header = h.verifier.sign(&payload, Utc::now().timestamp()).unwrap();
        h.service.apply_gateway_event(&payload, &header, &RequestOrigin::default()).await.unwrap();

        let stored = h.store.get_by_transaction("pi_1").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        let audit = AuditStore::recent(&*h.store, 10).await.unwrap();
        assert!(audit.iter().any(|e| e.action == "payment_failed"));
    }

    #[tokio::test]
    async fn gateway_failure_for_unknown_transaction_leaves_no_audit() {
        let h = harness();
        let payload = failure_payload("pi_ghost");
        let header = h.verifier.sign(&payload, Utc::now().timestamp()).unwrap();
        h.service.apply_gateway_event(&payload, &header, &RequestOrigin::default()).await.unwrap();

        let audit = AuditStore::recent(&*h.store, 10).await.unwrap();
        assert!(audit.iter().all(|e| e.action != "payment_failed"));
    }

    #[tokio::test]
    async fn gateway_bad_signature_changes_nothing_and_audits() {
        let h = harness();
        let booking = h
            .service
            .create_booking(request(), &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();
        h.service
            .create_payment_intent(&booking.id, "pi_1", &Actor::customer("c1"), &RequestOrigin::default())
            .await
            .unwrap();

        let payload = success_payload("pi_1");
        let err = h
            .service
            .apply_gateway_event(&payload, "t=1,v1=00", &RequestOrigin::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BlxError::Authorization(_)));

        let stored = BookingStore::get(&*h.store, &booking.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_state, PaymentState::Pending);
        let audit: Vec<AuditLogEntry> = AuditStore::recent(&*h.store, 10).await.unwrap();
        assert!(audit.iter().any(|e| e.action == "webhook_signature_rejected"));
    }

    #[tokio::test]
    async fn register_user_emits_welcome_event() {
        let h = harness();
        h.service
            .register_user("Ada Lovelace", "ada@example.com", &Actor::system(), &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(events_of(&h), vec!["user_registered"]);
    }
}
