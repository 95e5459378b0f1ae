//! SQLite store — all tables in one database file.
//!
//! Concurrency contract: request handlers and the retry scheduler hit
//! the same rows, so every cross-component mutation is expressed as one
//! conditional UPDATE whose WHERE clause encodes the expected prior
//! state; callers learn from the affected-row count whether they won.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use blx_core::error::{BlxError, Result};
use blx_core::traits::{
    AuditStore, BookingStore, DriverStore, NotificationStore, PaymentStore, SettingsStore,
    VehicleRateStore,
};
use blx_core::types::{
    ActorRole, AuditLogEntry, Booking, BookingStatus, DeliveryStatus, Driver, Notification,
    NotificationKind, Payment, PaymentState, PaymentStatus, RecipientRole, RequestOrigin,
    VehicleRates, VehicleType,
};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| BlxError::Store(format!("open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        tracing::info!("sqlite store ready at {}", path.display());
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| BlxError::Store(format!("open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS bookings (
                id TEXT PRIMARY KEY,
                booking_id TEXT NOT NULL UNIQUE,
                confirmation_code TEXT NOT NULL,
                pickup_address TEXT NOT NULL,
                destination_address TEXT NOT NULL,
                pickup_date TEXT NOT NULL,
                pickup_time TEXT NOT NULL,
                vehicle_type TEXT NOT NULL,
                customer_name TEXT NOT NULL,
                customer_email TEXT NOT NULL,
                customer_phone TEXT NOT NULL,
                estimated_duration INTEGER NOT NULL,
                special_requests TEXT NOT NULL DEFAULT '',
                total_amount_cents INTEGER NOT NULL CHECK (total_amount_cents >= 0),
                status TEXT NOT NULL DEFAULT 'pending',
                payment_state TEXT NOT NULL DEFAULT 'pending',
                driver_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                payment_id TEXT NOT NULL UNIQUE,
                booking_id TEXT NOT NULL,
                amount_cents INTEGER NOT NULL,
                currency TEXT NOT NULL DEFAULT 'USD',
                gateway_transaction_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                processed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS drivers (
                id TEXT PRIMARY KEY,
                driver_id TEXT NOT NULL UNIQUE,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Notification ledger: durable record of every delivery
            -- attempt and its per-channel outcome. Rows are never deleted.
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                recipient_id TEXT NOT NULL,
                recipient_role TEXT NOT NULL,
                recipient_email TEXT,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                email_sent INTEGER NOT NULL DEFAULT 0,
                sms_sent INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                event_key TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                sent_at TEXT,
                CHECK (retry_count <= max_retries)
            );

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                actor_id TEXT NOT NULL,
                actor_role TEXT NOT NULL,
                action TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                remote_addr TEXT NOT NULL DEFAULT '',
                user_agent TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vehicle_rates (
                vehicle_type TEXT PRIMARY KEY,
                base_rate_cents INTEGER NOT NULL,
                per_hour_rate_cents INTEGER NOT NULL,
                airport_surcharge_cents INTEGER NOT NULL DEFAULT 1000,
                minimum_charge_cents INTEGER,
                available INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS system_settings (
                setting_key TEXT PRIMARY KEY,
                setting_value TEXT NOT NULL
            );
            ",
            )
            .map_err(|e| BlxError::Store(format!("migrate: {e}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| BlxError::Store(format!("lock poisoned: {e}")))
    }
}

fn store_err(context: &'static str) -> impl Fn(rusqlite::Error) -> BlxError {
    move |e| BlxError::Store(format!("{context}: {e}"))
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(parse_ts)
}

fn parse_actor_role(raw: &str) -> ActorRole {
    match raw {
        "customer" => ActorRole::Customer,
        "driver" => ActorRole::Driver,
        "admin" => ActorRole::Admin,
        _ => ActorRole::System,
    }
}

const BOOKING_COLS: &str = "id, booking_id, confirmation_code, pickup_address, \
     destination_address, pickup_date, pickup_time, vehicle_type, customer_name, \
     customer_email, customer_phone, estimated_duration, special_requests, \
     total_amount_cents, status, payment_state, driver_id, created_at, updated_at";

fn row_to_booking(row: &rusqlite::Row<'_>) -> rusqlite::Result<Booking> {
    let vehicle: String = row.get(7)?;
    let status: String = row.get(14)?;
    let payment: String = row.get(15)?;
    let created: String = row.get(17)?;
    let updated: String = row.get(18)?;
    Ok(Booking {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        confirmation_code: row.get(2)?,
        pickup_address: row.get(3)?,
        destination_address: row.get(4)?,
        pickup_date: row.get(5)?,
        pickup_time: row.get(6)?,
        vehicle_type: VehicleType::parse(&vehicle).unwrap_or(VehicleType::ExecutiveSedan),
        customer_name: row.get(8)?,
        customer_email: row.get(9)?,
        customer_phone: row.get(10)?,
        estimated_duration_minutes: row.get(11)?,
        special_requests: row.get(12)?,
        total_amount_cents: row.get(13)?,
        status: BookingStatus::parse(&status).unwrap_or(BookingStatus::Pending),
        payment_state: PaymentState::parse(&payment).unwrap_or(PaymentState::Pending),
        driver_id: row.get(16)?,
        created_at: parse_ts(&created),
        updated_at: parse_ts(&updated),
    })
}

const NOTIFICATION_COLS: &str = "id, recipient_id, recipient_role, recipient_email, kind, \
     title, message, metadata, status, retry_count, max_retries, email_sent, sms_sent, \
     error_message, event_key, created_at, sent_at";

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let role: String = row.get(2)?;
    let kind: String = row.get(4)?;
    let metadata_raw: String = row.get(7)?;
    let status: String = row.get(8)?;
    let created: String = row.get(15)?;
    let sent: Option<String> = row.get(16)?;
    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        recipient_role: RecipientRole::parse(&role).unwrap_or(RecipientRole::Customer),
        recipient_email: row.get(3)?,
        kind: NotificationKind::parse(&kind).unwrap_or(NotificationKind::StatusUpdate),
        title: row.get(5)?,
        message: row.get(6)?,
        metadata: serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&metadata_raw)
            .unwrap_or_default(),
        status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Pending),
        retry_count: row.get(9)?,
        max_retries: row.get(10)?,
        email_sent: row.get::<_, i64>(11)? != 0,
        sms_sent: row.get::<_, i64>(12)? != 0,
        error_message: row.get(13)?,
        event_key: row.get(14)?,
        created_at: parse_ts(&created),
        sent_at: parse_opt_ts(sent),
    })
}

// ─── BookingStore ─────────────────────────────────────────

#[async_trait]
impl BookingStore for SqliteStore {
    async fn insert(&self, booking: &Booking) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO bookings (id, booking_id, confirmation_code, pickup_address,
                    destination_address, pickup_date, pickup_time, vehicle_type, customer_name,
                    customer_email, customer_phone, estimated_duration, special_requests,
                    total_amount_cents, status, payment_state, driver_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                rusqlite::params![
                    booking.id,
                    booking.booking_id,
                    booking.confirmation_code,
                    booking.pickup_address,
                    booking.destination_address,
                    booking.pickup_date,
                    booking.pickup_time,
                    booking.vehicle_type.as_str(),
                    booking.customer_name,
                    booking.customer_email,
                    booking.customer_phone,
                    booking.estimated_duration_minutes,
                    booking.special_requests,
                    booking.total_amount_cents,
                    booking.status.as_str(),
                    booking.payment_state.as_str(),
                    booking.driver_id,
                    booking.created_at.to_rfc3339(),
                    booking.updated_at.to_rfc3339(),
                ],
            )
            .map_err(store_err("insert booking"))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Booking>> {
        self.lock()?
            .query_row(
                &format!("SELECT {BOOKING_COLS} FROM bookings WHERE id = ?1"),
                rusqlite::params![id],
                row_to_booking,
            )
            .optional()
            .map_err(store_err("get booking"))
    }

    async fn transition_status(
        &self,
        id: &str,
        from: BookingStatus,
        to: BookingStatus,
    ) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE bookings SET status = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = ?2",
                rusqlite::params![id, from.as_str(), to.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(store_err("transition booking status"))?;
        Ok(changed > 0)
    }

    async fn assign_driver(&self, id: &str, driver_id: &str) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE bookings SET driver_id = ?2, status = 'assigned', updated_at = ?3
                 WHERE id = ?1 AND status NOT IN ('completed', 'cancelled')",
                rusqlite::params![id, driver_id, Utc::now().to_rfc3339()],
            )
            .map_err(store_err("assign driver"))?;
        Ok(changed > 0)
    }

    async fn mark_paid(&self, id: &str) -> Result<bool> {
        // Idempotent: the WHERE clause makes a replay a no-op.
        let changed = self
            .lock()?
            .execute(
                "UPDATE bookings SET payment_state = 'paid', status = 'confirmed', updated_at = ?2
                 WHERE id = ?1 AND payment_state != 'paid'",
                rusqlite::params![id, Utc::now().to_rfc3339()],
            )
            .map_err(store_err("mark booking paid"))?;
        Ok(changed > 0)
    }

    async fn recent(&self, limit: u32) -> Result<Vec<Booking>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BOOKING_COLS} FROM bookings ORDER BY created_at DESC LIMIT ?1"
            ))
            .map_err(store_err("recent bookings"))?;
        let rows = stmt
            .query_map(rusqlite::params![limit], row_to_booking)
            .map_err(store_err("recent bookings"))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn by_status(&self, status: BookingStatus) -> Result<Vec<Booking>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BOOKING_COLS} FROM bookings WHERE status = ?1 ORDER BY created_at DESC"
            ))
            .map_err(store_err("bookings by status"))?;
        let rows = stmt
            .query_map(rusqlite::params![status.as_str()], row_to_booking)
            .map_err(store_err("bookings by status"))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

// ─── PaymentStore ─────────────────────────────────────────

#[async_trait]
impl PaymentStore for SqliteStore {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO payments (id, payment_id, booking_id, amount_cents, currency,
                    gateway_transaction_id, status, created_at, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    payment.id,
                    payment.payment_id,
                    payment.booking_id,
                    payment.amount_cents,
                    payment.currency,
                    payment.gateway_transaction_id,
                    payment.status.as_str(),
                    payment.created_at.to_rfc3339(),
                    payment.processed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(store_err("insert payment"))?;
        Ok(())
    }

    async fn get_by_transaction(&self, gateway_transaction_id: &str) -> Result<Option<Payment>> {
        self.lock()?
            .query_row(
                "SELECT id, payment_id, booking_id, amount_cents, currency,
                        gateway_transaction_id, status, created_at, processed_at
                 FROM payments WHERE gateway_transaction_id = ?1",
                rusqlite::params![gateway_transaction_id],
                |row| {
                    let status: String = row.get(6)?;
                    let created: String = row.get(7)?;
                    let processed: Option<String> = row.get(8)?;
                    Ok(Payment {
                        id: row.get(0)?,
                        payment_id: row.get(1)?,
                        booking_id: row.get(2)?,
                        amount_cents: row.get(3)?,
                        currency: row.get(4)?,
                        gateway_transaction_id: row.get(5)?,
                        status: PaymentStatus::parse(&status).unwrap_or(PaymentStatus::Pending),
                        created_at: parse_ts(&created),
                        processed_at: parse_opt_ts(processed),
                    })
                },
            )
            .optional()
            .map_err(store_err("get payment"))
    }

    async fn has_completed(&self, booking_id: &str) -> Result<bool> {
        let count: i64 = self
            .lock()?
            .query_row(
                "SELECT COUNT(*) FROM payments WHERE booking_id = ?1 AND status = 'completed'",
                rusqlite::params![booking_id],
                |row| row.get(0),
            )
            .map_err(store_err("count completed payments"))?;
        Ok(count > 0)
    }

    async fn complete_by_transaction(&self, gateway_transaction_id: &str) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE payments SET status = 'completed', processed_at = ?2
                 WHERE gateway_transaction_id = ?1 AND status = 'pending'",
                rusqlite::params![gateway_transaction_id, Utc::now().to_rfc3339()],
            )
            .map_err(store_err("complete payment"))?;
        Ok(changed > 0)
    }

    async fn fail_by_transaction(&self, gateway_transaction_id: &str) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE payments SET status = 'failed', processed_at = ?2
                 WHERE gateway_transaction_id = ?1 AND status = 'pending'",
                rusqlite::params![gateway_transaction_id, Utc::now().to_rfc3339()],
            )
            .map_err(store_err("fail payment"))?;
        Ok(changed > 0)
    }
}

// ─── DriverStore ──────────────────────────────────────────

#[async_trait]
impl DriverStore for SqliteStore {
    async fn insert(&self, driver: &Driver) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO drivers (id, driver_id, first_name, last_name, email, phone, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    driver.id,
                    driver.driver_id,
                    driver.first_name,
                    driver.last_name,
                    driver.email,
                    driver.phone,
                    driver.created_at.to_rfc3339(),
                ],
            )
            .map_err(store_err("insert driver"))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Driver>> {
        self.lock()?
            .query_row(
                "SELECT id, driver_id, first_name, last_name, email, phone, created_at
                 FROM drivers WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    let created: String = row.get(6)?;
                    Ok(Driver {
                        id: row.get(0)?,
                        driver_id: row.get(1)?,
                        first_name: row.get(2)?,
                        last_name: row.get(3)?,
                        email: row.get(4)?,
                        phone: row.get(5)?,
                        created_at: parse_ts(&created),
                    })
                },
            )
            .optional()
            .map_err(store_err("get driver"))
    }

    async fn next_sequence(&self) -> Result<u32> {
        let last: Option<String> = self
            .lock()?
            .query_row(
                "SELECT driver_id FROM drivers ORDER BY created_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err("last driver id"))?;
        // "DRV012" -> 13; malformed references restart the sequence.
        Ok(last
            .and_then(|id| id.get(3..).and_then(|n| n.parse::<u32>().ok()))
            .map(|n| n + 1)
            .unwrap_or(1))
    }
}

// ─── NotificationStore ────────────────────────────────────

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn insert_unique(&self, notification: &Notification) -> Result<bool> {
        let inserted = self
            .lock()?
            .execute(
                "INSERT OR IGNORE INTO notifications (id, recipient_id, recipient_role,
                    recipient_email, kind, title, message, metadata, status, retry_count,
                    max_retries, email_sent, sms_sent, error_message, event_key, created_at, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    notification.id,
                    notification.recipient_id,
                    notification.recipient_role.as_str(),
                    notification.recipient_email,
                    notification.kind.as_str(),
                    notification.title,
                    notification.message,
                    serde_json::to_string(&notification.metadata)?,
                    notification.status.as_str(),
                    notification.retry_count,
                    notification.max_retries,
                    notification.email_sent as i64,
                    notification.sms_sent as i64,
                    notification.error_message,
                    notification.event_key,
                    notification.created_at.to_rfc3339(),
                    notification.sent_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(store_err("insert notification"))?;
        Ok(inserted > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<Notification>> {
        self.lock()?
            .query_row(
                &format!("SELECT {NOTIFICATION_COLS} FROM notifications WHERE id = ?1"),
                rusqlite::params![id],
                row_to_notification,
            )
            .optional()
            .map_err(store_err("get notification"))
    }

    async fn get_by_event_key(&self, event_key: &str) -> Result<Option<Notification>> {
        self.lock()?
            .query_row(
                &format!("SELECT {NOTIFICATION_COLS} FROM notifications WHERE event_key = ?1"),
                rusqlite::params![event_key],
                row_to_notification,
            )
            .optional()
            .map_err(store_err("get notification by event key"))
    }

    async fn apply_attempt(
        &self,
        id: &str,
        email_sent: bool,
        sms_sent: bool,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<()> {
        // MAX keeps a channel flag sticky: a later failed attempt never
        // un-marks a channel that already delivered.
        self.lock()?
            .execute(
                "UPDATE notifications SET
                    email_sent = MAX(email_sent, ?2),
                    sms_sent = MAX(sms_sent, ?3),
                    status = ?4,
                    error_message = ?5,
                    sent_at = CASE WHEN ?4 = 'sent' THEN ?6 ELSE sent_at END
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    email_sent as i64,
                    sms_sent as i64,
                    status.as_str(),
                    error,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_err("apply attempt"))?;
        Ok(())
    }

    async fn claim_for_retry(&self, id: &str) -> Result<bool> {
        let claimed = self
            .lock()?
            .execute(
                "UPDATE notifications SET retry_count = retry_count + 1, status = 'pending'
                 WHERE id = ?1 AND status = 'failed' AND retry_count < max_retries",
                rusqlite::params![id],
            )
            .map_err(store_err("claim for retry"))?;
        Ok(claimed > 0)
    }

    async fn pending_retry(&self) -> Result<Vec<Notification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLS} FROM notifications
                 WHERE status = 'failed' AND retry_count < max_retries
                 ORDER BY created_at"
            ))
            .map_err(store_err("pending retry"))?;
        let rows = stmt.query_map([], row_to_notification).map_err(store_err("pending retry"))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn failed_permanently(&self) -> Result<Vec<Notification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLS} FROM notifications
                 WHERE status = 'failed' AND retry_count >= max_retries
                 ORDER BY created_at"
            ))
            .map_err(store_err("failed permanently"))?;
        let rows =
            stmt.query_map([], row_to_notification).map_err(store_err("failed permanently"))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<Notification>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLS} FROM notifications ORDER BY created_at DESC LIMIT ?1"
            ))
            .map_err(store_err("recent notifications"))?;
        let rows = stmt
            .query_map(rusqlite::params![limit], row_to_notification)
            .map_err(store_err("recent notifications"))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

// ─── AuditStore ───────────────────────────────────────────

#[async_trait]
impl AuditStore for SqliteStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO audit_logs (id, actor_id, actor_role, action, resource_type,
                    resource_id, details, remote_addr, user_agent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    entry.id,
                    entry.actor_id,
                    entry.actor_role.as_str(),
                    entry.action,
                    entry.resource_type,
                    entry.resource_id,
                    entry.details.to_string(),
                    entry.origin.remote_addr,
                    entry.origin.user_agent,
                    entry.created_at.to_rfc3339(),
                ],
            )
            .map_err(store_err("append audit entry"))?;
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<AuditLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, actor_id, actor_role, action, resource_type, resource_id,
                        details, remote_addr, user_agent, created_at
                 FROM audit_logs ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(store_err("recent audit entries"))?;
        let rows = stmt
            .query_map(rusqlite::params![limit], |row| {
                let role: String = row.get(2)?;
                let details_raw: String = row.get(6)?;
                let created: String = row.get(9)?;
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    actor_id: row.get(1)?,
                    actor_role: parse_actor_role(&role),
                    action: row.get(3)?,
                    resource_type: row.get(4)?,
                    resource_id: row.get(5)?,
                    details: serde_json::from_str(&details_raw)
                        .unwrap_or(serde_json::Value::Null),
                    origin: RequestOrigin { remote_addr: row.get(7)?, user_agent: row.get(8)? },
                    created_at: parse_ts(&created),
                })
            })
            .map_err(store_err("recent audit entries"))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

// ─── VehicleRateStore / SettingsStore ─────────────────────

#[async_trait]
impl VehicleRateStore for SqliteStore {
    async fn available_rates(&self, vehicle_type: VehicleType) -> Result<Option<VehicleRates>> {
        self.lock()?
            .query_row(
                "SELECT vehicle_type, base_rate_cents, per_hour_rate_cents,
                        airport_surcharge_cents, minimum_charge_cents, available
                 FROM vehicle_rates WHERE vehicle_type = ?1 AND available = 1",
                rusqlite::params![vehicle_type.as_str()],
                |row| {
                    let vt: String = row.get(0)?;
                    Ok(VehicleRates {
                        vehicle_type: VehicleType::parse(&vt)
                            .unwrap_or(VehicleType::ExecutiveSedan),
                        base_rate_cents: row.get(1)?,
                        per_hour_rate_cents: row.get(2)?,
                        airport_surcharge_cents: row.get(3)?,
                        minimum_charge_cents: row.get(4)?,
                        available: row.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .optional()
            .map_err(store_err("available rates"))
    }

    async fn upsert_rates(&self, rates: &VehicleRates) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO vehicle_rates (vehicle_type, base_rate_cents,
                    per_hour_rate_cents, airport_surcharge_cents, minimum_charge_cents, available)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    rates.vehicle_type.as_str(),
                    rates.base_rate_cents,
                    rates.per_hour_rate_cents,
                    rates.airport_surcharge_cents,
                    rates.minimum_charge_cents,
                    rates.available as i64,
                ],
            )
            .map_err(store_err("upsert rates"))?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.lock()?
            .query_row(
                "SELECT setting_value FROM system_settings WHERE setting_key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err("get setting"))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO system_settings (setting_key, setting_value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )
            .map_err(store_err("set setting"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blx_core::ids;
    use blx_core::types::Actor;

    fn sample_booking() -> Booking {
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

    fn sample_notification(event_key: &str) -> Notification {
        let mut meta = BTreeMap::new();
        meta.insert("phone".to_string(), serde_json::json!("+15550001111"));
        Notification::new(
            "ada@example.com",
            RecipientRole::Customer,
            Some("ada@example.com"),
            NotificationKind::BookingConfirmation,
            "Booking Confirmation",
            "Your booking is created.",
            meta,
            event_key,
        )
    }

    #[tokio::test]
    async fn booking_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let b = sample_booking();
        BookingStore::insert(&store, &b).await.unwrap();
        let read = BookingStore::get(&store, &b.id).await.unwrap().unwrap();
        assert_eq!(read.booking_id, b.booking_id);
        assert_eq!(read.vehicle_type, VehicleType::ExecutiveSedan);
        assert_eq!(read.total_amount_cents, 9000);
        assert_eq!(read.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn transition_is_conditioned_on_prior_status() {
        let store = SqliteStore::in_memory().unwrap();
        let b = sample_booking();
        BookingStore::insert(&store, &b).await.unwrap();

        assert!(store
            .transition_status(&b.id, BookingStatus::Pending, BookingStatus::Assigned)
            .await
            .unwrap());
        // Second caller read the same prior state; it must lose.
        assert!(!store
            .transition_status(&b.id, BookingStatus::Pending, BookingStatus::Cancelled)
            .await
            .unwrap());
        let read = BookingStore::get(&store, &b.id).await.unwrap().unwrap();
        assert_eq!(read.status, BookingStatus::Assigned);
    }

    #[tokio::test]
    async fn mark_paid_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let b = sample_booking();
        BookingStore::insert(&store, &b).await.unwrap();

        assert!(store.mark_paid(&b.id).await.unwrap());
        assert!(!store.mark_paid(&b.id).await.unwrap());
        let read = BookingStore::get(&store, &b.id).await.unwrap().unwrap();
        assert_eq!(read.payment_state, PaymentState::Paid);
        assert_eq!(read.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn assign_driver_rejected_on_terminal_booking() {
        let store = SqliteStore::in_memory().unwrap();
        let b = sample_booking();
        BookingStore::insert(&store, &b).await.unwrap();
        store
            .transition_status(&b.id, BookingStatus::Pending, BookingStatus::Cancelled)
            .await
            .unwrap();
        assert!(!store.assign_driver(&b.id, "drv-1").await.unwrap());
    }

    #[tokio::test]
    async fn notification_event_key_is_at_most_once() {
        let store = SqliteStore::in_memory().unwrap();
        let n = sample_notification("booking_created:abc:customer");
        assert!(store.insert_unique(&n).await.unwrap());
        let dup = sample_notification("booking_created:abc:customer");
        assert!(!store.insert_unique(&dup).await.unwrap());
        // Original entry untouched.
        let read = store.get_by_event_key("booking_created:abc:customer").await.unwrap().unwrap();
        assert_eq!(read.id, n.id);
    }

    #[tokio::test]
    async fn claim_for_retry_single_winner() {
        let store = SqliteStore::in_memory().unwrap();
        let n = sample_notification("k1");
        store.insert_unique(&n).await.unwrap();
        store
            .apply_attempt(&n.id, false, true, DeliveryStatus::Failed, Some("smtp 550"))
            .await
            .unwrap();

        // Two cycles race for the same entry; exactly one wins.
        assert!(store.claim_for_retry(&n.id).await.unwrap());
        assert!(!store.claim_for_retry(&n.id).await.unwrap());
        let read = NotificationStore::get(&store, &n.id).await.unwrap().unwrap();
        assert_eq!(read.retry_count, 1);
    }

    #[tokio::test]
    async fn claim_refused_at_retry_cap() {
        let store = SqliteStore::in_memory().unwrap();
        let n = sample_notification("k2");
        store.insert_unique(&n).await.unwrap();
        for _ in 0..3 {
            store
                .apply_attempt(&n.id, false, false, DeliveryStatus::Failed, Some("down"))
                .await
                .unwrap();
            store.claim_for_retry(&n.id).await.unwrap();
        }
        store
            .apply_attempt(&n.id, false, false, DeliveryStatus::Failed, Some("down"))
            .await
            .unwrap();

        assert!(!store.claim_for_retry(&n.id).await.unwrap());
        let read = NotificationStore::get(&store, &n.id).await.unwrap().unwrap();
        assert_eq!(read.retry_count, read.max_retries);
        assert!(store.pending_retry().await.unwrap().is_empty());
        assert_eq!(store.failed_permanently().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn channel_flags_are_sticky() {
        let store = SqliteStore::in_memory().unwrap();
        let n = sample_notification("k3");
        store.insert_unique(&n).await.unwrap();

        store
            .apply_attempt(&n.id, false, true, DeliveryStatus::Failed, Some("email bounced"))
            .await
            .unwrap();
        // Retry that succeeds on email but reports sms false must keep sms_sent.
        store.apply_attempt(&n.id, true, false, DeliveryStatus::Sent, None).await.unwrap();

        let read = NotificationStore::get(&store, &n.id).await.unwrap().unwrap();
        assert!(read.email_sent);
        assert!(read.sms_sent);
        assert_eq!(read.status, DeliveryStatus::Sent);
        assert!(read.sent_at.is_some());
    }

    #[tokio::test]
    async fn driver_sequence_continues_from_last() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.next_sequence().await.unwrap(), 1);
        let d = Driver {
            id: ids::internal_id(),
            driver_id: ids::driver_reference(7),
            first_name: "Max".into(),
            last_name: "Verstappen".into(),
            email: "max@example.com".into(),
            phone: "+15550002222".into(),
            created_at: Utc::now(),
        };
        DriverStore::insert(&store, &d).await.unwrap();
        assert_eq!(store.next_sequence().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn payment_completion_conditional() {
        let store = SqliteStore::in_memory().unwrap();
        let b = sample_booking();
        let p = Payment::pending(&b, "pi_123", Utc::now());
        PaymentStore::insert(&store, &p).await.unwrap();

        assert!(!store.has_completed(&b.id).await.unwrap());
        assert!(store.complete_by_transaction("pi_123").await.unwrap());
        assert!(!store.complete_by_transaction("pi_123").await.unwrap());
        assert!(store.has_completed(&b.id).await.unwrap());
    }

    #[tokio::test]
    async fn audit_append_and_read_back() {
        let store = SqliteStore::in_memory().unwrap();
        let entry = AuditLogEntry::new(
            &Actor::admin("adm-1"),
            "booking_status_updated",
            "booking",
            "b-1",
            serde_json::json!({"old_status": "pending", "new_status": "assigned"}),
            RequestOrigin { remote_addr: "10.0.0.1".into(), user_agent: "ops-cli".into() },
        );
        store.append(&entry).await.unwrap();
        let read = AuditStore::recent(&store, 10).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].action, "booking_status_updated");
        assert_eq!(read[0].origin.remote_addr, "10.0.0.1");
    }

    #[tokio::test]
    async fn rates_and_settings_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.available_rates(VehicleType::LuxurySuv).await.unwrap().is_none());

        store
            .upsert_rates(&VehicleRates {
                vehicle_type: VehicleType::LuxurySuv,
                base_rate_cents: 3500,
                per_hour_rate_cents: 9500,
                airport_surcharge_cents: 1000,
                minimum_charge_cents: None,
                available: true,
            })
            .await
            .unwrap();
        let rates = store.available_rates(VehicleType::LuxurySuv).await.unwrap().unwrap();
        assert_eq!(rates.per_hour_rate_cents, 9500);

        SettingsStore::set(&store, "sprinter_van_base_rate", "4500").await.unwrap();
        assert_eq!(
            SettingsStore::get(&store, "sprinter_van_base_rate").await.unwrap().as_deref(),
            Some("4500")
        );
    }
}
