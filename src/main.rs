//! # BLX Booking Backend
//!
//! Operator CLI and long-running worker for the BLuxA transportation
//! backend: bookings, payments, driver assignment, notification
//! dispatch with durable retry.
//!
//! Usage:
//!   blx serve                          # Run the notification retry worker
//!   blx book --pickup "..." ...        # Create a booking
//!   blx webhook --payload '...' --signature 't=..,v1=..'
//!   blx bookings --limit 20            # Recent bookings

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use blx_booking::{
    AuditRecorder, BookingRequest, BookingService, DriverRequest, SignatureVerifier,
    TieredPricing,
};
use blx_channels::{SmtpEmailSender, WhatsAppSender};
use blx_core::config::BlxConfig;
use blx_core::traits::{BookingStore, EmailSender, MessageSender, NotificationStore};
use blx_core::types::{Actor, BookingStatus, RequestOrigin, VehicleType};
use blx_notify::{spawn_retry_loop, Dispatcher, RetryScheduler};
use blx_store::SqliteStore;

#[derive(Parser)]
#[command(name = "blx", version, about = "BLX transportation booking backend")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.blx/config.toml")]
    config: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the notification retry worker until interrupted
    Serve,
    /// Create a booking
    Book {
        #[arg(long)]
        pickup: String,
        #[arg(long)]
        destination: String,
        #[arg(long)]
        date: String,
        #[arg(long)]
        time: String,
        /// executive_sedan | luxury_suv | sprinter_van
        #[arg(long, default_value = "executive_sedan")]
        vehicle: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
        /// Estimated duration in minutes
        #[arg(long, default_value = "60")]
        duration: u32,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Record a pending payment for a booking
    PayIntent {
        #[arg(long)]
        booking: String,
        /// Gateway transaction id from the checkout session
        #[arg(long)]
        transaction: String,
    },
    /// Apply a signed payment-gateway webhook
    Webhook {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        signature: String,
    },
    /// Move a booking to a new status
    UpdateStatus {
        #[arg(long)]
        booking: String,
        /// pending | assigned | confirmed | completed | cancelled
        #[arg(long)]
        status: String,
    },
    /// Register a driver
    RegisterDriver {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
    },
    /// Assign a driver to a booking
    AssignDriver {
        #[arg(long)]
        booking: String,
        #[arg(long)]
        driver: String,
    },
    /// List recent bookings
    Bookings {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// List recent notification ledger entries
    Notifications {
        #[arg(long, default_value = "20")]
        limit: u32,
        /// Only entries that exhausted their retries
        #[arg(long)]
        failed: bool,
    },
    /// Run one retry sweep immediately
    Retry,
}

struct App {
    store: Arc<SqliteStore>,
    service: BookingService,
    scheduler: Arc<RetryScheduler>,
    config: BlxConfig,
}

fn build(config: BlxConfig) -> Result<App> {
    let db_path = shellexpand::tilde(&config.store.db_path).to_string();
    let store = Arc::new(SqliteStore::open(Path::new(&db_path))?);

    let email: Arc<dyn EmailSender> = Arc::new(SmtpEmailSender::new(config.email.clone()));
    let messages: Arc<dyn MessageSender> = Arc::new(WhatsAppSender::new(config.whatsapp.clone()));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), email.clone(), messages.clone()));

    let service = BookingService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(TieredPricing::new(store.clone(), store.clone())),
        AuditRecorder::new(store.clone()),
        SignatureVerifier::new(&config.gateway),
        dispatcher,
    );
    let scheduler = Arc::new(RetryScheduler::new(store.clone(), email, messages));
    Ok(App { store, service, scheduler, config })
}

fn cli_actor() -> Actor {
    Actor::admin("cli")
}

fn cli_origin() -> RequestOrigin {
    RequestOrigin { remote_addr: "local".into(), user_agent: "blx-cli".into() }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "blx=debug" } else { "blx=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = shellexpand::tilde(&cli.config).to_string();
    let config = BlxConfig::load(Path::new(&config_path)).context("loading configuration")?;
    let app = build(config)?;

    match cli.command {
        Command::Serve => {
            let handle = spawn_retry_loop(app.scheduler.clone(), app.config.scheduler.clone());
            tracing::info!("worker running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            handle.abort();
        }
        Command::Book {
            pickup,
            destination,
            date,
            time,
            vehicle,
            name,
            email,
            phone,
            duration,
            notes,
        } => {
            let vehicle_type = VehicleType::parse(&vehicle)
                .ok_or_else(|| anyhow!("unknown vehicle type: {vehicle}"))?;
            let booking = app
                .service
                .create_booking(
                    BookingRequest {
                        pickup_address: pickup,
                        destination_address: destination,
                        pickup_date: date,
                        pickup_time: time,
                        vehicle_type,
                        customer_name: name,
                        customer_email: email,
                        customer_phone: phone,
                        estimated_duration_minutes: duration,
                        special_requests: notes,
                    },
                    &cli_actor(),
                    &cli_origin(),
                )
                .await?;
            print_json(&booking)?;
        }
        Command::PayIntent { booking, transaction } => {
            let payment = app
                .service
                .create_payment_intent(&booking, &transaction, &cli_actor(), &cli_origin())
                .await?;
            print_json(&payment)?;
        }
        Command::Webhook { payload, signature } => {
            app.service.apply_gateway_event(&payload, &signature, &cli_origin()).await?;
            tracing::info!("gateway event applied");
        }
        Command::UpdateStatus { booking, status } => {
            let new_status = BookingStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown status: {status}"))?;
            let updated = app
                .service
                .update_status(&booking, new_status, &cli_actor(), &cli_origin())
                .await?;
            print_json(&updated)?;
        }
        Command::RegisterDriver { first_name, last_name, email, phone } => {
            let driver = app
                .service
                .register_driver(
                    DriverRequest { first_name, last_name, email, phone },
                    &cli_actor(),
                    &cli_origin(),
                )
                .await?;
            print_json(&driver)?;
        }
        Command::AssignDriver { booking, driver } => {
            let updated =
                app.service.assign_driver(&booking, &driver, &cli_actor(), &cli_origin()).await?;
            print_json(&updated)?;
        }
        Command::Bookings { limit } => {
            let bookings = BookingStore::recent(&*app.store, limit).await?;
            print_json(&bookings)?;
        }
        Command::Notifications { limit, failed } => {
            if failed {
                print_json(&app.store.failed_permanently().await?)?;
            } else {
                print_json(&NotificationStore::recent(&*app.store, limit).await?)?;
            }
        }
        Command::Retry => {
            let delivered = app.scheduler.retry_pending().await?;
            tracing::info!("retry sweep delivered {delivered} notification(s)");
        }
    }
    Ok(())
}
