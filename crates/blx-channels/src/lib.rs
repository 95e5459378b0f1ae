//! Delivery channels.
//!
//! Each channel is a thin transport behind a core trait; deciding which
//! channels a notification needs, and recording outcomes, belongs to the
//! dispatcher. A disabled channel reports failure so that the ledger
//! records the undelivered channel instead of silently dropping it.

pub mod email;
pub mod whatsapp;

pub use email::SmtpEmailSender;
pub use whatsapp::WhatsAppSender;
