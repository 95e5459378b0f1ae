//! Payment-gateway webhook signature verification.
//!
//! Header scheme: `t=<unix seconds>,v1=<hex hmac-sha256>`, where the MAC
//! is computed over `"{t}.{payload}"` with the shared webhook secret.
//! Verification is constant-time and rejects stale timestamps.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use blx_core::config::GatewayConfig;
use blx_core::error::{BlxError, Result};

type HmacSha256 = Hmac<Sha256>;

pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            secret: config.webhook_secret.clone(),
            tolerance_secs: config.signature_tolerance_secs,
        }
    }

    /// Verify `header` against `payload` at time `now` (unix seconds).
    pub fn verify(&self, payload: &str, header: &str, now: i64) -> Result<()> {
        if self.secret.is_empty() {
            return Err(BlxError::Authorization("webhook secret not configured".into()));
        }

        let (timestamp, signature) = parse_header(header)?;

        if (now - timestamp).abs() > self.tolerance_secs {
            return Err(BlxError::Authorization("webhook timestamp outside tolerance".into()));
        }

        let signature_bytes = decode_hex(signature)
            .ok_or_else(|| BlxError::Authorization("malformed webhook signature".into()))?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| BlxError::Authorization(format!("webhook secret unusable: {e}")))?;
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        mac.verify_slice(&signature_bytes)
            .map_err(|_| BlxError::Authorization("webhook signature mismatch".into()))
    }

    /// Produce a valid header for `payload` at `now`. Test fixtures and
    /// the demo CLI use this; the real gateway signs on its side.
    pub fn sign(&self, payload: &str, now: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| BlxError::Authorization(format!("webhook secret unusable: {e}")))?;
        mac.update(format!("{now}.{payload}").as_bytes());
        let digest = mac.finalize().into_bytes();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Ok(format!("t={now},v1={hex}"))
    }
}

fn parse_header(header: &str) -> Result<(i64, &str)> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => signature = Some(v),
            _ => {}
        }
    }
    match (timestamp, signature) {
        (Some(t), Some(s)) => Ok((t, s)),
        _ => Err(BlxError::Authorization("malformed signature header".into())),
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
