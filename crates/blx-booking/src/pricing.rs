//! Tiered trip pricing.
//!
//! Rates resolve through three tiers: the vehicle catalog (an available
//! vehicle of the requested type), then per-type system settings, then
//! hardcoded defaults. Pricing is infallible by contract; a store error
//! during lookup degrades to the next tier rather than failing the
//! booking.

use std::sync::Arc;

use async_trait::async_trait;

use blx_core::traits::{PricingProvider, SettingsStore, VehicleRateStore};
use blx_core::types::{VehicleRates, VehicleType};

const DEFAULT_AIRPORT_SURCHARGE_CENTS: i64 = 1000;

fn default_rates(vehicle_type: VehicleType) -> VehicleRates {
    let (base, hourly) = match vehicle_type {
        VehicleType::ExecutiveSedan => (2500, 6500),
        VehicleType::LuxurySuv => (3500, 9500),
        VehicleType::SprinterVan => (4500, 12000),
    };
    VehicleRates {
        vehicle_type,
        base_rate_cents: base,
        per_hour_rate_cents: hourly,
        airport_surcharge_cents: DEFAULT_AIRPORT_SURCHARGE_CENTS,
        minimum_charge_cents: None,
        available: true,
    }
}

pub struct TieredPricing {
    catalog: Arc<dyn VehicleRateStore>,
    settings: Arc<dyn SettingsStore>,
}

impl TieredPricing {
    pub fn new(catalog: Arc<dyn VehicleRateStore>, settings: Arc<dyn SettingsStore>) -> Self {
        Self { catalog, settings }
    }

    async fn setting_cents(&self, key: &str) -> Option<i64> {
        match self.settings.get(key).await {
            Ok(Some(raw)) => raw.trim().parse::<i64>().ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("settings lookup for {key} failed, falling through: {e}");
                None
            }
        }
    }

    async fn resolve(&self, vehicle_type: VehicleType) -> VehicleRates {
        match self.catalog.available_rates(vehicle_type).await {
            Ok(Some(rates)) => return rates,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("vehicle catalog lookup failed, falling through: {e}");
            }
        }

        let prefix = vehicle_type.as_str();
        let base = self.setting_cents(&format!("{prefix}_base_rate")).await;
        let hourly = self.setting_cents(&format!("{prefix}_hourly_rate")).await;
        if let (Some(base), Some(hourly)) = (base, hourly) {
            let surcharge = self
                .setting_cents(&format!("{prefix}_airport_rate"))
                .await
                .unwrap_or(DEFAULT_AIRPORT_SURCHARGE_CENTS);
            return VehicleRates {
                vehicle_type,
                base_rate_cents: base,
                per_hour_rate_cents: hourly,
                airport_surcharge_cents: surcharge,
                minimum_charge_cents: None,
                available: true,
            };
        }

        default_rates(vehicle_type)
    }
}

#[async_trait]
impl PricingProvider for TieredPricing {
    async fn price_for(
        &self,
        vehicle_type: VehicleType,
        duration_minutes: u32,
        is_airport_transfer: bool,
    ) -> i64 {
        let rates = self.resolve(vehicle_type).await;
        let minimum = rates.minimum_charge_cents.unwrap_or(rates.base_rate_cents * 2);

        let price = if is_airport_transfer {
            // Airport transfers are flat: one hour of service plus surcharge.
            rates.per_hour_rate_cents + rates.airport_surcharge_cents
        } else {
            let hours = (i64::from(duration_minutes) + 59) / 60;
            rates.base_rate_cents + rates.per_hour_rate_cents * hours.max(1)
        };

        price.max(minimum)
    }

    async fn minimum_charge(&self, vehicle_type: VehicleType) -> i64 {
        let rates = self.resolve(vehicle_type).await;
        rates.minimum_charge_cents.unwrap_or(rates.base_rate_cents * 2)
    }
}
