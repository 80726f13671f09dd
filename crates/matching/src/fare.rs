//! Fare and arrival estimates.
//!
//! Fares are integer cents: `max(500 + round(250 * km), 800)`, i.e. 5.00 base
//! plus 2.50 per kilometre with an 8.00 minimum.

pub const BASE_FARE_CENTS: u64 = 500;
pub const PER_KM_CENTS: f64 = 250.0;
pub const MINIMUM_FARE_CENTS: u64 = 800;

pub fn fare_cents(distance_km: f64) -> u64 {
    let distance_km = if distance_km.is_finite() {
        distance_km.max(0.0)
    } else {
        0.0
    };
    (BASE_FARE_CENTS + (PER_KM_CENTS * distance_km).round() as u64).max(MINIMUM_FARE_CENTS)
}

/// Minutes to cover `distance_km` at a constant `speed_kmh`.
pub fn estimated_arrival_minutes(distance_km: f64, speed_kmh: f64) -> f64 {
    if speed_kmh <= 0.0 {
        return f64::INFINITY;
    }
    distance_km / speed_kmh * 60.0
}

/// "17.50" for 1750 cents.
pub fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
