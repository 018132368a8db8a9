pub mod analytics;
pub mod engagement;
pub mod period;
pub mod postgres;
pub mod rows;
pub mod types;

/// Rounds to two decimals, the precision every published metric uses.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
