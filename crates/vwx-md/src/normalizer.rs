//! Raw tick → [`MarketUpdate`] normalization.
//!
//! Prices arrive as decimal strings and are converted to integer micros
//! without touching floating point. Shape checks (positive price,
//! non-negative volume) are the same ones the live sequencer applies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sequencer::{validate, TickError};
use crate::{Instrument, MarketUpdate, MICROS_PER_UNIT};

/// A tick as received from a feed or file, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTick {
    pub symbol: String,
    pub venue: String,
    /// UTC epoch milliseconds.
    pub ts_ms: i64,
    /// Decimal price string, at most 6 fractional digits.
    pub price: String,
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizerError {
    #[error("price field is empty")]
    EmptyPrice,

    #[error("price could not be parsed: '{0}'")]
    InvalidPrice(String),

    #[error("price has more than 6 decimal places (ambiguous micro conversion): '{0}'")]
    TooManyDecimalPlaces(String),

    #[error(transparent)]
    Tick(#[from] TickError),
}

/// Convert a decimal price string to integer micros deterministically.
///
/// Accepts an optional leading `+`, an integer part and an optional
/// fractional part of up to 6 digits. Negative prices are syntactically
/// accepted here and rejected by [`normalize`].
pub fn price_to_micros(s: &str) -> Result<i64, NormalizerError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(NormalizerError::EmptyPrice);
    }
    let invalid = || NormalizerError::InvalidPrice(s.to_string());

    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part)
    {
        return Err(invalid());
    }
    if frac_part.len() > 6 {
        return Err(NormalizerError::TooManyDecimalPlaces(s.to_string()));
    }

    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| invalid())?
    };
    let frac_val: i64 = if frac_part.is_empty() {
        0
    } else {
        let scale = 10_i64.pow(6 - frac_part.len() as u32);
        frac_part.parse::<i64>().map_err(|_| invalid())? * scale
    };

    let micros = int_val
        .checked_mul(MICROS_PER_UNIT)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(invalid)?;

    Ok(if negative { -micros } else { micros })
}

/// Normalize one raw tick.
pub fn normalize(raw: &RawTick) -> Result<MarketUpdate, NormalizerError> {
    let price_micros = price_to_micros(&raw.price)?;
    let update = MarketUpdate::new(
        Instrument::new(raw.symbol.trim(), raw.venue.trim()),
        raw.ts_ms,
        price_micros,
        raw.volume,
    );
    validate(&update)?;
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(price: &str, volume: i64) -> RawTick {
        RawTick {
            symbol: "SPY".into(),
            venue: "USA".into(),
            ts_ms: 1,
            price: price.into(),
            volume,
        }
    }

    #[test]
    fn whole_and_fractional_prices() {
        assert_eq!(price_to_micros("144").unwrap(), 144_000_000);
        assert_eq!(price_to_micros("144.5").unwrap(), 144_500_000);
        assert_eq!(price_to_micros("0.000001").unwrap(), 1);
        assert_eq!(price_to_micros(".25").unwrap(), 250_000);
        assert_eq!(price_to_micros("+1.").unwrap(), 1_000_000);
        assert_eq!(price_to_micros("-2.5").unwrap(), -2_500_000);
    }

    #[test]
    fn malformed_prices_rejected() {
        assert_eq!(price_to_micros("  "), Err(NormalizerError::EmptyPrice));
        assert!(matches!(
            price_to_micros("1.2.3"),
            Err(NormalizerError::InvalidPrice(_))
        ));
        assert!(matches!(
            price_to_micros("abc"),
            Err(NormalizerError::InvalidPrice(_))
        ));
        assert!(matches!(
            price_to_micros("."),
            Err(NormalizerError::InvalidPrice(_))
        ));
        assert!(matches!(
            price_to_micros("1.0000001"),
            Err(NormalizerError::TooManyDecimalPlaces(_))
        ));
        assert!(matches!(
            price_to_micros("99999999999999999"),
            Err(NormalizerError::InvalidPrice(_))
        ));
    }

    #[test]
    fn normalize_builds_update() {
        let u = normalize(&raw("10.25", 300)).unwrap();
        assert_eq!(u.instrument, Instrument::new("SPY", "USA"));
        assert_eq!(u.price_micros, 10_250_000);
        assert_eq!(u.volume, 300);
    }

    #[test]
    fn normalize_rejects_bad_shape() {
        assert_eq!(
            normalize(&raw("10", -1)),
            Err(NormalizerError::Tick(TickError::NegativeVolume(-1)))
        );
        assert_eq!(
            normalize(&raw("0", 1)),
            Err(NormalizerError::Tick(TickError::NonPositivePrice(0)))
        );
    }
}
