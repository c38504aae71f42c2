//! Slice sizing and price-favorability policy.
//!
//! Every valid [`SlicePolicy`] yields a unit of at least one share, so a
//! ticket that keeps seeing favorable prices is exhausted in at most
//! `remaining` slices (far fewer in practice).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Side;

/// Configuration errors. A ticket whose policy fails validation is never
/// created.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("fixed_lot.lot must be > 0, got {0}")]
    NonPositiveLot(i64),

    #[error("fraction must be in (0, 1], got {0}")]
    FractionOutOfRange(f64),

    #[error("percent_of_volume.min_unit must be > 0, got {0}")]
    NonPositiveMinUnit(i64),

    #[error("lot_size must be > 0, got {0}")]
    NonPositiveLotSize(i64),
}

fn default_min_unit() -> i64 {
    1
}

/// How large a single slice may be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum SlicePolicy {
    /// A constant number of shares per slice.
    FixedLot { lot: i64 },
    /// `ceil(fraction × target quantity)` per slice.
    FractionOfTarget { fraction: f64 },
    /// `floor(fraction × triggering tick volume)`, never below `min_unit`.
    PercentOfVolume {
        fraction: f64,
        #[serde(default = "default_min_unit")]
        min_unit: i64,
    },
}

impl Default for SlicePolicy {
    fn default() -> Self {
        SlicePolicy::FixedLot { lot: 100 }
    }
}

impl SlicePolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        let check_fraction = |f: f64| {
            if f.is_finite() && f > 0.0 && f <= 1.0 {
                Ok(())
            } else {
                Err(PolicyError::FractionOutOfRange(f))
            }
        };
        match *self {
            SlicePolicy::FixedLot { lot } if lot <= 0 => Err(PolicyError::NonPositiveLot(lot)),
            SlicePolicy::FixedLot { .. } => Ok(()),
            SlicePolicy::FractionOfTarget { fraction } => check_fraction(fraction),
            SlicePolicy::PercentOfVolume { fraction, min_unit } => {
                check_fraction(fraction)?;
                if min_unit <= 0 {
                    return Err(PolicyError::NonPositiveMinUnit(min_unit));
                }
                Ok(())
            }
        }
    }

    /// Slice unit for a ticket whose current target is `target_qty`, on a
    /// tick that traded `tick_volume`. Always >= 1 for a validated policy.
    pub fn unit(&self, target_qty: i64, tick_volume: i64) -> i64 {
        let unit = match *self {
            SlicePolicy::FixedLot { lot } => lot,
            SlicePolicy::FractionOfTarget { fraction } => {
                (target_qty as f64 * fraction).ceil() as i64
            }
            SlicePolicy::PercentOfVolume { fraction, min_unit } => {
                ((tick_volume.max(0) as f64 * fraction).floor() as i64).max(min_unit)
            }
        };
        unit.max(1)
    }
}

/// Whether a price exactly at the VWAP counts as favorable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceComparison {
    /// Buy at or below VWAP, sell at or above.
    #[default]
    Inclusive,
    /// Buy strictly below VWAP, sell strictly above.
    Strict,
}

impl PriceComparison {
    /// `price_vs_vwap` is `price.cmp(&vwap)`.
    pub fn is_favorable(self, side: Side, price_vs_vwap: Ordering) -> bool {
        match (side, price_vs_vwap) {
            (Side::Buy, Ordering::Less) | (Side::Sell, Ordering::Greater) => true,
            (_, Ordering::Equal) => self == PriceComparison::Inclusive,
            _ => false,
        }
    }
}

/// The `execution:` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    pub slice_policy: SlicePolicy,
    /// Non-final slices are rounded down to a multiple of this.
    pub lot_size: i64,
    pub price_comparison: PriceComparison,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slice_policy: SlicePolicy::default(),
            lot_size: 1,
            price_comparison: PriceComparison::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.lot_size <= 0 {
            return Err(PolicyError::NonPositiveLotSize(self.lot_size));
        }
        self.slice_policy.validate()
    }
}
