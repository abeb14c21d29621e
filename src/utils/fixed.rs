//! Fixed-point arithmetic for vault accounting.
//!
//! Two percentage scales coexist and are kept apart by type:
//! - [`Pct100`]: health factors, leverage, concentration (`150` = 1.5x)
//! - [`Bps`]: fees, allocation caps, volatility, correlation (`1500` = 15%)
//!
//! External amounts arrive as raw integers in the token's native decimals and
//! are normalized to an 18-decimal [`Decimal`] before any comparison.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Decimal places of the common intermediate scale.
pub const WAD_DECIMALS: u32 = 18;

/// Largest native decimal count `rust_decimal` can represent.
const MAX_NATIVE_DECIMALS: u8 = 28;

/// Errors raised while moving between native integers and the WAD scale.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixedPointError {
    #[error("raw amount {raw} with {decimals} decimals exceeds the decimal range")]
    Overflow { raw: u128, decimals: u8 },
    #[error("amount {0} does not fit native units")]
    OutOfRange(Decimal),
    #[error("negative amount {0} cannot be expressed in native units")]
    Negative(Decimal),
    #[error("unsupported token decimals: {0}")]
    UnsupportedDecimals(u8),
}

/// Truncate a value to the 18-decimal intermediate scale.
pub fn normalize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(WAD_DECIMALS, RoundingStrategy::ToZero)
}

/// Convert a raw native amount (e.g. 6-decimal USDC) to the common scale.
pub fn from_native(raw: u128, decimals: u8) -> Result<Decimal, FixedPointError> {
    if decimals > MAX_NATIVE_DECIMALS {
        return Err(FixedPointError::UnsupportedDecimals(decimals));
    }
    let signed = i128::try_from(raw).map_err(|_| FixedPointError::Overflow { raw, decimals })?;
    let value = Decimal::try_from_i128_with_scale(signed, u32::from(decimals))
        .map_err(|_| FixedPointError::Overflow { raw, decimals })?;
    Ok(normalize(value))
}

/// Convert a normalized amount back to raw native units, rounding down.
pub fn to_native(amount: Decimal, decimals: u8) -> Result<u128, FixedPointError> {
    if decimals > MAX_NATIVE_DECIMALS {
        return Err(FixedPointError::UnsupportedDecimals(decimals));
    }
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(FixedPointError::Negative(amount));
    }
    let scale = Decimal::from_i128_with_scale(10i128.pow(u32::from(decimals)), 0);
    amount
        .checked_mul(scale)
        .and_then(|scaled| scaled.trunc().to_u128())
        .ok_or(FixedPointError::OutOfRange(amount))
}

/// Interpret a raw 18-decimal integer (oracle prices, WAD amounts).
pub fn from_wad(raw: u128) -> Result<Decimal, FixedPointError> {
    from_native(raw, WAD_DECIMALS as u8)
}

/// Encode a normalized value as a raw 18-decimal integer.
pub fn to_wad(value: Decimal) -> Result<u128, FixedPointError> {
    to_native(value, WAD_DECIMALS as u8)
}

/// USD value of `amount` whole units at `price` USD per unit.
pub fn usd_value(amount: Decimal, price: Decimal) -> Decimal {
    normalize(amount * price)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        normalize(numerator / denominator)
    }
}

/// Calculate weighted average.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    safe_div(sum, weight_sum)
}

/// Percentage on the 100-denominator scale (`150` = 1.5x).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pct100(pub u32);

impl Pct100 {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Multiplier form (`150` -> `1.5`).
    pub fn as_ratio(self) -> Decimal {
        Decimal::from(self.0) / dec!(100)
    }

    /// Apply this percentage to an amount.
    pub fn of(self, amount: Decimal) -> Decimal {
        normalize(amount * Decimal::from(self.0) / dec!(100))
    }

    /// Express a raw ratio (e.g. `1.875`) on the 100 scale (`187.5`).
    pub fn scale(ratio: Decimal) -> Decimal {
        normalize(ratio * dec!(100))
    }
}

impl fmt::Display for Pct100 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/100", self.0)
    }
}

/// Basis points on the 10000-denominator scale (`1500` = 15%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bps(pub u32);

impl Bps {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Fractional form (`1500` -> `0.15`).
    pub fn as_fraction(self) -> Decimal {
        Decimal::from(self.0) / dec!(10000)
    }

    /// Apply this rate to an amount.
    pub fn of(self, amount: Decimal) -> Decimal {
        normalize(amount * self.as_fraction())
    }

    /// Convert a fraction (`0.15`) to basis points, rounding down.
    pub fn from_fraction(fraction: Decimal) -> Self {
        let bps = (fraction * dec!(10000)).floor().to_u32().unwrap_or(0);
        Self(bps)
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}
