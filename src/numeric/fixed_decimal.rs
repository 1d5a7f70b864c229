// ============================================================================
// Fixed-Point Decimal
// Scaled-integer prices and quantities for the matching hot path
// ============================================================================

use super::errors::{NumericError, NumericResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Decimal stored as a count of `10^-PLACES` units.
///
/// Ordering is the ordering of the underlying `i64`, so `Price` can key the
/// book's level maps directly. Text and `rust_decimal` values are converted
/// at the edges; nothing inside the matcher touches `Decimal`.
///
/// # Example
/// ```
/// use symbol_matching_engine::numeric::{Price, Quantity};
///
/// let price: Price = "100.25".parse().unwrap();
/// let qty = Quantity::from_integer(4).unwrap();
/// assert_eq!(price.checked_mul(qty).unwrap(), Price::from_integer(401).unwrap());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct FixedDecimal<const PLACES: u8 = 9>(i64);

/// Price with 9 decimal places
pub type Price = FixedDecimal<9>;

/// Quantity with 9 decimal places
pub type Quantity = FixedDecimal<9>;

impl<const P: u8> FixedDecimal<P> {
    /// Units per whole number
    pub const SCALE: i64 = 10i64.pow(P as u32);

    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(Self::SCALE);
    pub const MAX: Self = Self(i64::MAX);

    #[inline]
    pub const fn from_raw(units: i64) -> Self {
        Self(units)
    }

    pub fn from_integer(value: i64) -> NumericResult<Self> {
        value
            .checked_mul(Self::SCALE)
            .map(Self)
            .ok_or(NumericError::OutOfRange)
    }

    #[inline]
    pub const fn raw_value(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn checked_add(self, rhs: Self) -> NumericResult<Self> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or(NumericError::OutOfRange)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> NumericResult<Self> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or(NumericError::OutOfRange)
    }

    /// Product rounded half away from zero, computed in i128.
    pub fn checked_mul(self, rhs: Self) -> NumericResult<Self> {
        let scale = i128::from(Self::SCALE);
        let product = i128::from(self.0) * i128::from(rhs.0);
        let rounded = (product + product.signum() * (scale / 2)) / scale;
        i64::try_from(rounded)
            .map(Self)
            .map_err(|_| NumericError::OutOfRange)
    }

    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Difference clamped at zero; remaining amounts never go negative.
    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0).max(0))
    }

    /// Exact conversion from `rust_decimal`.
    pub fn from_decimal(value: Decimal) -> NumericResult<Self> {
        let value = value.normalize();
        if value.scale() > u32::from(P) {
            return Err(NumericError::TooPrecise { max_places: P });
        }
        value
            .checked_mul(Decimal::from(Self::SCALE))
            .and_then(|units| units.to_i64())
            .map(Self)
            .ok_or(NumericError::OutOfRange)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from_i128_with_scale(i128::from(self.0), u32::from(P))
    }
}

impl<const P: u8> Add for FixedDecimal<P> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl<const P: u8> Sub for FixedDecimal<P> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl<const P: u8> std::iter::Sum for FixedDecimal<P> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl<const P: u8> fmt::Display for FixedDecimal<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_decimal(), f)
    }
}

impl<const P: u8> fmt::Debug for FixedDecimal<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<const P: u8> FromStr for FixedDecimal<P> {
    type Err = NumericError;

    fn from_str(s: &str) -> NumericResult<Self> {
        let s = s.trim();
        if s.is_empty() || s.contains(['e', 'E', '_']) {
            return Err(NumericError::Malformed);
        }
        let value = Decimal::from_str_exact(s).map_err(|_| NumericError::Malformed)?;
        Self::from_decimal(value)
    }
}

#[cfg(feature = "serde")]
impl<const P: u8> serde::Serialize for FixedDecimal<P> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de, const P: u8> serde::Deserialize<'de> for FixedDecimal<P> {
    fn deserialize<De: serde::Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        let text = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
