//! Money Module
//!
//! Single fixed-point currency type for every balance, amount and charge.
//! All conversions between client strings and internal values MUST go
//! through this module.
//!
//! ## Internal Representation
//! - `rust_decimal::Decimal` normalised to [`MONEY_SCALE`] (2) decimal places
//! - Never negative: subtraction is checked and returns `None` on underflow
//! - Bounded by [`Money::MAX`] (the `NUMERIC(20, 2)` column range); addition
//!   that must stay in range goes through [`Money::checked_add`]
//! - Serialized as a string ("1000.00") to preserve precision on the wire
//!
//! ## Usage
//! ```rust
//! use wallet_core::money::Money;
//!
//! let amount = Money::parse("200.5").unwrap();
//! assert_eq!(amount.to_string(), "200.50");
//! ```

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use thiserror::Error;

/// Decimal places carried by every amount (paise)
pub const MONEY_SCALE: u32 = 2;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount cannot be negative")]
    Negative,

    #[error("Amount must be greater than zero")]
    Zero,

    #[error("Amount exceeds the maximum of {max}")]
    TooLarge { max: Money },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Money
// ============================================================================

/// Non-negative fixed-point INR amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// 999999999999999999.99
    pub const MAX: Self = Self(Decimal::from_parts(1_661_992_959, 1_808_227_885, 5, false, 2));

    /// Build from a decimal, rejecting negatives, excess precision and
    /// values above [`Money::MAX`]
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative);
        }
        let normalized = value.normalize();
        if normalized.scale() > MONEY_SCALE {
            return Err(MoneyError::PrecisionOverflow {
                provided: normalized.scale(),
                max: MONEY_SCALE,
            });
        }
        Self::bounded(value)
    }

    /// Build from a decimal, rounding to paise (midpoint away from zero).
    ///
    /// Used for computed values such as percentage charges.
    pub fn round_from(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative);
        }
        Self::bounded(value.round_dp_with_strategy(
            MONEY_SCALE,
            RoundingStrategy::MidpointAwayFromZero,
        ))
    }

    /// Whole rupees
    pub fn from_rupees(rupees: u64) -> Self {
        Self::scaled(Decimal::from(rupees))
    }

    /// Parse a client string: "100", "0.5", "12.34"
    ///
    /// Rejects ".5", "5.", signs, exponents and more than two decimals.
    pub fn parse(s: &str) -> Result<Self, MoneyError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MoneyError::InvalidFormat("empty string".into()));
        }
        if s.starts_with('-') {
            return Err(MoneyError::Negative);
        }
        if s.starts_with('+') {
            return Err(MoneyError::InvalidFormat("explicit sign not allowed".into()));
        }
        if s.starts_with('.') {
            return Err(MoneyError::InvalidFormat("use 0.5 not .5".into()));
        }
        if s.ends_with('.') {
            return Err(MoneyError::InvalidFormat("use 5.0 not 5.".into()));
        }
        if !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(MoneyError::InvalidFormat(format!(
                "unexpected character in amount: {}",
                s
            )));
        }
        if let Some((_, frac)) = s.split_once('.')
            && frac.len() > MONEY_SCALE as usize
        {
            return Err(MoneyError::PrecisionOverflow {
                provided: frac.len() as u32,
                max: MONEY_SCALE,
            });
        }
        let value = Decimal::from_str(s).map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;
        Self::new(value)
    }

    /// Parse and require a strictly positive amount
    pub fn parse_positive(s: &str) -> Result<Self, MoneyError> {
        let amount = Self::parse(s)?;
        if amount.is_zero() {
            return Err(MoneyError::Zero);
        }
        Ok(amount)
    }

    /// Get the inner Decimal value
    #[inline]
    pub fn inner(self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Checked subtraction; `None` if the result would be negative
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        if rhs.0 > self.0 {
            None
        } else {
            Some(Self::scaled(self.0 - rhs.0))
        }
    }

    /// Checked addition; `None` if the sum exceeds [`Money::MAX`]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let sum = self.0.checked_add(rhs.0)?;
        if sum > Self::MAX.0 {
            None
        } else {
            Some(Self::scaled(sum))
        }
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, rhs: Self) -> Self {
        self.checked_sub(rhs).unwrap_or(Self::ZERO)
    }

    fn bounded(value: Decimal) -> Result<Self, MoneyError> {
        if value > Self::MAX.0 {
            return Err(MoneyError::TooLarge { max: Self::MAX });
        }
        Ok(Self::scaled(value))
    }

    fn scaled(value: Decimal) -> Self {
        let mut d = value;
        d.rescale(MONEY_SCALE);
        Self(d)
    }
}

/// Operands come from [`Money::new`] and stay far from the `Decimal` range.
/// Sums that are stored go through [`Money::checked_add`].
impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::scaled(self.0 + rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.prec$}", self.0, prec = MONEY_SCALE as usize)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Always serialize as string to preserve precision
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Money::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
