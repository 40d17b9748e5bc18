//! Money and Percentage
//!
//! Domain primitives for monetary amounts and rates. Both are validated and
//! rounded to two decimal places at construction time, so an instance can
//! never hold an out-of-range value.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::InvalidValueError;

/// Decimal places kept by money and percentages
const SCALE: u32 = 2;

const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Banker's rounding: a midpoint goes to the even neighbour (10.005 -> 10.00).
fn round(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Money represents a validated, non-negative monetary value.
///
/// # Invariants
/// - Value is never negative
/// - Exactly 2 decimal places after rounding
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use credit_ingest::domain::Money;
///
/// let amount = Money::new(Decimal::new(12346, 3)).unwrap();
/// assert_eq!(amount.value(), Decimal::new(1235, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Create a new Money value, rounding to 2 decimal places.
    ///
    /// # Errors
    /// - `InvalidValueError::Negative` if value < 0
    pub fn new(value: Decimal) -> Result<Self, InvalidValueError> {
        Self::named("money", value)
    }

    /// Same as [`Money::new`] but reports violations against `field`.
    pub fn named(field: &'static str, value: Decimal) -> Result<Self, InvalidValueError> {
        if value < Decimal::ZERO {
            return Err(InvalidValueError::Negative { field, value });
        }

        Ok(Self(round(value)))
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn add(&self, other: &Money) -> Result<Money, InvalidValueError> {
        let sum = self.0.checked_add(other.0).ok_or(InvalidValueError::Overflow)?;
        Money::new(sum)
    }

    /// Subtract another amount. Fails when the result would be negative.
    pub fn subtract(&self, other: &Money) -> Result<Money, InvalidValueError> {
        let difference = self.0.checked_sub(other.0).ok_or(InvalidValueError::Overflow)?;
        Money::new(difference)
    }

    pub fn multiply(&self, factor: Decimal) -> Result<Money, InvalidValueError> {
        let product = self.0.checked_mul(factor).ok_or(InvalidValueError::Overflow)?;
        Money::new(product)
    }

    pub fn divide(&self, divisor: Decimal) -> Result<Money, InvalidValueError> {
        if divisor.is_zero() {
            return Err(InvalidValueError::DivisionByZero);
        }

        let quotient = self.0.checked_div(divisor).ok_or(InvalidValueError::Overflow)?;
        Money::new(quotient)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = InvalidValueError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Money::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

/// Percentage in the closed range [0, 100], rounded to 2 decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Percentage(Decimal);

impl Percentage {
    pub fn new(value: Decimal) -> Result<Self, InvalidValueError> {
        Self::named("percentage", value)
    }

    pub fn named(field: &'static str, value: Decimal) -> Result<Self, InvalidValueError> {
        if value < Decimal::ZERO || value > ONE_HUNDRED {
            return Err(InvalidValueError::OutOfRange {
                field,
                value,
                min: Decimal::ZERO,
                max: ONE_HUNDRED,
            });
        }

        Ok(Self(round(value)))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// The rate as a fraction (5% -> 0.05).
    pub fn as_fraction(&self) -> Decimal {
        self.0 / ONE_HUNDRED
    }

    /// Apply this rate to an amount: `rate / 100 * amount`, rounded to 2 places.
    ///
    /// The fraction is at most 1, so the product never exceeds `amount`.
    pub fn apply_to(&self, amount: &Money) -> Money {
        Money(round(amount.value() * self.as_fraction()))
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.0)
    }
}

impl TryFrom<Decimal> for Percentage {
    type Error = InvalidValueError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Percentage::new(value)
    }
}

impl From<Percentage> for Decimal {
    fn from(percentage: Percentage) -> Self {
        percentage.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_rounds_half_to_even() {
        assert_eq!(Money::new(dec!(10.005)).unwrap().value(), dec!(10.00));
        assert_eq!(Money::new(dec!(10.015)).unwrap().value(), dec!(10.02));
        assert_eq!(Money::new(dec!(2.125)).unwrap().value(), dec!(2.12));
        assert_eq!(Money::new(dec!(10.0051)).unwrap().value(), dec!(10.01));
        assert_eq!(Money::new(dec!(10.004)).unwrap().value(), dec!(10.00));
    }

    #[test]
    fn test_percentage_rounds_half_to_even() {
        assert_eq!(Percentage::new(dec!(2.125)).unwrap().value(), dec!(2.12));
        assert_eq!(Percentage::new(dec!(2.135)).unwrap().value(), dec!(2.14));
    }

    #[test]
    fn test_money_overflow_is_an_error() {
        let max = Money::new(Decimal::MAX).unwrap();
        let one = Money::new(Decimal::ONE).unwrap();

        assert_eq!(max.add(&one), Err(InvalidValueError::Overflow));
        assert_eq!(max.multiply(dec!(2)), Err(InvalidValueError::Overflow));
        assert_eq!(max.divide(dec!(0.5)), Err(InvalidValueError::Overflow));
    }

    #[test]
    fn test_money_zero_allowed() {
        let money = Money::new(Decimal::ZERO).unwrap();
        assert!(money.is_zero());
        assert_eq!(money, Money::zero());
    }

    #[test]
    fn test_money_negative_rejected() {
        let result = Money::named("valorDeducao", dec!(-0.01));
        assert!(matches!(
            result,
            Err(InvalidValueError::Negative { field: "valorDeducao", .. })
        ));
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::new(dec!(30000)).unwrap();
        let b = Money::new(dec!(5000)).unwrap();

        assert_eq!(a.add(&b).unwrap().value(), dec!(35000));
        assert_eq!(a.subtract(&b).unwrap().value(), dec!(25000));
        assert_eq!(b.multiply(dec!(0.5)).unwrap().value(), dec!(2500));
        assert_eq!(a.divide(dec!(3)).unwrap().value(), dec!(10000.00));
        assert!(b.subtract(&a).is_err());
    }

    #[test]
    fn test_money_divide_by_zero() {
        let a = Money::new(dec!(1)).unwrap();
        assert_eq!(a.divide(Decimal::ZERO), Err(InvalidValueError::DivisionByZero));
    }

    #[test]
    fn test_money_ordering() {
        let small = Money::new(dec!(1.10)).unwrap();
        let large = Money::new(dec!(1.2)).unwrap();
        assert!(small < large);
        assert_eq!(Money::new(dec!(1.1)).unwrap(), small);
    }

    #[test]
    fn test_percentage_bounds() {
        assert!(Percentage::new(Decimal::ZERO).is_ok());
        assert!(Percentage::new(dec!(100)).is_ok());
        assert!(matches!(
            Percentage::new(dec!(150)),
            Err(InvalidValueError::OutOfRange { .. })
        ));
        assert!(Percentage::new(dec!(-1)).is_err());
    }

    #[test]
    fn test_percentage_apply_to() {
        let rate = Percentage::new(dec!(5)).unwrap();
        let base = Money::new(dec!(25000)).unwrap();
        assert_eq!(rate.apply_to(&base).value(), dec!(1250));

        let rate = Percentage::new(dec!(3.33)).unwrap();
        let base = Money::new(dec!(100.01)).unwrap();
        assert_eq!(rate.apply_to(&base).value(), dec!(3.33));
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::new(dec!(1500.7)).unwrap().to_string(), "1500.70");
        assert_eq!(Percentage::new(dec!(5)).unwrap().to_string(), "5.00%");
    }
}
