//! Credit Validation Service
//!
//! Stateless re-checks of the financial invariants. The submission path runs
//! these on raw request fields before an aggregate exists; the consumer runs
//! them again on the constructed aggregate.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::credit::Credit;
use super::error::InvariantViolation;
use super::money::{Money, Percentage};

/// Absolute tolerance for financial equality checks.
pub const TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Stateless validation of credit invariants.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreditValidationService;

impl CreditValidationService {
    /// `base == billed - deduction` within [`TOLERANCE`].
    pub fn validate_calculation_base(
        billed: &Money,
        deduction: &Money,
        base: &Money,
    ) -> Result<(), InvariantViolation> {
        let expected = billed.value() - deduction.value();

        if (base.value() - expected).abs() > TOLERANCE {
            return Err(InvariantViolation::BaseCalculationMismatch {
                expected,
                actual: base.value(),
            });
        }

        Ok(())
    }

    /// `tax == base * rate / 100` within [`TOLERANCE`].
    pub fn validate_tax_amount(
        base: &Money,
        rate: &Percentage,
        tax: &Money,
    ) -> Result<(), InvariantViolation> {
        let expected = base.value() * rate.as_fraction();

        if (tax.value() - expected).abs() > TOLERANCE {
            return Err(InvariantViolation::TaxAmountMismatch {
                expected,
                actual: tax.value(),
            });
        }

        Ok(())
    }

    pub fn validate_constitution_date(
        date: NaiveDate,
        today: NaiveDate,
    ) -> Result<(), InvariantViolation> {
        if date > today {
            return Err(InvariantViolation::FutureConstitutionDate { date });
        }
        Ok(())
    }

    pub fn validate_positive_tax(tax: &Money) -> Result<(), InvariantViolation> {
        if tax.value() <= Decimal::ZERO {
            return Err(InvariantViolation::NonPositiveTaxAmount { value: tax.value() });
        }
        Ok(())
    }

    pub fn validate_deduction(billed: &Money, deduction: &Money) -> Result<(), InvariantViolation> {
        if deduction > billed {
            return Err(InvariantViolation::DeductionExceedsBilled {
                billed: billed.value(),
                deduction: deduction.value(),
            });
        }
        Ok(())
    }

    /// Both calculation checks against an existing aggregate.
    pub fn validate_calculations(credit: &Credit) -> Result<(), InvariantViolation> {
        Self::validate_calculation_base(
            credit.billed_amount(),
            credit.deduction_amount(),
            credit.calculation_base(),
        )?;
        Self::validate_tax_amount(credit.calculation_base(), credit.rate(), credit.tax_amount())
    }

    /// Full consistency policy for a constructed aggregate, evaluated as of `today`.
    pub fn validate_consistency(credit: &Credit, today: NaiveDate) -> Result<(), InvariantViolation> {
        Self::validate_constitution_date(credit.constitution_date(), today)?;
        Self::validate_positive_tax(credit.tax_amount())?;
        Self::validate_deduction(credit.billed_amount(), credit.deduction_amount())?;
        Self::validate_calculations(credit)
    }
}
