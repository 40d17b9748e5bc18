//! Credit Aggregate
//!
//! A constituted tax credit. The only way to obtain a `Credit` is through
//! [`Credit::create`], which builds every value object and checks the
//! cross-field invariants atomically. There is no mutation API.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::{DomainError, InvalidValueError};
use super::identifiers::{CreditNumber, NfseNumber};
use super::money::{Money, Percentage};
use super::validation::CreditValidationService;

/// Kind of constituted credit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreditType {
    #[serde(rename = "ISSQN")]
    Issqn,
    #[serde(rename = "Outros")]
    Other,
}

impl CreditType {
    pub const FIELD: &'static str = "tipoCredito";

    /// Wire and storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditType::Issqn => "ISSQN",
            CreditType::Other => "Outros",
        }
    }
}

impl std::fmt::Display for CreditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditType {
    type Err = InvalidValueError;

    /// Case-insensitive: "ISSQN", "issqn", "Outros", "OUTROS".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ISSQN" => Ok(CreditType::Issqn),
            "OUTROS" => Ok(CreditType::Other),
            _ => Err(InvalidValueError::Unrecognized {
                field: Self::FIELD,
                value: s.to_string(),
            }),
        }
    }
}

/// Raw fields for a credit, prior to validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditDraft {
    pub credit_number: String,
    pub nfse_number: String,
    pub constitution_date: NaiveDate,
    pub tax_amount: Decimal,
    pub credit_type: CreditType,
    pub simplified_tax_regime: bool,
    pub rate: Decimal,
    pub billed_amount: Decimal,
    pub deduction_amount: Decimal,
    pub calculation_base: Decimal,
}

/// Credit Aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    /// Storage-assigned identity, `None` until persisted
    id: Option<i64>,
    credit_number: CreditNumber,
    nfse_number: NfseNumber,
    constitution_date: NaiveDate,
    tax_amount: Money,
    credit_type: CreditType,
    simplified_tax_regime: bool,
    rate: Percentage,
    billed_amount: Money,
    deduction_amount: Money,
    calculation_base: Money,
}

impl Credit {
    /// Build and validate a credit as of today (UTC).
    pub fn create(draft: CreditDraft) -> Result<Self, DomainError> {
        Self::create_as_of(draft, Utc::now().date_naive())
    }

    /// Build and validate a credit, treating `today` as the current date.
    ///
    /// Value objects are built first and the first failure is returned.
    /// Invariants are then checked in a fixed order: future date, positive
    /// tax amount, calculation base, tax amount derivation.
    pub fn create_as_of(draft: CreditDraft, today: NaiveDate) -> Result<Self, DomainError> {
        let credit = Self {
            id: None,
            credit_number: CreditNumber::new(&draft.credit_number)?,
            nfse_number: NfseNumber::new(&draft.nfse_number)?,
            constitution_date: draft.constitution_date,
            tax_amount: Money::named("valorIssqn", draft.tax_amount)?,
            credit_type: draft.credit_type,
            simplified_tax_regime: draft.simplified_tax_regime,
            rate: Percentage::named("aliquota", draft.rate)?,
            billed_amount: Money::named("valorFaturado", draft.billed_amount)?,
            deduction_amount: Money::named("valorDeducao", draft.deduction_amount)?,
            calculation_base: Money::named("baseCalculo", draft.calculation_base)?,
        };

        CreditValidationService::validate_constitution_date(credit.constitution_date, today)?;
        CreditValidationService::validate_positive_tax(&credit.tax_amount)?;
        CreditValidationService::validate_calculations(&credit)?;

        Ok(credit)
    }

    /// Rebuild a credit from a stored row.
    ///
    /// Value objects are re-checked; cross-field invariants are not, since
    /// they held when the row was inserted and the date check is relative to
    /// insertion time.
    pub fn from_db_state(id: i64, draft: CreditDraft) -> Result<Self, DomainError> {
        Ok(Self {
            id: Some(id),
            credit_number: CreditNumber::new(&draft.credit_number)?,
            nfse_number: NfseNumber::new(&draft.nfse_number)?,
            constitution_date: draft.constitution_date,
            tax_amount: Money::named("valorIssqn", draft.tax_amount)?,
            credit_type: draft.credit_type,
            simplified_tax_regime: draft.simplified_tax_regime,
            rate: Percentage::named("aliquota", draft.rate)?,
            billed_amount: Money::named("valorFaturado", draft.billed_amount)?,
            deduction_amount: Money::named("valorDeducao", draft.deduction_amount)?,
            calculation_base: Money::named("baseCalculo", draft.calculation_base)?,
        })
    }

    /// Attach the identity assigned by the store.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn credit_number(&self) -> &CreditNumber {
        &self.credit_number
    }

    pub fn nfse_number(&self) -> &NfseNumber {
        &self.nfse_number
    }

    pub fn constitution_date(&self) -> NaiveDate {
        self.constitution_date
    }

    pub fn tax_amount(&self) -> &Money {
        &self.tax_amount
    }

    pub fn credit_type(&self) -> CreditType {
        self.credit_type
    }

    pub fn simplified_tax_regime(&self) -> bool {
        self.simplified_tax_regime
    }

    pub fn rate(&self) -> &Percentage {
        &self.rate
    }

    pub fn billed_amount(&self) -> &Money {
        &self.billed_amount
    }

    pub fn deduction_amount(&self) -> &Money {
        &self.deduction_amount
    }

    pub fn calculation_base(&self) -> &Money {
        &self.calculation_base
    }
}
