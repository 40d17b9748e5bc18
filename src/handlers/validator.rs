//! Credit request validation
//!
//! Checks a submitted payload field by field and then runs the two
//! calculation checks. Unlike aggregate construction, which stops at the
//! first failure, the validator collects every violation so the caller can
//! fix the whole request in one round trip.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{
    CreditType, CreditValidationService, Money, Percentage, MAX_IDENTIFIER_LEN,
};

use super::commands::{CreditPayload, SIMPLIFIED_REGIME_NO, SIMPLIFIED_REGIME_YES};

/// A single violated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every violation found in a request or batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("Validation failed: {} violation(s)", .errors.len())]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Merge another set, prefixing each field with `creditos[index].`
    pub fn extend_indexed(&mut self, index: usize, other: ValidationErrors) {
        self.errors.extend(other.errors.into_iter().map(|e| FieldError {
            field: format!("creditos[{}].{}", index, e.field),
            message: e.message,
        }));
    }

    /// All messages joined for logging and error details.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Validator for a single credit submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreditRequestValidator;

impl CreditRequestValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate against today's UTC date.
    pub fn validate(&self, payload: &CreditPayload) -> Result<(), ValidationErrors> {
        self.validate_as_of(payload, Utc::now().date_naive())
    }

    pub fn validate_as_of(
        &self,
        payload: &CreditPayload,
        today: NaiveDate,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        check_identifier(&mut errors, "numeroCredito", &payload.credit_number);
        check_identifier(&mut errors, "numeroNfse", &payload.nfse_number);

        match payload.constitution_date {
            None => errors.push("dataConstituicao", "dataConstituicao is required"),
            Some(date) if date > today => {
                errors.push("dataConstituicao", "dataConstituicao must not be in the future")
            }
            Some(_) => {}
        }

        if payload.tax_amount <= Decimal::ZERO {
            errors.push("valorIssqn", "valorIssqn must be greater than zero");
        }

        if payload.credit_type.trim().is_empty() {
            errors.push("tipoCredito", "tipoCredito is required");
        } else if payload.credit_type != CreditType::Issqn.as_str()
            && payload.credit_type != CreditType::Other.as_str()
        {
            errors.push("tipoCredito", "tipoCredito must be 'ISSQN' or 'Outros'");
        }

        if payload.simplified_tax_regime.trim().is_empty() {
            errors.push("simplesNacional", "simplesNacional is required");
        } else if payload.simplified_tax_regime != SIMPLIFIED_REGIME_YES
            && payload.simplified_tax_regime != SIMPLIFIED_REGIME_NO
        {
            errors.push("simplesNacional", "simplesNacional must be 'Sim' or 'Não'");
        }

        let rate = Percentage::named("aliquota", payload.rate);
        if rate.is_err() {
            errors.push("aliquota", "aliquota must be between 0 and 100");
        }

        let billed = non_negative(&mut errors, "valorFaturado", payload.billed_amount);
        let deduction = non_negative(&mut errors, "valorDeducao", payload.deduction_amount);
        let base = non_negative(&mut errors, "baseCalculo", payload.calculation_base);
        let tax = Money::named("valorIssqn", payload.tax_amount).ok();

        // Cross-field checks need well-formed operands; malformed ones are
        // already reported above.
        if let (Some(billed), Some(deduction), Some(base)) = (billed, deduction, base) {
            if let Err(e) =
                CreditValidationService::validate_calculation_base(&billed, &deduction, &base)
            {
                errors.push("baseCalculo", e.to_string());
            }

            if let (Ok(rate), Some(tax)) = (rate, tax) {
                if let Err(e) = CreditValidationService::validate_tax_amount(&base, &rate, &tax) {
                    errors.push("valorIssqn", e.to_string());
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_identifier(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(field, format!("{} is required", field));
    } else if value.chars().count() > MAX_IDENTIFIER_LEN {
        errors.push(
            field,
            format!("{} must have at most {} characters", field, MAX_IDENTIFIER_LEN),
        );
    }
}

fn non_negative(errors: &mut ValidationErrors, field: &'static str, value: Decimal) -> Option<Money> {
    match Money::named(field, value) {
        Ok(money) => Some(money),
        Err(_) => {
            errors.push(field, format!("{} must be greater than or equal to zero", field));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn valid() -> CreditPayload {
        CreditPayload {
            credit_number: "123456".to_string(),
            nfse_number: "7891011".to_string(),
            constitution_date: NaiveDate::from_ymd_opt(2024, 2, 25),
            tax_amount: dec!(1250),
            credit_type: "ISSQN".to_string(),
            simplified_tax_regime: "Sim".to_string(),
            rate: dec!(5),
            billed_amount: dec!(30000),
            deduction_amount: dec!(5000),
            calculation_base: dec!(25000),
        }
    }

    fn fields(errors: &ValidationErrors) -> Vec<&str> {
        errors.errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_valid_request() {
        assert!(CreditRequestValidator::new()
            .validate_as_of(&valid(), today())
            .is_ok());
    }

    #[test]
    fn test_base_mismatch_reported() {
        let mut payload = valid();
        payload.calculation_base = dec!(20000);

        let errors = CreditRequestValidator::new()
            .validate_as_of(&payload, today())
            .unwrap_err();

        assert!(fields(&errors).contains(&"baseCalculo"));
        assert!(errors.summary().contains("calculation base"));
    }

    #[test]
    fn test_rate_out_of_range() {
        let mut payload = valid();
        payload.rate = dec!(150);

        let errors = CreditRequestValidator::new()
            .validate_as_of(&payload, today())
            .unwrap_err();

        assert_eq!(fields(&errors), vec!["aliquota"]);
    }

    #[test]
    fn test_reports_every_missing_field() {
        let errors = CreditRequestValidator::new()
            .validate_as_of(&CreditPayload::default(), today())
            .unwrap_err();

        let fields = fields(&errors);
        for expected in [
            "numeroCredito",
            "numeroNfse",
            "dataConstituicao",
            "valorIssqn",
            "tipoCredito",
            "simplesNacional",
        ] {
            assert!(fields.contains(&expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_enumerations_are_exact() {
        let mut payload = valid();
        payload.credit_type = "issqn".to_string();
        payload.simplified_tax_regime = "sim".to_string();

        let errors = CreditRequestValidator::new()
            .validate_as_of(&payload, today())
            .unwrap_err();

        assert_eq!(fields(&errors), vec!["tipoCredito", "simplesNacional"]);
    }

    #[test]
    fn test_future_date_and_long_identifier() {
        let mut payload = valid();
        payload.constitution_date = today().succ_opt();
        payload.nfse_number = "1".repeat(51);

        let errors = CreditRequestValidator::new()
            .validate_as_of(&payload, today())
            .unwrap_err();

        assert_eq!(fields(&errors), vec!["numeroNfse", "dataConstituicao"]);
    }

    #[test]
    fn test_negative_amount_skips_cross_field_checks() {
        let mut payload = valid();
        payload.deduction_amount = dec!(-1);

        let errors = CreditRequestValidator::new()
            .validate_as_of(&payload, today())
            .unwrap_err();

        assert_eq!(fields(&errors), vec!["valorDeducao"]);
    }

    #[test]
    fn test_extend_indexed() {
        let mut all = ValidationErrors::default();
        let mut one = ValidationErrors::default();
        one.push("aliquota", "bad");
        all.extend_indexed(2, one);

        assert_eq!(all.errors[0].field, "creditos[2].aliquota");
        assert_eq!(all.to_string(), "Validation failed: 1 violation(s)");
    }
}
