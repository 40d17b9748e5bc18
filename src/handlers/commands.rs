//! Command definitions
//!
//! Commands represent intentions to change the system state. The credit
//! payload doubles as the canonical wire message exchanged over the broker.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Credit, CreditDraft, CreditType, DomainError, InvalidValueError};

/// Wire value for an enrolled simplified-regime taxpayer
pub const SIMPLIFIED_REGIME_YES: &str = "Sim";
/// Wire value for a taxpayer outside the simplified regime
pub const SIMPLIFIED_REGIME_NO: &str = "Não";

// =========================================================================
// CreditPayload
// =========================================================================

/// Candidate credit as submitted by the caller and carried on the broker.
///
/// Every field defaults when absent so that a request missing several fields
/// still reaches the validator, which reports all of them at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditPayload {
    #[serde(rename = "numeroCredito")]
    pub credit_number: String,

    #[serde(rename = "numeroNfse")]
    pub nfse_number: String,

    /// `YYYY-MM-DD`; a full timestamp is accepted and truncated to its date
    #[serde(rename = "dataConstituicao", with = "wire_date")]
    pub constitution_date: Option<NaiveDate>,

    #[serde(rename = "valorIssqn", with = "rust_decimal::serde::float")]
    pub tax_amount: Decimal,

    /// `"ISSQN"` or `"Outros"`
    #[serde(rename = "tipoCredito")]
    pub credit_type: String,

    /// `"Sim"` or `"Não"`
    #[serde(rename = "simplesNacional")]
    pub simplified_tax_regime: String,

    #[serde(rename = "aliquota", with = "rust_decimal::serde::float")]
    pub rate: Decimal,

    #[serde(rename = "valorFaturado", with = "rust_decimal::serde::float")]
    pub billed_amount: Decimal,

    #[serde(rename = "valorDeducao", with = "rust_decimal::serde::float")]
    pub deduction_amount: Decimal,

    #[serde(rename = "baseCalculo", with = "rust_decimal::serde::float")]
    pub calculation_base: Decimal,
}

/// Parse the simplified-regime flag, ignoring case.
pub fn parse_simplified_regime(value: &str) -> Result<bool, InvalidValueError> {
    match value.trim().to_lowercase().as_str() {
        "sim" => Ok(true),
        "não" => Ok(false),
        _ => Err(InvalidValueError::Unrecognized {
            field: "simplesNacional",
            value: value.to_string(),
        }),
    }
}

impl TryFrom<&CreditPayload> for CreditDraft {
    type Error = DomainError;

    fn try_from(payload: &CreditPayload) -> Result<Self, Self::Error> {
        let constitution_date = payload
            .constitution_date
            .ok_or(InvalidValueError::Empty {
                field: "dataConstituicao",
            })?;

        Ok(CreditDraft {
            credit_number: payload.credit_number.clone(),
            nfse_number: payload.nfse_number.clone(),
            constitution_date,
            tax_amount: payload.tax_amount,
            credit_type: payload.credit_type.parse::<CreditType>()?,
            simplified_tax_regime: parse_simplified_regime(&payload.simplified_tax_regime)?,
            rate: payload.rate,
            billed_amount: payload.billed_amount,
            deduction_amount: payload.deduction_amount,
            calculation_base: payload.calculation_base,
        })
    }
}

impl From<&Credit> for CreditPayload {
    fn from(credit: &Credit) -> Self {
        Self {
            credit_number: credit.credit_number().to_string(),
            nfse_number: credit.nfse_number().to_string(),
            constitution_date: Some(credit.constitution_date()),
            tax_amount: credit.tax_amount().value(),
            credit_type: credit.credit_type().to_string(),
            simplified_tax_regime: if credit.simplified_tax_regime() {
                SIMPLIFIED_REGIME_YES.to_string()
            } else {
                SIMPLIFIED_REGIME_NO.to_string()
            },
            rate: credit.rate().value(),
            billed_amount: credit.billed_amount().value(),
            deduction_amount: credit.deduction_amount().value(),
            calculation_base: credit.calculation_base().value(),
        }
    }
}

/// Date field codec for the wire payload.
mod wire_date {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(date) => serializer.serialize_str(&date.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        if let Ok(date) = NaiveDate::parse_from_str(raw, FORMAT) {
            return Ok(Some(date));
        }
        if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Some(datetime.date_naive()));
        }
        if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(Some(datetime.date()));
        }

        Err(de::Error::custom(format!("invalid date: {}", raw)))
    }
}

// =========================================================================
// IntegrateCreditsCommand
// =========================================================================

/// Command to validate and publish a batch of candidate credits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrateCreditsCommand {
    pub credits: Vec<CreditPayload>,
}

impl IntegrateCreditsCommand {
    pub fn new(credits: Vec<CreditPayload>) -> Self {
        Self { credits }
    }
}

/// Result of a successful batch submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrateCreditsResult {
    pub success: bool,
    pub published: usize,
    pub message_ids: Vec<Uuid>,
}

// =========================================================================
// ProcessCreditCommand
// =========================================================================

/// Command to apply one delivered credit message to the store
#[derive(Debug, Clone)]
pub struct ProcessCreditCommand {
    pub payload: CreditPayload,
    pub message_id: Option<String>,
}

impl ProcessCreditCommand {
    pub fn new(payload: CreditPayload) -> Self {
        Self {
            payload,
            message_id: None,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// Outcome of applying a credit message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The credit was new and has been stored
    Created { id: i64 },
    /// A credit with the same number was already stored; nothing was written
    AlreadyExists,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn scenario_a() -> serde_json::Value {
        json!({
            "numeroCredito": "123456",
            "numeroNfse": "7891011",
            "dataConstituicao": "2024-02-25",
            "valorIssqn": 1250,
            "tipoCredito": "ISSQN",
            "simplesNacional": "Sim",
            "aliquota": 5,
            "valorFaturado": 30000,
            "valorDeducao": 5000,
            "baseCalculo": 25000
        })
    }

    #[test]
    fn test_payload_from_wire() {
        let payload: CreditPayload = serde_json::from_value(scenario_a()).unwrap();

        assert_eq!(payload.credit_number, "123456");
        assert_eq!(
            payload.constitution_date,
            NaiveDate::from_ymd_opt(2024, 2, 25)
        );
        assert_eq!(payload.tax_amount, dec!(1250));
        assert_eq!(payload.simplified_tax_regime, "Sim");
    }

    #[test]
    fn test_payload_accepts_timestamp_date() {
        let mut value = scenario_a();
        value["dataConstituicao"] = json!("2024-02-25T00:00:00");
        let payload: CreditPayload = serde_json::from_value(value).unwrap();
        assert_eq!(
            payload.constitution_date,
            NaiveDate::from_ymd_opt(2024, 2, 25)
        );
    }

    #[test]
    fn test_payload_missing_fields_default() {
        let payload: CreditPayload = serde_json::from_value(json!({})).unwrap();
        assert!(payload.credit_number.is_empty());
        assert!(payload.constitution_date.is_none());
        assert_eq!(payload.rate, Decimal::ZERO);
    }

    #[test]
    fn test_payload_serializes_canonical_shape() {
        let payload: CreditPayload = serde_json::from_value(scenario_a()).unwrap();
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["dataConstituicao"], "2024-02-25");
        assert_eq!(value["valorIssqn"].as_f64(), Some(1250.0));
        assert_eq!(value["tipoCredito"], "ISSQN");
    }

    #[test]
    fn test_draft_conversion() {
        let payload: CreditPayload = serde_json::from_value(scenario_a()).unwrap();
        let draft = CreditDraft::try_from(&payload).unwrap();

        assert_eq!(draft.credit_type, CreditType::Issqn);
        assert!(draft.simplified_tax_regime);
        assert_eq!(draft.calculation_base, dec!(25000));
    }

    #[test]
    fn test_draft_conversion_rejects_unknown_type() {
        let mut payload: CreditPayload = serde_json::from_value(scenario_a()).unwrap();
        payload.credit_type = "IPTU".to_string();

        assert!(matches!(
            CreditDraft::try_from(&payload),
            Err(DomainError::InvalidValue(InvalidValueError::Unrecognized {
                field: "tipoCredito",
                ..
            }))
        ));
    }

    #[test]
    fn test_simplified_regime_parsing() {
        assert_eq!(parse_simplified_regime("Sim"), Ok(true));
        assert_eq!(parse_simplified_regime("NÃO"), Ok(false));
        assert!(parse_simplified_regime("talvez").is_err());
    }
}
