//! Query Audit
//!
//! Every read of stored credits is recorded by publishing a
//! [`QueryAuditEvent`] to the broker's audit subject.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which read path produced the audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    #[serde(rename = "ConsultaPorNfse")]
    ByNfseNumber,
    #[serde(rename = "ConsultaPorNumeroCredito")]
    ByCreditNumber,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::ByNfseNumber => "ConsultaPorNfse",
            QueryType::ByCreditNumber => "ConsultaPorNumeroCredito",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record for one read query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAuditEvent {
    #[serde(rename = "tipoConsulta")]
    pub query_type: QueryType,

    /// NFS-e number or credit number, depending on the query type
    #[serde(rename = "numeroReferencia")]
    pub reference_number: String,

    #[serde(rename = "dataHora")]
    pub occurred_at: DateTime<Utc>,

    #[serde(rename = "detalhes", skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl QueryAuditEvent {
    pub fn new(query_type: QueryType, reference_number: impl Into<String>) -> Self {
        Self {
            query_type,
            reference_number: reference_number.into(),
            occurred_at: Utc::now(),
            details: None,
        }
    }

    pub fn by_nfse(nfse_number: &str) -> Self {
        Self::new(QueryType::ByNfseNumber, nfse_number)
            .with_details(format!("Query for NFS-e {}", nfse_number))
    }

    pub fn by_credit_number(credit_number: &str) -> Self {
        Self::new(QueryType::ByCreditNumber, credit_number)
            .with_details(format!("Query for credit {}", credit_number))
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = QueryAuditEvent::by_nfse("7891011");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["tipoConsulta"], "ConsultaPorNfse");
        assert_eq!(value["numeroReferencia"], "7891011");
        assert!(value["dataHora"].is_string());
        assert!(value["detalhes"].as_str().unwrap().contains("7891011"));
    }

    #[test]
    fn test_details_omitted_when_absent() {
        let event = QueryAuditEvent::new(QueryType::ByCreditNumber, "123456");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["tipoConsulta"], "ConsultaPorNumeroCredito");
        assert!(value.get("detalhes").is_none());
    }
}
