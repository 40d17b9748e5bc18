//! PostgreSQL credit repository
//!
//! Backed by the `credito` table. The unique index on `numero_credito` is the
//! last line of defence against duplicate inserts.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::domain::{Credit, CreditDraft, CreditNumber, CreditType, DomainError, NfseNumber};

use super::{cancellable, CreditRepository, RepositoryError};

/// Postgres error code for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATE class for data exceptions (numeric overflow, invalid format, ...)
const DATA_EXCEPTION_CLASS: &str = "22";

fn is_data_exception(code: &str) -> bool {
    code.starts_with(DATA_EXCEPTION_CLASS)
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, numero_credito, numero_nfse, data_constituicao, valor_issqn,
           tipo_credito, simples_nacional, aliquota, valor_faturado,
           valor_deducao, base_calculo
    FROM credito
"#;

type CreditRow = (
    i64,
    String,
    String,
    NaiveDate,
    Decimal,
    String,
    bool,
    Decimal,
    Decimal,
    Decimal,
    Decimal,
);

/// Credit repository on a Postgres pool
#[derive(Debug, Clone)]
pub struct PgCreditRepository {
    pool: PgPool,
}

impl PgCreditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, credit: &Credit) -> Result<i64, RepositoryError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO credito (
                numero_credito, numero_nfse, data_constituicao, valor_issqn,
                tipo_credito, simples_nacional, aliquota, valor_faturado,
                valor_deducao, base_calculo
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(credit.credit_number().as_str())
        .bind(credit.nfse_number().as_str())
        .bind(credit.constitution_date())
        .bind(credit.tax_amount().value())
        .bind(credit.credit_type().as_str())
        .bind(credit.simplified_tax_regime())
        .bind(credit.rate().value())
        .bind(credit.billed_amount().value())
        .bind(credit.deduction_amount().value())
        .bind(credit.calculation_base().value())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let code = match &e {
                sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
                _ => None,
            };
            match code.as_deref() {
                Some(UNIQUE_VIOLATION) => RepositoryError::DuplicateCreditNumber {
                    credit_number: credit.credit_number().to_string(),
                },
                Some(code) if is_data_exception(code) => {
                    RepositoryError::InvalidData(format!("{} (SQLSTATE {})", e, code))
                }
                _ => RepositoryError::Database(e),
            }
        })?;

        Ok(id)
    }
}

fn row_to_credit(row: CreditRow) -> Result<Credit, RepositoryError> {
    let (
        id,
        credit_number,
        nfse_number,
        constitution_date,
        tax_amount,
        credit_type,
        simplified_tax_regime,
        rate,
        billed_amount,
        deduction_amount,
        calculation_base,
    ) = row;

    let credit_type: CreditType = credit_type
        .parse()
        .map_err(|e| RepositoryError::CorruptRow(DomainError::from(e)))?;

    let draft = CreditDraft {
        credit_number,
        nfse_number,
        constitution_date,
        tax_amount,
        credit_type,
        simplified_tax_regime,
        rate,
        billed_amount,
        deduction_amount,
        calculation_base,
    };

    Ok(Credit::from_db_state(id, draft)?)
}

#[async_trait]
impl CreditRepository for PgCreditRepository {
    async fn add(&self, credit: &Credit, cancel: &CancellationToken) -> Result<i64, RepositoryError> {
        cancellable(cancel, self.insert(credit)).await
    }

    async fn find_by_credit_number(
        &self,
        credit_number: &CreditNumber,
        cancel: &CancellationToken,
    ) -> Result<Option<Credit>, RepositoryError> {
        cancellable(cancel, async {
            let row: Option<CreditRow> =
                sqlx::query_as(&format!("{} WHERE numero_credito = $1", SELECT_COLUMNS))
                    .bind(credit_number.as_str())
                    .fetch_optional(&self.pool)
                    .await?;

            row.map(row_to_credit).transpose()
        })
        .await
    }

    async fn find_by_nfse_number(
        &self,
        nfse_number: &NfseNumber,
        cancel: &CancellationToken,
    ) -> Result<Vec<Credit>, RepositoryError> {
        cancellable(cancel, async {
            let rows: Vec<CreditRow> = sqlx::query_as(&format!(
                "{} WHERE numero_nfse = $1 ORDER BY data_constituicao DESC, id DESC",
                SELECT_COLUMNS
            ))
            .bind(nfse_number.as_str())
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter().map(row_to_credit).collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    async fn exists(
        &self,
        credit_number: &CreditNumber,
        cancel: &CancellationToken,
    ) -> Result<bool, RepositoryError> {
        cancellable(cancel, async {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM credito WHERE numero_credito = $1)",
            )
            .bind(credit_number.as_str())
            .fetch_one(&self.pool)
            .await?;

            Ok::<_, RepositoryError>(exists)
        })
        .await
    }
}
