use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use procura_core::domain::agent::{AgentId, PairKey};
use procura_core::domain::negotiation::NegotiationId;
use procura_core::domain::summary::{NegotiationSummary, OfferTerms, PairOutcome};
use procura_core::domain::supplier::SupplierId;
use procura_core::rust_decimal::Decimal;

use super::codec::parse_timestamp;
use super::store::SqlConversationStore;
use super::{RepositoryError, SummaryRepository};

const SUMMARY_COLUMNS: &str = "id, negotiation_id, supplier_id, agent_id, outcome, exhaustion_reason,
    summary, offer_amount, offer_currency, created_at, updated_at";

#[async_trait]
impl SummaryRepository for SqlConversationStore {
    async fn find_summary(
        &self,
        pair: &PairKey,
    ) -> Result<Option<NegotiationSummary>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_summary_on(&mut conn, pair).await
    }

    async fn list_summaries(
        &self,
        id: &NegotiationId,
    ) -> Result<Vec<NegotiationSummary>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM negotiation_summary
             WHERE negotiation_id = ?
             ORDER BY created_at ASC, supplier_id ASC"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(summary_from_row).collect()
    }
}

pub(crate) async fn find_summary_on(
    conn: &mut SqliteConnection,
    pair: &PairKey,
) -> Result<Option<NegotiationSummary>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM negotiation_summary
         WHERE negotiation_id = ? AND supplier_id = ?"
    ))
    .bind(&pair.negotiation_id.0)
    .bind(&pair.supplier_id.0)
    .fetch_optional(conn)
    .await?;

    row.map(summary_from_row).transpose()
}

fn summary_from_row(row: SqliteRow) -> Result<NegotiationSummary, RepositoryError> {
    let outcome_raw: String = row.try_get("outcome")?;
    let reason_raw: Option<String> = row.try_get("exhaustion_reason")?;
    let outcome = PairOutcome::from_parts(&outcome_raw, reason_raw.as_deref()).ok_or_else(|| {
        RepositoryError::Decode(format!(
            "unknown summary outcome `{outcome_raw}` with reason {reason_raw:?}"
        ))
    })?;

    let amount: Option<String> = row.try_get("offer_amount")?;
    let currency: Option<String> = row.try_get("offer_currency")?;
    let offer = match (amount, currency) {
        (Some(amount), currency) => {
            let amount = Decimal::from_str(&amount).map_err(|error| {
                RepositoryError::Decode(format!("invalid offer amount `{amount}`: {error}"))
            })?;
            Some(OfferTerms::new(amount, currency.unwrap_or_else(|| "USD".to_string())))
        }
        (None, _) => None,
    };
    let agent_id: Option<String> = row.try_get("agent_id")?;

    Ok(NegotiationSummary {
        id: row.try_get("id")?,
        pair: PairKey::new(
            NegotiationId(row.try_get("negotiation_id")?),
            SupplierId(row.try_get("supplier_id")?),
        ),
        agent_id: agent_id.map(AgentId),
        outcome,
        summary: row.try_get("summary")?,
        offer,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
