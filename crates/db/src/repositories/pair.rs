use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use procura_core::domain::agent::{AgentId, PairKey, PairState};
use procura_core::domain::message::{MessageId, MessageRole};
use procura_core::domain::negotiation::{NegotiationId, NegotiationStatus};
use procura_core::domain::summary::NewSummary;
use procura_core::domain::supplier::SupplierId;
use procura_core::errors::DomainError;
use procura_core::flows::NegotiatorState;

use super::codec::{format_timestamp, now, parse_timestamp, parse_u32};
use super::message::insert_message;
use super::negotiation::parse_status;
use super::store::{touch_negotiation, SqlConversationStore};
use super::summary::find_summary_on;
use super::{PairCommit, PairRepository, PairTransition, RepositoryError};

const PAIR_COLUMNS: &str = "id, negotiation_id, supplier_id, system_prompt, state, rounds,
    last_processed_message_id, state_version, updated_at";

#[async_trait]
impl PairRepository for SqlConversationStore {
    async fn load_pair(&self, pair: &PairKey) -> Result<Option<PairState>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_pair_on(&mut conn, pair).await
    }

    async fn list_pairs(&self, id: &NegotiationId) -> Result<Vec<PairState>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAIR_COLUMNS} FROM agent
             WHERE negotiation_id = ? AND role = 'negotiator'
             ORDER BY created_at ASC, supplier_id ASC"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(pair_from_row).collect()
    }

    async fn commit_pair_transition(
        &self,
        transition: PairTransition,
    ) -> Result<PairCommit, RepositoryError> {
        if let Some(message) = &transition.message {
            let same_pair = message.negotiation_id == transition.pair.negotiation_id
                && message.supplier_id.as_ref() == Some(&transition.pair.supplier_id);
            if !same_pair || message.role == MessageRole::Supplier {
                return Err(DomainError::InvariantViolation(format!(
                    "pair transition for {} carries a message for another pair or role",
                    transition.pair
                ))
                .into());
            }
        }

        let mut tx = self.pool.begin().await?;
        let updated_at = now();

        let result = sqlx::query(
            "UPDATE agent
             SET state = ?,
                 rounds = ?,
                 last_processed_message_id = ?,
                 state_version = state_version + 1,
                 updated_at = ?
             WHERE id = ?
               AND negotiation_id = ?
               AND supplier_id = ?
               AND role = 'negotiator'
               AND state_version = ?
               AND EXISTS (
                   SELECT 1 FROM negotiation
                   WHERE negotiation.id = agent.negotiation_id AND negotiation.status = 'active'
               )",
        )
        .bind(transition.to_state.as_str())
        .bind(i64::from(transition.rounds))
        .bind(transition.last_processed_message_id.as_ref().map(|id| id.0.as_str()))
        .bind(format_timestamp(updated_at))
        .bind(&transition.agent_id.0)
        .bind(&transition.pair.negotiation_id.0)
        .bind(&transition.pair.supplier_id.0)
        .bind(i64::from(transition.expected_version))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let error = explain_rejected_transition(&mut tx, &transition).await?;
            debug!(
                event_name = "negotiation.pair.commit_rejected",
                negotiation_id = %transition.pair.negotiation_id,
                supplier_id = %transition.pair.supplier_id,
                expected_version = transition.expected_version,
                error = %error,
                "pair transition rejected"
            );
            return Err(error);
        }

        let message = match &transition.message {
            Some(message) => Some(insert_message(&mut tx, message).await?),
            None => None,
        };

        let summary = match &transition.summary {
            Some(summary) => {
                upsert_summary(&mut tx, &transition.pair, &transition.agent_id, summary).await?;
                find_summary_on(&mut tx, &transition.pair).await?
            }
            None => None,
        };

        touch_negotiation(&mut tx, &transition.pair.negotiation_id).await?;
        let pair = load_pair_on(&mut tx, &transition.pair)
            .await?
            .ok_or_else(|| RepositoryError::not_found("pair", transition.pair.to_string()))?;
        tx.commit().await?;

        if pair.is_terminal() {
            self.signals.forget(&transition.pair);
        }

        Ok(PairCommit { pair, message, summary })
    }

    fn subscribe_replies(&self, pair: &PairKey) -> watch::Receiver<u64> {
        self.signals.subscribe(pair)
    }

    fn release_pair(&self, pair: &PairKey) {
        self.signals.forget(pair);
    }
}

async fn explain_rejected_transition(
    conn: &mut SqliteConnection,
    transition: &PairTransition,
) -> Result<RepositoryError, RepositoryError> {
    let row = sqlx::query(
        "SELECT a.state_version, n.status
         FROM agent a
         JOIN negotiation n ON n.id = a.negotiation_id
         WHERE a.id = ? AND a.negotiation_id = ? AND a.supplier_id = ? AND a.role = 'negotiator'",
    )
    .bind(&transition.agent_id.0)
    .bind(&transition.pair.negotiation_id.0)
    .bind(&transition.pair.supplier_id.0)
    .fetch_optional(conn)
    .await?;

    let Some(row) = row else {
        return Ok(RepositoryError::not_found("pair", transition.pair.to_string()));
    };

    let status_raw: String = row.try_get("status")?;
    let status = parse_status(&status_raw)?;
    if status != NegotiationStatus::Active {
        return Ok(RepositoryError::Inactive {
            negotiation_id: transition.pair.negotiation_id.0.clone(),
            status,
        });
    }

    let current_version = parse_u32("state_version", row.try_get("state_version")?)?;
    Ok(RepositoryError::Conflict(format!(
        "pair {} moved to version {current_version} before version {} could be replaced",
        transition.pair, transition.expected_version
    )))
}

async fn upsert_summary(
    conn: &mut SqliteConnection,
    pair: &PairKey,
    agent_id: &AgentId,
    summary: &NewSummary,
) -> Result<(), RepositoryError> {
    let timestamp = format_timestamp(now());
    sqlx::query(
        "INSERT INTO negotiation_summary (
            id, negotiation_id, supplier_id, agent_id, outcome, exhaustion_reason, summary,
            offer_amount, offer_currency, created_at, updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(negotiation_id, supplier_id) DO UPDATE SET
            agent_id = excluded.agent_id,
            outcome = excluded.outcome,
            exhaustion_reason = excluded.exhaustion_reason,
            summary = excluded.summary,
            offer_amount = excluded.offer_amount,
            offer_currency = excluded.offer_currency,
            updated_at = excluded.updated_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&pair.negotiation_id.0)
    .bind(&pair.supplier_id.0)
    .bind(&agent_id.0)
    .bind(summary.outcome.as_str())
    .bind(summary.outcome.exhaustion_reason().map(|reason| reason.as_str()))
    .bind(&summary.summary)
    .bind(summary.offer.as_ref().map(|offer| offer.amount.to_string()))
    .bind(summary.offer.as_ref().map(|offer| offer.currency.as_str()))
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(conn)
    .await?;
    Ok(())
}

async fn load_pair_on(
    conn: &mut SqliteConnection,
    pair: &PairKey,
) -> Result<Option<PairState>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {PAIR_COLUMNS} FROM agent
         WHERE negotiation_id = ? AND supplier_id = ? AND role = 'negotiator'"
    ))
    .bind(&pair.negotiation_id.0)
    .bind(&pair.supplier_id.0)
    .fetch_optional(conn)
    .await?;

    row.map(pair_from_row).transpose()
}

fn pair_from_row(row: SqliteRow) -> Result<PairState, RepositoryError> {
    let state_raw: String = row.try_get("state")?;
    let state = NegotiatorState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown negotiator state `{state_raw}`")))?;
    let last_processed: Option<String> = row.try_get("last_processed_message_id")?;

    Ok(PairState {
        agent_id: AgentId(row.try_get("id")?),
        pair: PairKey::new(
            NegotiationId(row.try_get("negotiation_id")?),
            SupplierId(row.try_get("supplier_id")?),
        ),
        system_prompt: row.try_get("system_prompt")?,
        state,
        rounds: parse_u32("rounds", row.try_get("rounds")?)?,
        last_processed_message_id: last_processed.map(MessageId),
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
