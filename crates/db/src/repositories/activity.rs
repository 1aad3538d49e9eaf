use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use procura_core::domain::activity::{ActivityAction, ActivityId, OrchestratorActivity};
use procura_core::domain::negotiation::NegotiationId;
use procura_core::domain::supplier::SupplierId;

use super::codec::{decode_map, encode_map, format_timestamp, is_foreign_key_violation, parse_timestamp};
use super::store::SqlConversationStore;
use super::{ActivityRepository, RepositoryError};

#[async_trait]
impl ActivityRepository for SqlConversationStore {
    async fn record_activity(&self, activity: OrchestratorActivity) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO orchestrator_activity (
                id, negotiation_id, supplier_id, action, summary, details_json, completed, occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&activity.id.0)
        .bind(&activity.negotiation_id.0)
        .bind(activity.supplier_id.as_ref().map(|id| id.0.as_str()))
        .bind(activity.action.as_str())
        .bind(&activity.summary)
        .bind(encode_map(&activity.details)?)
        .bind(activity.completed)
        .bind(format_timestamp(activity.occurred_at))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if is_foreign_key_violation(&error) {
                RepositoryError::not_found("negotiation", activity.negotiation_id.0.clone())
            } else {
                RepositoryError::Database(error)
            }
        })?;
        Ok(())
    }

    async fn list_activity(
        &self,
        id: &NegotiationId,
        supplier_id: Option<&SupplierId>,
    ) -> Result<Vec<OrchestratorActivity>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, negotiation_id, supplier_id, action, summary, details_json, completed, occurred_at
             FROM orchestrator_activity
             WHERE negotiation_id = ?
               AND (? IS NULL OR supplier_id = ?)
             ORDER BY occurred_at DESC, rowid DESC",
        )
        .bind(&id.0)
        .bind(supplier_id.map(|id| id.0.as_str()))
        .bind(supplier_id.map(|id| id.0.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(activity_from_row).collect()
    }
}

fn activity_from_row(row: SqliteRow) -> Result<OrchestratorActivity, RepositoryError> {
    let action_raw: String = row.try_get("action")?;
    let action = ActivityAction::parse(&action_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown activity action `{action_raw}`")))?;
    let details_raw: String = row.try_get("details_json")?;
    let supplier_id: Option<String> = row.try_get("supplier_id")?;

    Ok(OrchestratorActivity {
        id: ActivityId(row.try_get("id")?),
        negotiation_id: NegotiationId(row.try_get("negotiation_id")?),
        supplier_id: supplier_id.map(SupplierId),
        action,
        summary: row.try_get("summary")?,
        details: decode_map("details_json", &details_raw)?,
        completed: row.try_get("completed")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
