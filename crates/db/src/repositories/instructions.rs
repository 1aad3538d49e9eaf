use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use procura_core::domain::agent::PairKey;
use procura_core::domain::instructions::Instructions;
use procura_core::domain::negotiation::NegotiationId;
use procura_core::domain::supplier::SupplierId;

use super::codec::{format_timestamp, is_foreign_key_violation, parse_timestamp};
use super::store::{touch_negotiation, SqlConversationStore};
use super::{InstructionsRepository, RepositoryError};

#[async_trait]
impl InstructionsRepository for SqlConversationStore {
    async fn upsert_instructions(&self, instructions: Instructions) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO instructions (negotiation_id, supplier_id, text, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(negotiation_id, supplier_id) DO UPDATE SET
                text = excluded.text,
                updated_at = excluded.updated_at",
        )
        .bind(&instructions.pair.negotiation_id.0)
        .bind(&instructions.pair.supplier_id.0)
        .bind(&instructions.text)
        .bind(format_timestamp(instructions.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            if is_foreign_key_violation(&error) {
                RepositoryError::not_found("pair", instructions.pair.to_string())
            } else {
                RepositoryError::Database(error)
            }
        })?;

        touch_negotiation(&mut tx, &instructions.pair.negotiation_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_instructions(
        &self,
        pair: &PairKey,
    ) -> Result<Option<Instructions>, RepositoryError> {
        let row = sqlx::query(
            "SELECT negotiation_id, supplier_id, text, updated_at
             FROM instructions
             WHERE negotiation_id = ? AND supplier_id = ?",
        )
        .bind(&pair.negotiation_id.0)
        .bind(&pair.supplier_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(instructions_from_row).transpose()
    }

    async fn list_instructions(
        &self,
        id: &NegotiationId,
    ) -> Result<Vec<Instructions>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT negotiation_id, supplier_id, text, updated_at
             FROM instructions
             WHERE negotiation_id = ?
             ORDER BY supplier_id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(instructions_from_row).collect()
    }
}

fn instructions_from_row(row: SqliteRow) -> Result<Instructions, RepositoryError> {
    Ok(Instructions {
        pair: PairKey::new(
            NegotiationId(row.try_get("negotiation_id")?),
            SupplierId(row.try_get("supplier_id")?),
        ),
        text: row.try_get("text")?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use procura_core::domain::agent::PairKey;
    use procura_core::domain::instructions::Instructions;
    use procura_core::domain::negotiation::NegotiationId;

    use crate::repositories::test_support::{open_negotiation, setup_store};
    use crate::repositories::{InstructionsRepository, RepositoryError};

    #[tokio::test]
    async fn upsert_replaces_previous_text() {
        let store = setup_store().await;
        let (negotiation, suppliers) = open_negotiation(&store, 2).await;
        let key = PairKey::new(negotiation.id.clone(), suppliers[0].clone());

        store
            .upsert_instructions(Instructions::new(key.clone(), "Open at 2.10 USD"))
            .await
            .expect("first");
        store
            .upsert_instructions(Instructions::new(key.clone(), "Hold at 2.25 USD"))
            .await
            .expect("second");

        let found = store.find_instructions(&key).await.expect("find").expect("present");
        assert_eq!(found.text, "Hold at 2.25 USD");
        assert_eq!(store.list_instructions(&negotiation.id).await.expect("list").len(), 1);

        let other = PairKey::new(negotiation.id.clone(), suppliers[1].clone());
        assert!(store.find_instructions(&other).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn instructions_for_unknown_negotiation_are_not_found() {
        let store = setup_store().await;
        let (_, suppliers) = open_negotiation(&store, 1).await;
        let key = PairKey::new(NegotiationId("missing".to_string()), suppliers[0].clone());

        let error = store
            .upsert_instructions(Instructions::new(key, "anything"))
            .await
            .expect_err("missing negotiation");
        assert!(matches!(error, RepositoryError::NotFound { entity: "pair", .. }));
    }
}
