use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::info;

use procura_core::domain::agent::{Agent, AgentId, AgentRole};
use procura_core::domain::negotiation::{
    plan_status_change, Negotiation, NegotiationId, NegotiationStatus, NewNegotiation,
    StatusChange,
};
use procura_core::domain::supplier::SupplierId;

use super::codec::{format_timestamp, is_unique_violation, now, parse_timestamp};
use super::store::{supplier_exists, SqlConversationStore};
use super::{CreatedNegotiation, NegotiationRepository, RepositoryError};

const NEGOTIATION_COLUMNS: &str =
    "id, product, strategy, prompt, status, final_summary, created_at, updated_at";

#[async_trait]
impl NegotiationRepository for SqlConversationStore {
    async fn create_negotiation(
        &self,
        request: NewNegotiation,
    ) -> Result<CreatedNegotiation, RepositoryError> {
        request.validate()?;

        let mut tx = self.pool.begin().await?;
        for supplier in &request.suppliers {
            if !supplier_exists(&mut tx, &supplier.0).await? {
                return Err(RepositoryError::not_found("supplier", supplier.0.clone()));
            }
        }

        let created_at = now();
        let negotiation = Negotiation {
            id: NegotiationId::generate(),
            product: request.product.trim().to_string(),
            strategy: request.strategy.trim().to_string(),
            prompt: request.prompt,
            status: NegotiationStatus::Active,
            final_summary: None,
            created_at,
            updated_at: created_at,
        };

        sqlx::query(
            "INSERT INTO negotiation (
                id, product, strategy, prompt, status, final_summary, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&negotiation.id.0)
        .bind(&negotiation.product)
        .bind(&negotiation.strategy)
        .bind(&negotiation.prompt)
        .bind(negotiation.status.as_str())
        .bind(format_timestamp(created_at))
        .bind(format_timestamp(created_at))
        .execute(&mut *tx)
        .await?;

        let orchestrator = Agent {
            id: AgentId::generate(),
            negotiation_id: negotiation.id.clone(),
            supplier_id: None,
            role: AgentRole::Orchestrator,
            system_prompt: request.orchestrator_prompt,
            created_at,
        };
        insert_agent(&mut tx, &orchestrator).await?;

        let mut negotiators = Vec::with_capacity(request.suppliers.len());
        for supplier in request.suppliers {
            let agent = Agent {
                id: AgentId::generate(),
                negotiation_id: negotiation.id.clone(),
                supplier_id: Some(supplier),
                role: AgentRole::Negotiator,
                system_prompt: request.negotiator_prompt.clone(),
                created_at,
            };
            insert_agent(&mut tx, &agent).await?;
            negotiators.push(agent);
        }

        tx.commit().await?;

        info!(
            event_name = "negotiation.created",
            negotiation_id = %negotiation.id,
            product = %negotiation.product,
            strategy = %negotiation.strategy,
            suppliers = negotiators.len(),
            "negotiation created"
        );

        Ok(CreatedNegotiation { negotiation, orchestrator, negotiators })
    }

    async fn find_negotiation(
        &self,
        id: &NegotiationId,
    ) -> Result<Option<Negotiation>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {NEGOTIATION_COLUMNS} FROM negotiation WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(negotiation_from_row).transpose()
    }

    async fn list_negotiations(
        &self,
        status: Option<NegotiationStatus>,
    ) -> Result<Vec<Negotiation>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {NEGOTIATION_COLUMNS} FROM negotiation
                 WHERE status = ?
                 ORDER BY created_at DESC, id ASC"
            ))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {NEGOTIATION_COLUMNS} FROM negotiation ORDER BY created_at DESC, id ASC"
            ))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(negotiation_from_row).collect()
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<Negotiation>, RepositoryError> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT {NEGOTIATION_COLUMNS} FROM negotiation
             WHERE substr(id, 1, length(?)) = ?
             ORDER BY created_at ASC"
        ))
        .bind(&prefix)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(negotiation_from_row).collect()
    }

    async fn active_negotiations_for_supplier(
        &self,
        supplier_id: &SupplierId,
    ) -> Result<Vec<Negotiation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT n.id, n.product, n.strategy, n.prompt, n.status, n.final_summary,
                    n.created_at, n.updated_at
             FROM negotiation n
             JOIN agent a ON a.negotiation_id = n.id
             WHERE a.role = 'negotiator' AND a.supplier_id = ? AND n.status = 'active'
             ORDER BY n.created_at ASC",
        )
        .bind(&supplier_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(negotiation_from_row).collect()
    }

    async fn transition_negotiation(
        &self,
        id: &NegotiationId,
        next: NegotiationStatus,
        final_summary: Option<String>,
    ) -> Result<StatusChange, RepositoryError> {
        if next.is_terminal() {
            // Summary and status land in one guarded statement, so only one caller ever applies.
            let result = sqlx::query(
                "UPDATE negotiation
                 SET status = ?, final_summary = COALESCE(?, final_summary), updated_at = ?
                 WHERE id = ? AND status = 'active'",
            )
            .bind(next.as_str())
            .bind(final_summary.as_deref())
            .bind(format_timestamp(now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                info!(
                    event_name = "negotiation.status.changed",
                    negotiation_id = %id,
                    to = next.as_str(),
                    "negotiation status changed"
                );
                return Ok(StatusChange::Applied { from: NegotiationStatus::Active, to: next });
            }
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM negotiation WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        let current = current.ok_or_else(|| RepositoryError::not_found("negotiation", id.0.clone()))?;
        let current = parse_status(&current)?;

        Ok(plan_status_change(current, next)?)
    }

    async fn list_agents(&self, id: &NegotiationId) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, negotiation_id, supplier_id, role, system_prompt, created_at
             FROM agent
             WHERE negotiation_id = ?
             ORDER BY CASE role WHEN 'orchestrator' THEN 0 ELSE 1 END, created_at ASC, id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(agent_from_row).collect()
    }
}

async fn insert_agent(conn: &mut SqliteConnection, agent: &Agent) -> Result<(), RepositoryError> {
    let timestamp = format_timestamp(agent.created_at);
    sqlx::query(
        "INSERT INTO agent (
            id, negotiation_id, supplier_id, role, system_prompt, state, rounds,
            last_processed_message_id, state_version, created_at, updated_at
         ) VALUES (?, ?, ?, ?, ?, 'idle', 0, NULL, 0, ?, ?)",
    )
    .bind(&agent.id.0)
    .bind(&agent.negotiation_id.0)
    .bind(agent.supplier_id.as_ref().map(|supplier| supplier.0.as_str()))
    .bind(agent.role.as_str())
    .bind(&agent.system_prompt)
    .bind(&timestamp)
    .bind(&timestamp)
    .execute(conn)
    .await
    .map_err(|error| {
        if is_unique_violation(&error) {
            RepositoryError::Conflict(format!(
                "negotiation `{}` already has a {} agent{}",
                agent.negotiation_id,
                agent.role.as_str(),
                agent
                    .supplier_id
                    .as_ref()
                    .map(|supplier| format!(" for supplier `{supplier}`"))
                    .unwrap_or_default()
            ))
        } else {
            RepositoryError::Database(error)
        }
    })?;
    Ok(())
}

pub(crate) fn parse_status(value: &str) -> Result<NegotiationStatus, RepositoryError> {
    NegotiationStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown negotiation status `{value}`")))
}

pub(crate) fn negotiation_from_row(row: SqliteRow) -> Result<Negotiation, RepositoryError> {
    let status_raw: String = row.try_get("status")?;

    Ok(Negotiation {
        id: NegotiationId(row.try_get("id")?),
        product: row.try_get("product")?,
        strategy: row.try_get("strategy")?,
        prompt: row.try_get("prompt")?,
        status: parse_status(&status_raw)?,
        final_summary: row.try_get("final_summary")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn agent_from_row(row: SqliteRow) -> Result<Agent, RepositoryError> {
    let role_raw: String = row.try_get("role")?;
    let role = AgentRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown agent role `{role_raw}`")))?;
    let supplier_id: Option<String> = row.try_get("supplier_id")?;

    Ok(Agent {
        id: AgentId(row.try_get("id")?),
        negotiation_id: NegotiationId(row.try_get("negotiation_id")?),
        supplier_id: supplier_id.map(SupplierId),
        role,
        system_prompt: row.try_get("system_prompt")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use procura_core::domain::agent::AgentRole;
    use procura_core::domain::negotiation::{NegotiationStatus, NewNegotiation, StatusChange};
    use procura_core::domain::supplier::SupplierId;
    use procura_core::errors::DomainError;

    use crate::repositories::test_support::{seed_supplier, setup_store};
    use crate::repositories::{NegotiationRepository, RepositoryError};

    fn request(suppliers: Vec<SupplierId>) -> NewNegotiation {
        NewNegotiation {
            product: "nRF54L15".to_string(),
            strategy: "aggressive".to_string(),
            prompt: "buy 10k units".to_string(),
            suppliers,
            orchestrator_prompt: "coordinate".to_string(),
            negotiator_prompt: "negotiate".to_string(),
        }
    }

    #[tokio::test]
    async fn create_negotiation_writes_one_orchestrator_and_one_negotiator_per_supplier() {
        let store = setup_store().await;
        let s1 = seed_supplier(&store, "Nordic Parts", "s1@example.com").await;
        let s2 = seed_supplier(&store, "Baltic Chips", "s2@example.com").await;

        let created =
            store.create_negotiation(request(vec![s1.clone(), s2.clone()])).await.expect("create");

        assert_eq!(created.negotiation.status, NegotiationStatus::Active);
        assert_eq!(created.negotiators.len(), 2);

        let agents = store.list_agents(&created.negotiation.id).await.expect("agents");
        assert_eq!(agents.len(), 3);
        assert_eq!(agents[0].role, AgentRole::Orchestrator);
        assert_eq!(agents[0].supplier_id, None);
        let mut negotiator_suppliers: Vec<SupplierId> =
            agents[1..].iter().filter_map(|agent| agent.supplier_id.clone()).collect();
        negotiator_suppliers.sort();
        let mut expected = vec![s1, s2];
        expected.sort();
        assert_eq!(negotiator_suppliers, expected);

        let found = store
            .find_negotiation(&created.negotiation.id)
            .await
            .expect("find")
            .expect("negotiation exists");
        assert_eq!(found, created.negotiation);
    }

    #[tokio::test]
    async fn unknown_supplier_is_rejected_without_partial_writes() {
        let store = setup_store().await;
        let known = seed_supplier(&store, "Nordic Parts", "s1@example.com").await;

        let error = store
            .create_negotiation(request(vec![known, SupplierId("missing".to_string())]))
            .await
            .expect_err("unknown supplier");

        assert!(matches!(error, RepositoryError::NotFound { entity: "supplier", .. }));
        assert!(store.list_negotiations(None).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn duplicate_suppliers_are_rejected_before_any_write() {
        let store = setup_store().await;
        let s1 = seed_supplier(&store, "Nordic Parts", "s1@example.com").await;

        let error =
            store.create_negotiation(request(vec![s1.clone(), s1])).await.expect_err("duplicate");

        assert!(matches!(error, RepositoryError::Domain(DomainError::InvariantViolation(_))));
        assert!(store.list_negotiations(None).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn completing_twice_is_idempotent_and_never_reopens() {
        let store = setup_store().await;
        let s1 = seed_supplier(&store, "Nordic Parts", "s1@example.com").await;
        let created = store.create_negotiation(request(vec![s1])).await.expect("create");
        let id = created.negotiation.id;

        let first = store
            .transition_negotiation(&id, NegotiationStatus::Completed, Some("best: s1".to_string()))
            .await
            .expect("complete");
        assert!(first.applied());

        let second = store
            .transition_negotiation(&id, NegotiationStatus::Completed, Some("other".to_string()))
            .await
            .expect("complete again");
        assert_eq!(second, StatusChange::Unchanged { status: NegotiationStatus::Completed });

        let cancel = store
            .transition_negotiation(&id, NegotiationStatus::Cancelled, None)
            .await
            .expect("cancel after completion");
        assert!(!cancel.applied());

        let reopen = store.transition_negotiation(&id, NegotiationStatus::Active, None).await;
        assert!(matches!(
            reopen,
            Err(RepositoryError::Domain(DomainError::InvalidNegotiationTransition { .. }))
        ));

        let stored = store.find_negotiation(&id).await.expect("find").expect("exists");
        assert_eq!(stored.status, NegotiationStatus::Completed);
        assert_eq!(stored.final_summary.as_deref(), Some("best: s1"));
    }

    #[tokio::test]
    async fn prefix_lookup_and_supplier_scoped_listing() {
        let store = setup_store().await;
        let s1 = seed_supplier(&store, "Nordic Parts", "s1@example.com").await;
        let created = store.create_negotiation(request(vec![s1.clone()])).await.expect("create");

        let by_prefix =
            store.find_by_prefix(created.negotiation.id.short()).await.expect("prefix lookup");
        assert_eq!(by_prefix.len(), 1);
        assert!(store.find_by_prefix("").await.expect("empty prefix").is_empty());

        let active = store.active_negotiations_for_supplier(&s1).await.expect("active");
        assert_eq!(active.len(), 1);

        store
            .transition_negotiation(&created.negotiation.id, NegotiationStatus::Cancelled, None)
            .await
            .expect("cancel");
        assert!(store.active_negotiations_for_supplier(&s1).await.expect("active").is_empty());
        assert_eq!(
            store.list_negotiations(Some(NegotiationStatus::Cancelled)).await.expect("list").len(),
            1
        );
    }

    #[tokio::test]
    async fn transition_of_unknown_negotiation_is_not_found() {
        let store = setup_store().await;
        let error = store
            .transition_negotiation(
                &procura_core::domain::negotiation::NegotiationId("nope".to_string()),
                NegotiationStatus::Cancelled,
                None,
            )
            .await
            .expect_err("missing");
        assert!(matches!(error, RepositoryError::NotFound { entity: "negotiation", .. }));
    }
}
