use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::debug;

use procura_core::domain::agent::PairKey;
use procura_core::domain::message::{AppendOutcome, Message, MessageId, MessageRole, NewMessage};
use procura_core::domain::negotiation::NegotiationId;
use procura_core::domain::supplier::SupplierId;
use procura_core::errors::DomainError;

use super::codec::{
    decode_map, encode_map, format_timestamp, is_unique_violation, now, parse_timestamp,
};
use super::store::{negotiation_exists, supplier_exists, touch_negotiation, SqlConversationStore};
use super::{MessageRepository, RepositoryError};

const MESSAGE_COLUMNS: &str =
    "seq, id, negotiation_id, supplier_id, role, content, completed, metadata_json, created_at";

#[async_trait]
impl MessageRepository for SqlConversationStore {
    async fn append_message(&self, message: NewMessage) -> Result<AppendOutcome, RepositoryError> {
        if message.role == MessageRole::Supplier && message.supplier_id.is_none() {
            return Err(DomainError::InvariantViolation(
                "supplier messages must reference a supplier".to_string(),
            )
            .into());
        }

        let mut tx = self.pool.begin().await?;
        if !negotiation_exists(&mut tx, &message.negotiation_id).await? {
            return Err(RepositoryError::not_found("negotiation", message.negotiation_id.0.clone()));
        }
        if let Some(supplier) = &message.supplier_id {
            if !supplier_exists(&mut tx, &supplier.0).await? {
                return Err(RepositoryError::not_found("supplier", supplier.0.clone()));
            }
        }

        if let Some(token) = message.channel_message_id() {
            if let Some(existing) = find_by_channel_id(&mut tx, token).await? {
                debug!(
                    event_name = "message.duplicate",
                    negotiation_id = %message.negotiation_id,
                    channel_message_id = token,
                    "duplicate delivery ignored"
                );
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }

        let stored = match insert_message(&mut tx, &message).await {
            Ok(stored) => stored,
            Err(RepositoryError::Database(error)) if is_unique_violation(&error) => {
                drop(tx);
                return self.duplicate_of(&message).await;
            }
            Err(error) => return Err(error),
        };
        touch_negotiation(&mut tx, &message.negotiation_id).await?;
        tx.commit().await?;

        if stored.role == MessageRole::Supplier {
            if let Some(supplier) = &stored.supplier_id {
                self.signals.notify(&PairKey::new(stored.negotiation_id.clone(), supplier.clone()));
            }
        }

        Ok(AppendOutcome::Appended(stored))
    }

    async fn pair_history(&self, pair: &PairKey) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message
             WHERE negotiation_id = ? AND supplier_id = ?
             ORDER BY created_at ASC, seq ASC"
        ))
        .bind(&pair.negotiation_id.0)
        .bind(&pair.supplier_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn negotiation_history(
        &self,
        id: &NegotiationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message
             WHERE negotiation_id = ?
             ORDER BY created_at ASC, seq ASC"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn next_supplier_reply(
        &self,
        pair: &PairKey,
        after: Option<&MessageId>,
    ) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message
             WHERE negotiation_id = ? AND supplier_id = ? AND role = 'supplier'
               AND seq > COALESCE((SELECT seq FROM message WHERE id = ?), 0)
             ORDER BY seq ASC
             LIMIT 1"
        ))
        .bind(&pair.negotiation_id.0)
        .bind(&pair.supplier_id.0)
        .bind(after.map(|id| id.0.as_str()))
        .fetch_optional(&self.pool)
        .await?;

        row.map(message_from_row).transpose()
    }
}

impl SqlConversationStore {
    async fn duplicate_of(&self, message: &NewMessage) -> Result<AppendOutcome, RepositoryError> {
        let token = message.channel_message_id().unwrap_or_default();
        let mut conn = self.pool.acquire().await?;
        find_by_channel_id(&mut conn, token)
            .await?
            .map(AppendOutcome::Duplicate)
            .ok_or_else(|| RepositoryError::Conflict(format!("channel message `{token}` raced")))
    }
}

async fn find_by_channel_id(
    conn: &mut SqliteConnection,
    token: &str,
) -> Result<Option<Message>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM message WHERE channel_message_id = ?"
    ))
    .bind(token)
    .fetch_optional(conn)
    .await?;

    row.map(message_from_row).transpose()
}

/// Inserts a message on an open connection or transaction; the caller validates references.
pub(crate) async fn insert_message(
    conn: &mut SqliteConnection,
    message: &NewMessage,
) -> Result<Message, RepositoryError> {
    let id = MessageId::generate();
    let created_at = now();
    let metadata_json = encode_map(&message.metadata)?;

    let result = sqlx::query(
        "INSERT INTO message (
            id, negotiation_id, supplier_id, role, content, completed, metadata_json,
            channel_message_id, created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id.0)
    .bind(&message.negotiation_id.0)
    .bind(message.supplier_id.as_ref().map(|supplier| supplier.0.as_str()))
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(message.completed)
    .bind(&metadata_json)
    .bind(message.channel_message_id())
    .bind(format_timestamp(created_at))
    .execute(conn)
    .await?;

    Ok(Message {
        id,
        sequence: result.last_insert_rowid(),
        negotiation_id: message.negotiation_id.clone(),
        supplier_id: message.supplier_id.clone(),
        role: message.role,
        content: message.content.clone(),
        completed: message.completed,
        metadata: message.metadata.clone(),
        created_at,
    })
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw: String = row.try_get("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let supplier_id: Option<String> = row.try_get("supplier_id")?;
    let metadata_json: String = row.try_get("metadata_json")?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        sequence: row.try_get("seq")?,
        negotiation_id: NegotiationId(row.try_get("negotiation_id")?),
        supplier_id: supplier_id.map(SupplierId),
        role,
        content: row.try_get("content")?,
        completed: row.try_get("completed")?,
        metadata: decode_map("metadata_json", &metadata_json)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use procura_core::domain::agent::PairKey;
    use procura_core::domain::message::{
        MessageRole, NewMessage, META_CHANNEL, META_CHANNEL_MESSAGE_ID,
    };
    use procura_core::domain::negotiation::{NegotiationId, NegotiationStatus};
    use procura_core::domain::supplier::SupplierId;

    use crate::repositories::test_support::{open_negotiation, setup_store};
    use crate::repositories::{
        MessageRepository, NegotiationRepository, PairRepository, RepositoryError,
    };

    fn supplier_reply(pair: &PairKey, content: &str) -> NewMessage {
        NewMessage::new(
            pair.negotiation_id.clone(),
            Some(pair.supplier_id.clone()),
            MessageRole::Supplier,
            content,
        )
    }

    #[tokio::test]
    async fn duplicate_channel_message_id_stores_one_row() {
        let store = setup_store().await;
        let (negotiation, suppliers) = open_negotiation(&store, 1).await;
        let pair = PairKey::new(negotiation.id.clone(), suppliers[0].clone());

        let first = store
            .append_message(
                supplier_reply(&pair, "We can do 2.10 USD")
                    .with_metadata(META_CHANNEL, "email")
                    .with_metadata(META_CHANNEL_MESSAGE_ID, "<abc@mail>"),
            )
            .await
            .expect("first delivery");
        let second = store
            .append_message(
                supplier_reply(&pair, "We can do 2.10 USD")
                    .with_metadata(META_CHANNEL_MESSAGE_ID, "<abc@mail>"),
            )
            .await
            .expect("second delivery");

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.message().id, second.message().id);
        assert_eq!(store.pair_history(&pair).await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let store = setup_store().await;
        let (negotiation, _) = open_negotiation(&store, 1).await;

        let missing_negotiation = store
            .append_message(NewMessage::new(
                NegotiationId("missing".to_string()),
                None,
                MessageRole::Orchestrator,
                "hello",
            ))
            .await
            .expect_err("unknown negotiation");
        assert!(matches!(
            missing_negotiation,
            RepositoryError::NotFound { entity: "negotiation", .. }
        ));

        let missing_supplier = store
            .append_message(NewMessage::new(
                negotiation.id,
                Some(SupplierId("ghost".to_string())),
                MessageRole::Supplier,
                "hello",
            ))
            .await
            .expect_err("unknown supplier");
        assert!(matches!(missing_supplier, RepositoryError::NotFound { entity: "supplier", .. }));
    }

    #[tokio::test]
    async fn histories_are_ordered_and_scoped() {
        let store = setup_store().await;
        let (negotiation, suppliers) = open_negotiation(&store, 2).await;
        let first_pair = PairKey::new(negotiation.id.clone(), suppliers[0].clone());
        let second_pair = PairKey::new(negotiation.id.clone(), suppliers[1].clone());

        for (pair, role, content) in [
            (&first_pair, MessageRole::Negotiator, "opening s1"),
            (&second_pair, MessageRole::Negotiator, "opening s2"),
            (&first_pair, MessageRole::Supplier, "reply s1"),
        ] {
            store
                .append_message(NewMessage::new(
                    pair.negotiation_id.clone(),
                    Some(pair.supplier_id.clone()),
                    role,
                    content,
                ))
                .await
                .expect("append");
        }

        let first: Vec<String> = store
            .pair_history(&first_pair)
            .await
            .expect("pair history")
            .into_iter()
            .map(|message| message.content)
            .collect();
        assert_eq!(first, vec!["opening s1", "reply s1"]);

        let all = store.negotiation_history(&negotiation.id).await.expect("history");
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    }

    #[tokio::test]
    async fn next_supplier_reply_walks_forward_past_claimed_messages() {
        let store = setup_store().await;
        let (negotiation, suppliers) = open_negotiation(&store, 1).await;
        let pair = PairKey::new(negotiation.id.clone(), suppliers[0].clone());

        assert!(store.next_supplier_reply(&pair, None).await.expect("none yet").is_none());

        let first = store
            .append_message(supplier_reply(&pair, "first"))
            .await
            .expect("append")
            .into_message();
        store.append_message(supplier_reply(&pair, "second")).await.expect("append");

        let next = store.next_supplier_reply(&pair, None).await.expect("query").expect("reply");
        assert_eq!(next.content, "first");
        let after = store
            .next_supplier_reply(&pair, Some(&first.id))
            .await
            .expect("query")
            .expect("reply");
        assert_eq!(after.content, "second");
        assert!(store
            .next_supplier_reply(&pair, Some(&after.id))
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn supplier_append_wakes_pair_subscribers() {
        let store = setup_store().await;
        let (negotiation, suppliers) = open_negotiation(&store, 1).await;
        let pair = PairKey::new(negotiation.id.clone(), suppliers[0].clone());
        let mut receiver = store.subscribe_replies(&pair);

        store.append_message(supplier_reply(&pair, "price list attached")).await.expect("append");

        tokio::time::timeout(Duration::from_secs(1), receiver.changed())
            .await
            .expect("woken")
            .expect("hub alive");
    }

    #[tokio::test]
    async fn late_reply_to_cancelled_negotiation_is_recorded() {
        let store = setup_store().await;
        let (negotiation, suppliers) = open_negotiation(&store, 1).await;
        let pair = PairKey::new(negotiation.id.clone(), suppliers[0].clone());
        store
            .transition_negotiation(&negotiation.id, NegotiationStatus::Cancelled, None)
            .await
            .expect("cancel");

        let outcome = store.append_message(supplier_reply(&pair, "too late?")).await.expect("append");

        assert!(!outcome.is_duplicate());
        let stored = store.find_negotiation(&negotiation.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, NegotiationStatus::Cancelled);
        assert!(stored.updated_at >= negotiation.updated_at);
    }
}
