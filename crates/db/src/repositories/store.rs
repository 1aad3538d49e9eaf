use std::sync::Arc;

use sqlx::SqliteConnection;

use procura_core::domain::negotiation::NegotiationId;

use super::codec::{format_timestamp, now};
use super::RepositoryError;
use crate::signals::ReplySignals;
use crate::DbPool;

/// SQLite-backed conversation store. Cloning shares the pool and the reply hub.
#[derive(Clone)]
pub struct SqlConversationStore {
    pub(crate) pool: DbPool,
    pub(crate) signals: Arc<ReplySignals>,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_signals(pool, Arc::new(ReplySignals::new()))
    }

    pub fn with_signals(pool: DbPool, signals: Arc<ReplySignals>) -> Self {
        Self { pool, signals }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn signals(&self) -> Arc<ReplySignals> {
        Arc::clone(&self.signals)
    }
}

/// Bumps `negotiation.updated_at` after a child row changed.
pub(crate) async fn touch_negotiation(
    conn: &mut SqliteConnection,
    id: &NegotiationId,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE negotiation SET updated_at = ? WHERE id = ?")
        .bind(format_timestamp(now()))
        .bind(&id.0)
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) async fn negotiation_exists(
    conn: &mut SqliteConnection,
    id: &NegotiationId,
) -> Result<bool, RepositoryError> {
    let found: Option<String> = sqlx::query_scalar("SELECT id FROM negotiation WHERE id = ?")
        .bind(&id.0)
        .fetch_optional(conn)
        .await?;
    Ok(found.is_some())
}

pub(crate) async fn supplier_exists(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<bool, RepositoryError> {
    let found: Option<String> = sqlx::query_scalar("SELECT id FROM supplier WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(found.is_some())
}
