use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use procura_core::domain::activity::OrchestratorActivity;
use procura_core::domain::agent::{Agent, AgentId, PairKey, PairState};
use procura_core::domain::email::{EmailConfig, EmailConfigId};
use procura_core::domain::instructions::Instructions;
use procura_core::domain::message::{AppendOutcome, Message, MessageId, NewMessage};
use procura_core::domain::negotiation::{
    Negotiation, NegotiationId, NegotiationStatus, NewNegotiation, StatusChange,
};
use procura_core::domain::product::{Product, ProductId};
use procura_core::domain::summary::{NegotiationSummary, NewSummary};
use procura_core::domain::supplier::{Supplier, SupplierId};
use procura_core::errors::{ApplicationError, DomainError};
use procura_core::flows::NegotiatorState;

pub mod activity;
pub mod catalog;
mod codec;
pub mod email_config;
pub mod instructions;
pub mod message;
pub mod negotiation;
pub mod pair;
pub mod store;
pub mod summary;

pub use catalog::SqlCatalogRepository;
pub use email_config::SqlEmailConfigRepository;
pub use store::SqlConversationStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("negotiation `{negotiation_id}` is {} and no longer accepts transitions", status.as_str())]
    Inactive { negotiation_id: String, status: NegotiationStatus },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Decode(message) => Self::Persistence(message),
            RepositoryError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepositoryError::Conflict(message) => Self::Conflict(message),
            error @ RepositoryError::Inactive { .. } => Self::Conflict(error.to_string()),
            RepositoryError::Domain(error) => Self::Domain(error),
        }
    }
}

/// Everything written when a negotiation is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedNegotiation {
    pub negotiation: Negotiation,
    pub orchestrator: Agent,
    pub negotiators: Vec<Agent>,
}

/// Compare-and-swap request for one pair, plus the records produced by the transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairTransition {
    pub pair: PairKey,
    pub agent_id: AgentId,
    pub expected_version: u32,
    pub to_state: NegotiatorState,
    pub rounds: u32,
    pub last_processed_message_id: Option<MessageId>,
    pub message: Option<NewMessage>,
    pub summary: Option<NewSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairCommit {
    pub pair: PairState,
    pub message: Option<Message>,
    pub summary: Option<NegotiationSummary>,
}

#[async_trait]
pub trait NegotiationRepository: Send + Sync {
    async fn create_negotiation(
        &self,
        request: NewNegotiation,
    ) -> Result<CreatedNegotiation, RepositoryError>;

    async fn find_negotiation(
        &self,
        id: &NegotiationId,
    ) -> Result<Option<Negotiation>, RepositoryError>;

    async fn list_negotiations(
        &self,
        status: Option<NegotiationStatus>,
    ) -> Result<Vec<Negotiation>, RepositoryError>;

    /// Negotiations whose id starts with `prefix` (reference tags carry eight characters).
    async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<Negotiation>, RepositoryError>;

    async fn active_negotiations_for_supplier(
        &self,
        supplier_id: &SupplierId,
    ) -> Result<Vec<Negotiation>, RepositoryError>;

    async fn transition_negotiation(
        &self,
        id: &NegotiationId,
        next: NegotiationStatus,
        final_summary: Option<String>,
    ) -> Result<StatusChange, RepositoryError>;

    async fn list_agents(&self, id: &NegotiationId) -> Result<Vec<Agent>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append_message(&self, message: NewMessage) -> Result<AppendOutcome, RepositoryError>;

    async fn pair_history(&self, pair: &PairKey) -> Result<Vec<Message>, RepositoryError>;

    async fn negotiation_history(
        &self,
        id: &NegotiationId,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// Oldest supplier message of the pair stored after `after`.
    async fn next_supplier_reply(
        &self,
        pair: &PairKey,
        after: Option<&MessageId>,
    ) -> Result<Option<Message>, RepositoryError>;
}

#[async_trait]
pub trait PairRepository: Send + Sync {
    async fn load_pair(&self, pair: &PairKey) -> Result<Option<PairState>, RepositoryError>;

    async fn list_pairs(&self, id: &NegotiationId) -> Result<Vec<PairState>, RepositoryError>;

    async fn commit_pair_transition(
        &self,
        transition: PairTransition,
    ) -> Result<PairCommit, RepositoryError>;

    fn subscribe_replies(&self, pair: &PairKey) -> watch::Receiver<u64>;

    fn release_pair(&self, pair: &PairKey);
}

#[async_trait]
pub trait InstructionsRepository: Send + Sync {
    async fn upsert_instructions(&self, instructions: Instructions) -> Result<(), RepositoryError>;

    async fn find_instructions(
        &self,
        pair: &PairKey,
    ) -> Result<Option<Instructions>, RepositoryError>;

    async fn list_instructions(
        &self,
        id: &NegotiationId,
    ) -> Result<Vec<Instructions>, RepositoryError>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn record_activity(&self, activity: OrchestratorActivity) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list_activity(
        &self,
        id: &NegotiationId,
        supplier_id: Option<&SupplierId>,
    ) -> Result<Vec<OrchestratorActivity>, RepositoryError>;
}

#[async_trait]
pub trait SummaryRepository: Send + Sync {
    async fn find_summary(
        &self,
        pair: &PairKey,
    ) -> Result<Option<NegotiationSummary>, RepositoryError>;

    async fn list_summaries(
        &self,
        id: &NegotiationId,
    ) -> Result<Vec<NegotiationSummary>, RepositoryError>;
}

/// The full conversation store contract the agents and the service depend on.
pub trait ConversationStore:
    NegotiationRepository
    + MessageRepository
    + PairRepository
    + InstructionsRepository
    + ActivityRepository
    + SummaryRepository
{
}

impl<T> ConversationStore for T where
    T: NegotiationRepository
        + MessageRepository
        + PairRepository
        + InstructionsRepository
        + ActivityRepository
        + SummaryRepository
{
}

#[async_trait]
pub trait SupplierRepository: Send + Sync {
    async fn list_suppliers(&self) -> Result<Vec<Supplier>, RepositoryError>;

    async fn find_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>, RepositoryError>;

    async fn find_suppliers_by_email(&self, address: &str)
        -> Result<Vec<Supplier>, RepositoryError>;

    async fn find_suppliers_by_prefix(&self, prefix: &str)
        -> Result<Vec<Supplier>, RepositoryError>;

    async fn save_supplier(&self, supplier: Supplier) -> Result<(), RepositoryError>;

    async fn update_insights(
        &self,
        id: &SupplierId,
        insights: &str,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError>;

    async fn find_product(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Case-insensitive substring match on the product name.
    async fn search_products(&self, query: &str) -> Result<Vec<Product>, RepositoryError>;

    async fn save_product(&self, product: Product) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait EmailConfigRepository: Send + Sync {
    async fn active_email_config(&self) -> Result<Option<EmailConfig>, RepositoryError>;

    /// Stores a configuration; an active one deactivates every other row.
    async fn save_email_config(&self, config: EmailConfig) -> Result<(), RepositoryError>;

    async fn activate_email_config(&self, id: &EmailConfigId) -> Result<(), RepositoryError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use procura_core::chrono::Utc;
    use procura_core::domain::negotiation::{Negotiation, NewNegotiation};
    use procura_core::domain::supplier::{Supplier, SupplierId};

    use super::{NegotiationRepository, SqlCatalogRepository, SqlConversationStore, SupplierRepository};
    use crate::{connect_with_settings, migrations};

    pub(crate) async fn setup_store() -> SqlConversationStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlConversationStore::new(pool)
    }

    pub(crate) async fn seed_supplier(
        store: &SqlConversationStore,
        name: &str,
        email: &str,
    ) -> SupplierId {
        let id = SupplierId::generate();
        SqlCatalogRepository::new(store.pool().clone())
            .save_supplier(Supplier {
                id: id.clone(),
                name: name.to_string(),
                email: Some(email.to_string()),
                description: format!("{name} components"),
                insights: None,
                image_url: None,
                created_at: Utc::now(),
            })
            .await
            .expect("seed supplier");
        id
    }

    pub(crate) async fn open_negotiation(
        store: &SqlConversationStore,
        suppliers: usize,
    ) -> (Negotiation, Vec<SupplierId>) {
        let mut ids = Vec::with_capacity(suppliers);
        for index in 0..suppliers {
            ids.push(
                seed_supplier(store, &format!("Supplier {index}"), &format!("s{index}@example.com"))
                    .await,
            );
        }

        let created = store
            .create_negotiation(NewNegotiation {
                product: "nRF54L15".to_string(),
                strategy: "Target 2.10 USD per unit for 10k units".to_string(),
                prompt: "Buy 10k units".to_string(),
                suppliers: ids.clone(),
                orchestrator_prompt: "coordinate".to_string(),
                negotiator_prompt: "negotiate".to_string(),
            })
            .await
            .expect("create negotiation");
        (created.negotiation, ids)
    }
}
