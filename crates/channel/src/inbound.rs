use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use procura_core::domain::activity::{ActivityAction, OrchestratorActivity};
use procura_core::domain::agent::PairKey;
use procura_core::domain::message::{
    AppendOutcome, MessageRole, NewMessage, META_CHANNEL, META_CHANNEL_MESSAGE_ID, META_SENDER,
    META_SUBJECT,
};
use procura_core::domain::negotiation::NegotiationId;
use procura_core::errors::ApplicationError;
use procura_db::{ConversationStore, RepositoryError, SupplierRepository};

use crate::reference::ReferenceTag;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyChannel {
    Synthetic,
    Email,
}

impl ReplyChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synthetic => "synthetic",
            Self::Email => "email",
        }
    }
}

/// A message fetched from the supplier-facing mailbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEmail {
    pub message_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundReply {
    pub channel: ReplyChannel,
    pub pair: Option<PairKey>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub content: String,
    pub delivery_token: Option<String>,
}

impl InboundReply {
    /// Reply posted for a known pair, optionally with a caller-chosen idempotency key.
    pub fn synthetic(
        pair: PairKey,
        content: impl Into<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            channel: ReplyChannel::Synthetic,
            pair: Some(pair),
            sender: None,
            subject: None,
            content: content.into(),
            delivery_token: idempotency_key,
        }
    }

    pub fn from_email(email: InboundEmail) -> Self {
        Self {
            channel: ReplyChannel::Email,
            pair: None,
            sender: Some(email.sender),
            subject: Some(email.subject),
            content: email.body,
            delivery_token: email.message_id,
        }
    }

    /// Token stored in the unique `channel_message_id` column. Email without a Message-ID falls
    /// back to a digest of sender, subject and body; synthetic replies without a key are never
    /// deduplicated.
    fn channel_message_id(&self, pair: &PairKey) -> Option<String> {
        let token = self.delivery_token.as_deref().map(str::trim).filter(|token| !token.is_empty());
        match (self.channel, token) {
            (ReplyChannel::Email, Some(message_id)) => Some(format!("email:{message_id}")),
            (ReplyChannel::Email, None) => {
                let mut hasher = Sha256::new();
                hasher.update(self.sender.as_deref().unwrap_or_default().trim().as_bytes());
                hasher.update(b"\n");
                hasher.update(self.subject.as_deref().unwrap_or_default().trim().as_bytes());
                hasher.update(b"\n");
                hasher.update(self.content.trim().as_bytes());
                Some(format!("email-digest:{}", hex::encode(hasher.finalize())))
            }
            (ReplyChannel::Synthetic, Some(key)) => Some(format!(
                "synthetic:{}:{}:{key}",
                pair.negotiation_id, pair.supplier_id
            )),
            (ReplyChannel::Synthetic, None) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestedReply {
    pub pair: PairKey,
    pub outcome: AppendOutcome,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid reply: {0}")]
    Validation(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("reply could not be attributed: {reason}")]
    Mismatch { reason: String, negotiation_id: Option<NegotiationId> },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl IngestError {
    fn mismatch(reason: impl Into<String>, negotiation_id: Option<NegotiationId>) -> Self {
        Self::Mismatch { reason: reason.into(), negotiation_id }
    }
}

impl From<IngestError> for ApplicationError {
    fn from(value: IngestError) -> Self {
        match value {
            IngestError::Validation(message) => Self::Validation(message),
            IngestError::NotFound { entity, id } => Self::NotFound { entity, id },
            IngestError::Mismatch { reason, .. } => Self::IngestionMismatch(reason),
            IngestError::Repository(error) => error.into(),
        }
    }
}

/// Attributes inbound replies to a pair and appends them as supplier messages.
#[derive(Clone)]
pub struct ReplyIngestor {
    store: Arc<dyn ConversationStore>,
    suppliers: Arc<dyn SupplierRepository>,
}

impl ReplyIngestor {
    pub fn new(store: Arc<dyn ConversationStore>, suppliers: Arc<dyn SupplierRepository>) -> Self {
        Self { store, suppliers }
    }

    pub async fn ingest(&self, reply: InboundReply) -> Result<IngestedReply, IngestError> {
        if reply.content.trim().is_empty() {
            return Err(IngestError::Validation("reply content must not be empty".to_string()));
        }

        let pair = match self.attribute(&reply).await {
            Ok(pair) => pair,
            Err(IngestError::Mismatch { reason, negotiation_id }) => {
                self.reject(&reply, &reason, negotiation_id.as_ref()).await;
                return Err(IngestError::Mismatch { reason, negotiation_id });
            }
            Err(error) => return Err(error),
        };

        let mut message = NewMessage::new(
            pair.negotiation_id.clone(),
            Some(pair.supplier_id.clone()),
            MessageRole::Supplier,
            reply.content.trim(),
        )
        .with_metadata(META_CHANNEL, reply.channel.as_str());
        if let Some(token) = reply.channel_message_id(&pair) {
            message = message.with_metadata(META_CHANNEL_MESSAGE_ID, token);
        }
        if let Some(subject) = reply.subject.as_deref() {
            message = message.with_metadata(META_SUBJECT, subject);
        }
        if let Some(sender) = reply.sender.as_deref() {
            message = message.with_metadata(META_SENDER, sender);
        }

        let outcome = self.store.append_message(message).await?;
        if outcome.is_duplicate() {
            debug!(
                event_name = "ingress.reply.duplicate",
                channel = reply.channel.as_str(),
                negotiation_id = %pair.negotiation_id,
                supplier_id = %pair.supplier_id,
                message_id = %outcome.message().id.0,
                "duplicate supplier reply ignored"
            );
        } else {
            info!(
                event_name = "ingress.reply.stored",
                channel = reply.channel.as_str(),
                negotiation_id = %pair.negotiation_id,
                supplier_id = %pair.supplier_id,
                message_id = %outcome.message().id.0,
                "supplier reply stored"
            );
        }

        Ok(IngestedReply { pair, outcome })
    }

    async fn attribute(&self, reply: &InboundReply) -> Result<PairKey, IngestError> {
        if let Some(pair) = &reply.pair {
            return self.attribute_explicit(pair).await;
        }

        if let Some(tag) = reply.subject.as_deref().and_then(ReferenceTag::find_in) {
            return self.attribute_tagged(&tag, reply.sender.as_deref()).await;
        }

        match reply.sender.as_deref().map(sender_address) {
            Some(address) if !address.is_empty() => self.attribute_sender(address).await,
            _ => Err(IngestError::mismatch("reply carries neither a reference tag nor a sender", None)),
        }
    }

    async fn attribute_explicit(&self, pair: &PairKey) -> Result<PairKey, IngestError> {
        if self.store.find_negotiation(&pair.negotiation_id).await?.is_none() {
            return Err(IngestError::NotFound {
                entity: "negotiation",
                id: pair.negotiation_id.0.clone(),
            });
        }
        if self.suppliers.find_supplier(&pair.supplier_id).await?.is_none() {
            return Err(IngestError::NotFound { entity: "supplier", id: pair.supplier_id.0.clone() });
        }
        self.require_negotiator(pair.clone()).await
    }

    async fn attribute_tagged(
        &self,
        tag: &ReferenceTag,
        sender: Option<&str>,
    ) -> Result<PairKey, IngestError> {
        let mut negotiations = self.store.find_by_prefix(&tag.negotiation_prefix).await?;
        let negotiation = match negotiations.len() {
            1 => negotiations.remove(0),
            0 => {
                return Err(IngestError::mismatch(format!("no negotiation matches tag {tag}"), None))
            }
            _ => {
                return Err(IngestError::mismatch(
                    format!("tag {tag} matches several negotiations"),
                    None,
                ))
            }
        };

        let mut suppliers = self.suppliers.find_suppliers_by_prefix(&tag.supplier_prefix).await?;
        let supplier = match suppliers.len() {
            1 => suppliers.remove(0),
            count => {
                return Err(IngestError::mismatch(
                    format!("tag {tag} matches {count} suppliers"),
                    Some(negotiation.id),
                ))
            }
        };

        if let Some(address) = sender.map(sender_address).filter(|address| !address.is_empty()) {
            let known = self.suppliers.find_suppliers_by_email(address).await?;
            if !known.is_empty() && !known.iter().any(|candidate| candidate.id == supplier.id) {
                return Err(IngestError::mismatch(
                    format!("sender {address} does not belong to the supplier named by tag {tag}"),
                    Some(negotiation.id),
                ));
            }
        }

        self.require_negotiator(PairKey::new(negotiation.id, supplier.id)).await
    }

    async fn attribute_sender(&self, address: &str) -> Result<PairKey, IngestError> {
        let mut suppliers = self.suppliers.find_suppliers_by_email(address).await?;
        let supplier = match suppliers.len() {
            1 => suppliers.remove(0),
            0 => {
                return Err(IngestError::mismatch(
                    format!("sender {address} is not a known supplier"),
                    None,
                ))
            }
            _ => {
                return Err(IngestError::mismatch(
                    format!("sender {address} is shared by several suppliers"),
                    None,
                ))
            }
        };

        let mut active = self.store.active_negotiations_for_supplier(&supplier.id).await?;
        match active.len() {
            1 => {
                let negotiation = active.remove(0);
                self.require_negotiator(PairKey::new(negotiation.id, supplier.id)).await
            }
            0 => Err(IngestError::mismatch(
                format!("supplier {} has no active negotiation", supplier.id),
                None,
            )),
            count => Err(IngestError::mismatch(
                format!(
                    "supplier {} has {count} active negotiations and the reply carries no tag",
                    supplier.id
                ),
                None,
            )),
        }
    }

    async fn require_negotiator(&self, pair: PairKey) -> Result<PairKey, IngestError> {
        if self.store.load_pair(&pair).await?.is_none() {
            return Err(IngestError::mismatch(
                format!("supplier {} is not part of negotiation {}", pair.supplier_id, pair.negotiation_id),
                Some(pair.negotiation_id),
            ));
        }
        Ok(pair)
    }

    async fn reject(&self, reply: &InboundReply, reason: &str, negotiation_id: Option<&NegotiationId>) {
        warn!(
            event_name = "ingress.reply.rejected",
            channel = reply.channel.as_str(),
            sender = reply.sender.as_deref().unwrap_or("unknown"),
            subject = reply.subject.as_deref().unwrap_or(""),
            negotiation_id = negotiation_id.map(|id| id.0.as_str()).unwrap_or("unknown"),
            reason,
            "supplier reply dropped"
        );

        let Some(negotiation_id) = negotiation_id else {
            return;
        };
        let mut activity = OrchestratorActivity::new(
            negotiation_id.clone(),
            ActivityAction::IngestionRejected,
            reason.to_string(),
        )
        .with_detail("channel", reply.channel.as_str())
        .completed(false);
        if let Some(sender) = reply.sender.as_deref() {
            activity = activity.with_detail("sender", sender);
        }
        if let Some(subject) = reply.subject.as_deref() {
            activity = activity.with_detail("subject", subject);
        }

        if let Err(error) = self.store.record_activity(activity).await {
            warn!(
                event_name = "ingress.reply.reject_audit_failed",
                negotiation_id = %negotiation_id,
                error = %error,
                "could not record rejected reply"
            );
        }
    }
}

/// `Name <addr@host>` → `addr@host`.
fn sender_address(sender: &str) -> &str {
    let trimmed = sender.trim();
    match (trimmed.rfind('<'), trimmed.rfind('>')) {
        (Some(open), Some(close)) if open < close => trimmed[open + 1..close].trim(),
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use procura_core::chrono::Utc;
    use procura_core::domain::activity::ActivityAction;
    use procura_core::domain::agent::PairKey;
    use procura_core::domain::message::META_CHANNEL_MESSAGE_ID;
    use procura_core::domain::negotiation::{Negotiation, NegotiationStatus, NewNegotiation};
    use procura_core::domain::supplier::{Supplier, SupplierId};
    use procura_db::{
        connect_with_settings, migrations, ActivityRepository, MessageRepository,
        NegotiationRepository, SqlCatalogRepository, SqlConversationStore, SupplierRepository,
    };

    use super::{sender_address, IngestError, InboundEmail, InboundReply, ReplyIngestor};
    use crate::reference::ReferenceTag;

    struct Harness {
        store: Arc<SqlConversationStore>,
        catalog: Arc<SqlCatalogRepository>,
        ingestor: ReplyIngestor,
    }

    async fn harness() -> Harness {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        let store = Arc::new(SqlConversationStore::new(pool.clone()));
        let catalog = Arc::new(SqlCatalogRepository::new(pool));
        let ingestor = ReplyIngestor::new(store.clone(), catalog.clone());
        Harness { store, catalog, ingestor }
    }

    async fn supplier(harness: &Harness, name: &str, email: &str) -> SupplierId {
        let id = SupplierId::generate();
        harness
            .catalog
            .save_supplier(Supplier {
                id: id.clone(),
                name: name.to_string(),
                email: Some(email.to_string()),
                description: String::new(),
                insights: None,
                image_url: None,
                created_at: Utc::now(),
            })
            .await
            .expect("supplier");
        id
    }

    async fn negotiation(harness: &Harness, suppliers: Vec<SupplierId>) -> Negotiation {
        harness
            .store
            .create_negotiation(NewNegotiation {
                product: "nRF54L15".to_string(),
                strategy: "aggressive".to_string(),
                prompt: String::new(),
                suppliers,
                orchestrator_prompt: "coordinate".to_string(),
                negotiator_prompt: "negotiate".to_string(),
            })
            .await
            .expect("negotiation")
            .negotiation
    }

    fn email(message_id: Option<&str>, sender: &str, subject: &str, body: &str) -> InboundReply {
        InboundReply::from_email(InboundEmail {
            message_id: message_id.map(str::to_string),
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        })
    }

    #[tokio::test]
    async fn tagged_email_is_attributed_and_deduplicated() {
        let harness = harness().await;
        let s1 = supplier(&harness, "Nordic Parts", "sales@nordic.example").await;
        let n = negotiation(&harness, vec![s1.clone()]).await;
        let pair = PairKey::new(n.id.clone(), s1.clone());
        let subject = format!("Re: nRF54L15 {}", ReferenceTag::for_pair(&pair));

        let first = harness
            .ingestor
            .ingest(email(Some("<m-1@nordic>"), "Nordic <sales@nordic.example>", &subject, "2.40 USD"))
            .await
            .expect("first delivery");
        assert_eq!(first.pair, pair);
        assert!(!first.outcome.is_duplicate());
        assert_eq!(first.outcome.message().channel_message_id(), Some("email:<m-1@nordic>"));

        let again = harness
            .ingestor
            .ingest(email(Some("<m-1@nordic>"), "Nordic <sales@nordic.example>", &subject, "2.40 USD"))
            .await
            .expect("redelivery");
        assert!(again.outcome.is_duplicate());
        assert_eq!(harness.store.pair_history(&pair).await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn email_without_message_id_deduplicates_on_digest() {
        let harness = harness().await;
        let s1 = supplier(&harness, "Nordic Parts", "sales@nordic.example").await;
        let n = negotiation(&harness, vec![s1.clone()]).await;

        let reply = email(None, "sales@nordic.example", "pricing", "We can do 2.35 USD");
        let first = harness.ingestor.ingest(reply.clone()).await.expect("first");
        let second = harness.ingestor.ingest(reply).await.expect("second");

        assert_eq!(first.pair.negotiation_id, n.id);
        assert!(second.outcome.is_duplicate());
        let token = first.outcome.message().metadata.get(META_CHANNEL_MESSAGE_ID).expect("token");
        assert!(token.starts_with("email-digest:"));
    }

    #[tokio::test]
    async fn sender_disagreeing_with_tag_is_rejected_and_audited() {
        let harness = harness().await;
        let s1 = supplier(&harness, "Nordic Parts", "sales@nordic.example").await;
        let s2 = supplier(&harness, "Baltic Chips", "quotes@baltic.example").await;
        let n = negotiation(&harness, vec![s1.clone(), s2.clone()]).await;
        let subject = format!("Re: {}", ReferenceTag::for_pair(&PairKey::new(n.id.clone(), s1)));

        let error = harness
            .ingestor
            .ingest(email(Some("<x@baltic>"), "quotes@baltic.example", &subject, "1.99 USD"))
            .await
            .expect_err("mismatch");
        assert!(matches!(error, IngestError::Mismatch { .. }));

        let activity = harness.store.list_activity(&n.id, None).await.expect("activity");
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].action, ActivityAction::IngestionRejected);
        assert!(harness.store.negotiation_history(&n.id).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn sender_with_several_active_negotiations_needs_a_tag() {
        let harness = harness().await;
        let s1 = supplier(&harness, "Nordic Parts", "sales@nordic.example").await;
        negotiation(&harness, vec![s1.clone()]).await;
        negotiation(&harness, vec![s1]).await;

        let error = harness
            .ingestor
            .ingest(email(Some("<y@nordic>"), "sales@nordic.example", "pricing", "2.20 USD"))
            .await
            .expect_err("ambiguous");
        assert!(matches!(error, IngestError::Mismatch { negotiation_id: None, .. }));
    }

    #[tokio::test]
    async fn synthetic_reply_to_foreign_supplier_is_a_mismatch() {
        let harness = harness().await;
        let s1 = supplier(&harness, "Nordic Parts", "sales@nordic.example").await;
        let outsider = supplier(&harness, "Baltic Chips", "quotes@baltic.example").await;
        let n = negotiation(&harness, vec![s1]).await;

        let error = harness
            .ingestor
            .ingest(InboundReply::synthetic(PairKey::new(n.id.clone(), outsider), "hello", None))
            .await
            .expect_err("no negotiator for pair");
        assert!(matches!(error, IngestError::Mismatch { .. }));

        let missing = harness
            .ingestor
            .ingest(InboundReply::synthetic(
                PairKey::new(n.id, SupplierId("ghost".to_string())),
                "hello",
                None,
            ))
            .await
            .expect_err("unknown supplier");
        assert!(matches!(missing, IngestError::NotFound { entity: "supplier", .. }));
    }

    #[tokio::test]
    async fn late_tagged_reply_to_cancelled_negotiation_is_still_stored() {
        let harness = harness().await;
        let s1 = supplier(&harness, "Nordic Parts", "sales@nordic.example").await;
        let n = negotiation(&harness, vec![s1.clone()]).await;
        harness
            .store
            .transition_negotiation(&n.id, NegotiationStatus::Cancelled, None)
            .await
            .expect("cancel");

        let subject = ReferenceTag::for_pair(&PairKey::new(n.id.clone(), s1)).to_string();
        let stored = harness
            .ingestor
            .ingest(email(Some("<late@nordic>"), "sales@nordic.example", &subject, "Still there?"))
            .await
            .expect("late reply stored");
        assert!(!stored.outcome.is_duplicate());

        let status = harness.store.find_negotiation(&n.id).await.expect("find").expect("present");
        assert_eq!(status.status, NegotiationStatus::Cancelled);
    }

    #[tokio::test]
    async fn blank_replies_are_rejected_before_attribution() {
        let harness = harness().await;
        let error = harness
            .ingestor
            .ingest(email(None, "sales@nordic.example", "pricing", "   "))
            .await
            .expect_err("blank");
        assert!(matches!(error, IngestError::Validation(_)));
    }

    #[test]
    fn sender_address_strips_display_name() {
        assert_eq!(sender_address("Nordic Sales <sales@nordic.example>"), "sales@nordic.example");
        assert_eq!(sender_address(" sales@nordic.example "), "sales@nordic.example");
    }
}
