use std::sync::Arc;

use procura_channel::OutboundMailer;
use procura_core::config::NegotiationSettings;
use procura_core::ranking::{LowestPriceRanking, OfferRanking};
use procura_db::{ConversationStore, SupplierRepository};

use crate::llm::GenerationGateway;
use crate::prompts::PromptLibrary;
use crate::retry::RetryPolicy;

/// Handles shared by the orchestrator and every negotiator it spawns.
#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<dyn ConversationStore>,
    pub suppliers: Arc<dyn SupplierRepository>,
    pub gateway: Arc<dyn GenerationGateway>,
    pub mailer: Arc<dyn OutboundMailer>,
    pub prompts: Arc<PromptLibrary>,
    pub ranking: Arc<dyn OfferRanking>,
    pub retry: RetryPolicy,
    pub settings: NegotiationSettings,
}

impl AgentContext {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        suppliers: Arc<dyn SupplierRepository>,
        gateway: Arc<dyn GenerationGateway>,
        mailer: Arc<dyn OutboundMailer>,
        prompts: Arc<PromptLibrary>,
        retry: RetryPolicy,
        settings: NegotiationSettings,
    ) -> Self {
        Self {
            store,
            suppliers,
            gateway,
            mailer,
            prompts,
            ranking: Arc::new(LowestPriceRanking),
            retry,
            settings,
        }
    }

    pub fn with_ranking(mut self, ranking: Arc<dyn OfferRanking>) -> Self {
        self.ranking = ranking;
        self
    }
}
