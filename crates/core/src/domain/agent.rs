use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::message::MessageId;
use crate::domain::negotiation::NegotiationId;
use crate::domain::supplier::SupplierId;
use crate::flows::NegotiatorState;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Negotiator,
    Orchestrator,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negotiator => "negotiator",
            Self::Orchestrator => "orchestrator",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "negotiator" => Some(Self::Negotiator),
            "orchestrator" => Some(Self::Orchestrator),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub negotiation_id: NegotiationId,
    pub supplier_id: Option<SupplierId>,
    pub role: AgentRole,
    pub system_prompt: String,
    pub created_at: DateTime<Utc>,
}

/// A (negotiation, supplier) combination, the unit of independent progress.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub negotiation_id: NegotiationId,
    pub supplier_id: SupplierId,
}

impl PairKey {
    pub fn new(negotiation_id: NegotiationId, supplier_id: SupplierId) -> Self {
        Self { negotiation_id, supplier_id }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.negotiation_id, self.supplier_id)
    }
}

/// Persisted progress of one negotiator agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairState {
    pub agent_id: AgentId,
    pub pair: PairKey,
    pub system_prompt: String,
    pub state: NegotiatorState,
    pub rounds: u32,
    pub last_processed_message_id: Option<MessageId>,
    pub state_version: u32,
    pub updated_at: DateTime<Utc>,
}

impl PairState {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
