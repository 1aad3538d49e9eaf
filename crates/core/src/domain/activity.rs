use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::negotiation::NegotiationId;
use crate::domain::supplier::SupplierId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    NegotiationStarted,
    InstructionsIssued,
    NegotiatorTransition,
    OutcomeRecorded,
    NegotiationCompleted,
    NegotiationCancelled,
    IngestionRejected,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NegotiationStarted => "negotiation_started",
            Self::InstructionsIssued => "instructions_issued",
            Self::NegotiatorTransition => "negotiator_transition",
            Self::OutcomeRecorded => "outcome_recorded",
            Self::NegotiationCompleted => "negotiation_completed",
            Self::NegotiationCancelled => "negotiation_cancelled",
            Self::IngestionRejected => "ingestion_rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "negotiation_started" => Some(Self::NegotiationStarted),
            "instructions_issued" => Some(Self::InstructionsIssued),
            "negotiator_transition" => Some(Self::NegotiatorTransition),
            "outcome_recorded" => Some(Self::OutcomeRecorded),
            "negotiation_completed" => Some(Self::NegotiationCompleted),
            "negotiation_cancelled" => Some(Self::NegotiationCancelled),
            "ingestion_rejected" => Some(Self::IngestionRejected),
            _ => None,
        }
    }
}

/// Append-only record of an orchestrator decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorActivity {
    pub id: ActivityId,
    pub negotiation_id: NegotiationId,
    pub supplier_id: Option<SupplierId>,
    pub action: ActivityAction,
    pub summary: String,
    pub details: BTreeMap<String, String>,
    pub completed: bool,
    pub occurred_at: DateTime<Utc>,
}

impl OrchestratorActivity {
    pub fn new(
        negotiation_id: NegotiationId,
        action: ActivityAction,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: ActivityId(Uuid::new_v4().to_string()),
            negotiation_id,
            supplier_id: None,
            action,
            summary: summary.into(),
            details: BTreeMap::new(),
            completed: true,
            occurred_at: Utc::now(),
        }
    }

    pub fn for_supplier(mut self, supplier_id: SupplierId) -> Self {
        self.supplier_id = Some(supplier_id);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }
}
