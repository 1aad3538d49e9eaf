use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::negotiation::NegotiationId;
use crate::domain::supplier::SupplierId;

pub const META_CHANNEL: &str = "channel";
pub const META_CHANNEL_MESSAGE_ID: &str = "channel_message_id";
pub const META_SUBJECT: &str = "subject";
pub const META_SENDER: &str = "sender";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Negotiator,
    Orchestrator,
    Supplier,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negotiator => "negotiator",
            Self::Orchestrator => "orchestrator",
            Self::Supplier => "supplier",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "negotiator" => Some(Self::Negotiator),
            "orchestrator" => Some(Self::Orchestrator),
            "supplier" => Some(Self::Supplier),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sequence: i64,
    pub negotiation_id: NegotiationId,
    pub supplier_id: Option<SupplierId>,
    pub role: MessageRole,
    pub content: String,
    pub completed: bool,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn channel_message_id(&self) -> Option<&str> {
        self.metadata.get(META_CHANNEL_MESSAGE_ID).map(String::as_str)
    }
}

/// A message that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub negotiation_id: NegotiationId,
    pub supplier_id: Option<SupplierId>,
    pub role: MessageRole,
    pub content: String,
    pub completed: bool,
    pub metadata: BTreeMap<String, String>,
}

impl NewMessage {
    pub fn new(
        negotiation_id: NegotiationId,
        supplier_id: Option<SupplierId>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            negotiation_id,
            supplier_id,
            role,
            content: content.into(),
            completed: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn channel_message_id(&self) -> Option<&str> {
        self.metadata
            .get(META_CHANNEL_MESSAGE_ID)
            .map(String::as_str)
            .filter(|token| !token.trim().is_empty())
    }
}

/// Whether an append stored a new row or matched an already delivered one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(Message),
    Duplicate(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            Self::Appended(message) | Self::Duplicate(message) => message,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Appended(message) | Self::Duplicate(message) => message,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}
