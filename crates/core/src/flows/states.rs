use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiatorState {
    Idle,
    AwaitingSupplierReply,
    EvaluatingOffer,
    Converged,
    Exhausted,
}

impl NegotiatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingSupplierReply => "awaiting_supplier_reply",
            Self::EvaluatingOffer => "evaluating_offer",
            Self::Converged => "converged",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "awaiting_supplier_reply" => Some(Self::AwaitingSupplierReply),
            "evaluating_offer" => Some(Self::EvaluatingOffer),
            "converged" => Some(Self::Converged),
            "exhausted" => Some(Self::Exhausted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    RoundLimit,
    ReplyTimeout,
    GenerationFailure,
    /// The negotiator kept failing on store or prompt errors and was closed out.
    InternalFailure,
}

impl ExhaustionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundLimit => "round_limit",
            Self::ReplyTimeout => "reply_timeout",
            Self::GenerationFailure => "generation_failure",
            Self::InternalFailure => "internal_failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "round_limit" => Some(Self::RoundLimit),
            "reply_timeout" => Some(Self::ReplyTimeout),
            "generation_failure" => Some(Self::GenerationFailure),
            "internal_failure" => Some(Self::InternalFailure),
            _ => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::RoundLimit => "the maximum number of rounds was reached without an acceptable offer",
            Self::ReplyTimeout => "the supplier did not reply in time",
            Self::GenerationFailure => "text generation kept failing",
            Self::InternalFailure => "the negotiator could not continue after repeated errors",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiatorEvent {
    OpeningSent,
    SupplierReplied,
    OfferAccepted,
    CounterOfferSent,
    RoundLimitReached,
    ReplyTimedOut,
    GenerationFailed,
    StepFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NegotiatorContext {
    /// Supplier replies claimed so far, including the one under evaluation.
    pub rounds: u32,
    pub max_rounds: u32,
}

impl NegotiatorContext {
    pub fn new(rounds: u32, max_rounds: u32) -> Self {
        Self { rounds, max_rounds }
    }

    pub fn round_limit_reached(&self) -> bool {
        self.rounds >= self.max_rounds
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiatorAction {
    AppendNegotiatorMessage { completed: bool },
    ClaimSupplierReply,
    RecordSummary,
    NotifyOrchestrator,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: NegotiatorState,
    pub to: NegotiatorState,
    pub event: NegotiatorEvent,
    pub actions: Vec<NegotiatorAction>,
    pub exhaustion: Option<ExhaustionReason>,
}

impl TransitionOutcome {
    /// Counter-offer sent; the pair goes back to waiting for the supplier.
    pub fn is_continuing(&self) -> bool {
        self.from == NegotiatorState::EvaluatingOffer
            && self.to == NegotiatorState::AwaitingSupplierReply
    }

    pub fn appended_message_completed(&self) -> Option<bool> {
        self.actions.iter().find_map(|action| match action {
            NegotiatorAction::AppendNegotiatorMessage { completed } => Some(*completed),
            _ => None,
        })
    }

    pub fn records_summary(&self) -> bool {
        self.actions.contains(&NegotiatorAction::RecordSummary)
    }
}
