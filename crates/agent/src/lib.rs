//! Negotiation agents.
//!
//! One [`Orchestrator`](orchestrator::Orchestrator) per negotiation supervises one
//! [`NegotiatorAgent`](negotiator::NegotiatorAgent) per supplier. Agents talk to the model only
//! through [`GenerationGateway`](llm::GenerationGateway) and keep all progress in the
//! conversation store, so a restarted process resumes every pair from its persisted state.
//!
//! The model writes messages and summaries. It never decides the state machine: transitions
//! come from `procura_core::flows`, and ranking from `procura_core::ranking`.

pub mod context;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod negotiator;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod runtime;

pub use context::AgentContext;
pub use error::AgentError;
pub use llm::{
    ChatCompletionsGateway, GenerationError, GenerationGateway, RecordedCall, ScriptedGateway,
    Turn, TurnRole,
};
pub use negotiator::{NegotiatorAgent, NegotiatorReport, StopReason};
pub use orchestrator::{Orchestrator, OrchestratorExit};
pub use prompts::{PromptError, PromptLibrary};
pub use retry::RetryPolicy;
pub use runtime::{NegotiationRuntime, NegotiationStatusReport, PairStatus, StartNegotiation};
