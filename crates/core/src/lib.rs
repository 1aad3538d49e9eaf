pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ranking;

pub use chrono;
pub use rust_decimal;

pub use domain::activity::{ActivityAction, ActivityId, OrchestratorActivity};
pub use domain::agent::{Agent, AgentId, AgentRole, PairKey, PairState};
pub use domain::email::{EmailConfig, EmailConfigId};
pub use domain::instructions::Instructions;
pub use domain::message::{AppendOutcome, Message, MessageId, MessageRole, NewMessage};
pub use domain::negotiation::{
    Negotiation, NegotiationId, NegotiationStatus, NewNegotiation, StatusChange,
};
pub use domain::product::{Product, ProductId};
pub use domain::summary::{NegotiationSummary, NewSummary, OfferTerms, PairOutcome};
pub use domain::supplier::{Supplier, SupplierId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{
    ExhaustionReason, FlowEngine, NegotiatorContext, NegotiatorEvent, NegotiatorFlow,
    NegotiatorState, TransitionOutcome,
};
pub use ranking::{LowestPriceRanking, OfferRanking, RankedOffer, RankingVerdict, UnrankedPair};
