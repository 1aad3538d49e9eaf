pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, NegotiatorFlow};
pub use states::{
    ExhaustionReason, NegotiatorAction, NegotiatorContext, NegotiatorEvent, NegotiatorState,
    TransitionOutcome,
};
