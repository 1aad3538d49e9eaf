use thiserror::Error;

use crate::flows::states::{
    ExhaustionReason, NegotiatorAction, NegotiatorContext, NegotiatorEvent, NegotiatorState,
    TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> NegotiatorState;
    fn transition(
        &self,
        current: &NegotiatorState,
        event: &NegotiatorEvent,
        context: &NegotiatorContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct NegotiatorFlow;

impl FlowDefinition for NegotiatorFlow {
    fn initial_state(&self) -> NegotiatorState {
        NegotiatorState::Idle
    }

    fn transition(
        &self,
        current: &NegotiatorState,
        event: &NegotiatorEvent,
        context: &NegotiatorContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_negotiator(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> NegotiatorState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &NegotiatorState,
        event: &NegotiatorEvent,
        context: &NegotiatorContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }
}

impl Default for FlowEngine<NegotiatorFlow> {
    fn default() -> Self {
        Self::new(NegotiatorFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: NegotiatorState, event: NegotiatorEvent },
    #[error("round limit of {max_rounds} already reached after {rounds} rounds")]
    RoundLimitExceeded { rounds: u32, max_rounds: u32 },
    #[error("round limit of {max_rounds} not reached yet ({rounds} rounds)")]
    RoundLimitNotReached { rounds: u32, max_rounds: u32 },
}

fn transition_negotiator(
    current: &NegotiatorState,
    event: &NegotiatorEvent,
    context: &NegotiatorContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use NegotiatorAction::{
        AppendNegotiatorMessage, ClaimSupplierReply, NotifyOrchestrator, RecordSummary,
    };
    use NegotiatorEvent::{
        CounterOfferSent, GenerationFailed, OfferAccepted, OpeningSent, ReplyTimedOut,
        RoundLimitReached, StepFailed, SupplierReplied,
    };
    use NegotiatorState::{AwaitingSupplierReply, Converged, EvaluatingOffer, Exhausted, Idle};

    let terminal_actions = |completed: Option<bool>| {
        let mut actions = Vec::with_capacity(3);
        if let Some(completed) = completed {
            actions.push(AppendNegotiatorMessage { completed });
        }
        actions.push(RecordSummary);
        actions.push(NotifyOrchestrator);
        actions
    };

    let (to, actions, exhaustion) = match (current, event) {
        (Idle, OpeningSent) => {
            (AwaitingSupplierReply, vec![AppendNegotiatorMessage { completed: false }], None)
        }
        (AwaitingSupplierReply, SupplierReplied) => {
            (EvaluatingOffer, vec![ClaimSupplierReply], None)
        }
        (AwaitingSupplierReply, ReplyTimedOut) => {
            (Exhausted, terminal_actions(None), Some(ExhaustionReason::ReplyTimeout))
        }
        (EvaluatingOffer, OfferAccepted) => (Converged, terminal_actions(Some(true)), None),
        (EvaluatingOffer, CounterOfferSent) => {
            if context.round_limit_reached() {
                return Err(FlowTransitionError::RoundLimitExceeded {
                    rounds: context.rounds,
                    max_rounds: context.max_rounds,
                });
            }
            (AwaitingSupplierReply, vec![AppendNegotiatorMessage { completed: false }], None)
        }
        (EvaluatingOffer, RoundLimitReached) => {
            if !context.round_limit_reached() {
                return Err(FlowTransitionError::RoundLimitNotReached {
                    rounds: context.rounds,
                    max_rounds: context.max_rounds,
                });
            }
            (Exhausted, terminal_actions(Some(true)), Some(ExhaustionReason::RoundLimit))
        }
        (Idle, GenerationFailed) | (EvaluatingOffer, GenerationFailed) => {
            (Exhausted, terminal_actions(None), Some(ExhaustionReason::GenerationFailure))
        }
        (Idle | AwaitingSupplierReply | EvaluatingOffer, StepFailed) => {
            (Exhausted, terminal_actions(None), Some(ExhaustionReason::InternalFailure))
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions, exhaustion })
}
