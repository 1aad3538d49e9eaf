//! Per-supplier negotiator.
//!
//! The agent holds no state of its own between steps: every iteration reloads the pair from the
//! store, decides one transition, and commits it with a compare-and-swap on `state_version`. A
//! lost race (`Conflict`) just means another agent moved the pair first, so the loop reloads and
//! continues from whatever was persisted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use procura_channel::OutboundEmail;
use procura_core::chrono::Utc;
use procura_core::domain::agent::{PairKey, PairState};
use procura_core::domain::message::{MessageId, MessageRole, NewMessage};
use procura_core::domain::negotiation::Negotiation;
use procura_core::domain::summary::{NewSummary, OfferTerms, PairOutcome};
use procura_core::domain::supplier::Supplier;
use procura_core::flows::{
    ExhaustionReason, FlowEngine, NegotiatorContext, NegotiatorEvent, NegotiatorFlow,
    NegotiatorState, TransitionOutcome,
};
use procura_db::{PairTransition, RepositoryError};

use crate::context::AgentContext;
use crate::conversation::{negotiator_turns, parse_verdict, Decision};
use crate::error::AgentError;
use crate::llm::{GenerationError, Turn};

/// Consecutive failed steps tolerated before a pair is closed as exhausted.
pub(crate) const MAX_STEP_ATTEMPTS: u32 = 3;

/// Progress notifications sent to the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NegotiatorReport {
    Transition { pair: PairKey, outcome: TransitionOutcome, rounds: u32 },
    Finished { pair: PairKey, outcome: PairOutcome, summary: String },
    Stopped { pair: PairKey, reason: StopReason },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    NegotiationInactive,
    Failed(String),
}

enum Step {
    Continue,
    /// The commit lost a race; reload and decide again.
    Retry,
    Finished(PairOutcome),
    Stop(StopReason),
}

pub struct NegotiatorAgent {
    ctx: Arc<AgentContext>,
    pair: PairKey,
    reports: mpsc::UnboundedSender<NegotiatorReport>,
    cancel: watch::Receiver<bool>,
    engine: FlowEngine<NegotiatorFlow>,
}

impl NegotiatorAgent {
    pub fn new(
        ctx: Arc<AgentContext>,
        pair: PairKey,
        reports: mpsc::UnboundedSender<NegotiatorReport>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self { ctx, pair, reports, cancel, engine: FlowEngine::default() }
    }

    /// Drives the pair until it is terminal, the negotiation stops, or the run is cancelled.
    ///
    /// A step that keeps failing on store, prompt, or flow errors is retried with backoff; once
    /// the attempts run out the pair is closed as exhausted so the negotiation can still finish.
    pub async fn run(mut self) {
        info!(
            event_name = "negotiation.pair.started",
            negotiation_id = %self.pair.negotiation_id,
            supplier_id = %self.pair.supplier_id,
            "negotiator started"
        );

        let mut failures = 0_u32;
        loop {
            if *self.cancel.borrow() {
                self.stop(StopReason::Cancelled);
                return;
            }

            match self.step().await {
                Ok(Step::Continue | Step::Retry) => failures = 0,
                Ok(Step::Finished(outcome)) => {
                    info!(
                        event_name = "negotiation.pair.finished",
                        negotiation_id = %self.pair.negotiation_id,
                        supplier_id = %self.pair.supplier_id,
                        outcome = outcome.as_str(),
                        "negotiator reached a terminal state"
                    );
                    return;
                }
                Ok(Step::Stop(reason)) => {
                    info!(
                        event_name = "negotiation.pair.stopped",
                        negotiation_id = %self.pair.negotiation_id,
                        supplier_id = %self.pair.supplier_id,
                        reason = ?reason,
                        "negotiator stopped"
                    );
                    self.stop(reason);
                    return;
                }
                Err(error) if failures + 1 < MAX_STEP_ATTEMPTS => {
                    let delay = self.ctx.retry.delay_for(failures);
                    failures += 1;
                    warn!(
                        event_name = "negotiation.pair.step_failed",
                        negotiation_id = %self.pair.negotiation_id,
                        supplier_id = %self.pair.supplier_id,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "negotiator step failed; retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancelled(&mut self.cancel) => {}
                    }
                }
                Err(error) => {
                    warn!(
                        event_name = "negotiation.pair.failed",
                        negotiation_id = %self.pair.negotiation_id,
                        supplier_id = %self.pair.supplier_id,
                        attempts = MAX_STEP_ATTEMPTS,
                        error = %error,
                        "negotiator failed; closing pair"
                    );
                    let cause = error.to_string();
                    match force_exhaust(&self.ctx, &self.pair, &cause).await {
                        Ok(Some(forced)) => {
                            self.report(NegotiatorReport::Transition {
                                pair: self.pair.clone(),
                                outcome: forced.transition,
                                rounds: forced.rounds,
                            });
                            self.report(NegotiatorReport::Finished {
                                pair: self.pair.clone(),
                                outcome: forced.outcome,
                                summary: forced.summary,
                            });
                        }
                        Ok(None) => self.stop(StopReason::Failed(cause)),
                        Err(close_error) => {
                            warn!(
                                negotiation_id = %self.pair.negotiation_id,
                                supplier_id = %self.pair.supplier_id,
                                error = %close_error,
                                "could not close failed pair; leaving it to the orchestrator"
                            );
                            self.stop(StopReason::Failed(cause));
                        }
                    }
                    return;
                }
            }
        }
    }

    /// Reports the stop and drops the pair's wake-up channel.
    fn stop(&self, reason: StopReason) {
        self.ctx.store.release_pair(&self.pair);
        self.report(NegotiatorReport::Stopped { pair: self.pair.clone(), reason });
    }

    async fn step(&mut self) -> Result<Step, AgentError> {
        let state = self
            .ctx
            .store
            .load_pair(&self.pair)
            .await?
            .ok_or_else(|| AgentError::missing("pair", self.pair.to_string()))?;

        match state.state {
            NegotiatorState::Idle => self.open(state).await,
            NegotiatorState::AwaitingSupplierReply => self.await_reply(state).await,
            NegotiatorState::EvaluatingOffer => self.evaluate(state).await,
            NegotiatorState::Converged => Ok(Step::Finished(PairOutcome::Converged)),
            NegotiatorState::Exhausted => {
                let summary = self.ctx.store.find_summary(&self.pair).await?;
                let outcome = summary
                    .map(|summary| summary.outcome)
                    .unwrap_or(PairOutcome::Exhausted(ExhaustionReason::GenerationFailure));
                Ok(Step::Finished(outcome))
            }
        }
    }

    async fn open(&mut self, state: PairState) -> Result<Step, AgentError> {
        let (negotiation, supplier) = self.load_parties().await?;
        let system_prompt = self.system_prompt(&state, &negotiation, &supplier).await?;
        let history = self.ctx.store.pair_history(&self.pair).await?;
        let mut turns = negotiator_turns(&history);
        turns.push(Turn::user(self.ctx.prompts.opening_task(&supplier.name, &negotiation.product)?));

        let opening = match self.generate("opening", &system_prompt, &turns).await {
            Cancellable::Cancelled => return Ok(Step::Stop(StopReason::Cancelled)),
            Cancellable::Done(Ok(text)) => text,
            Cancellable::Done(Err(error)) => {
                return self.fail_generation(state, &negotiation, &supplier, error).await;
            }
        };

        let outcome = self.engine.apply(
            &state.state,
            &NegotiatorEvent::OpeningSent,
            &self.flow_context(state.rounds),
        )?;
        let message = self.negotiator_message(&opening, &outcome);
        let transition = self.transition(&state, &outcome, state.rounds, None, message, None);

        self.commit_and_notify(state.rounds, outcome, transition, &negotiation, &supplier, &opening)
            .await
    }

    async fn await_reply(&mut self, state: PairState) -> Result<Step, AgentError> {
        // Subscribe before reading so an append between the read and the wait still wakes us.
        let mut wake = self.ctx.store.subscribe_replies(&self.pair);
        wake.borrow_and_update();

        let next = self
            .ctx
            .store
            .next_supplier_reply(&self.pair, state.last_processed_message_id.as_ref())
            .await?;

        if let Some(reply) = next {
            let rounds = state.rounds + 1;
            let outcome = self.engine.apply(
                &state.state,
                &NegotiatorEvent::SupplierReplied,
                &self.flow_context(state.rounds),
            )?;
            let transition =
                self.transition(&state, &outcome, rounds, Some(reply.id.clone()), None, None);

            debug!(
                negotiation_id = %self.pair.negotiation_id,
                supplier_id = %self.pair.supplier_id,
                message_id = %reply.id.0,
                "claiming supplier reply"
            );
            return self.commit(rounds, outcome, transition).await;
        }

        let elapsed = (Utc::now() - state.updated_at).to_std().unwrap_or(Duration::ZERO);
        let remaining = self.ctx.settings.reply_timeout().saturating_sub(elapsed);
        if remaining.is_zero() {
            return self.time_out(state).await;
        }

        let wait = remaining.min(self.ctx.settings.poll_interval().max(Duration::from_millis(10)));
        tokio::select! {
            _ = wake.changed() => {}
            _ = tokio::time::sleep(wait) => {}
            changed = self.cancel.changed() => {
                if changed.is_err() {
                    return Ok(Step::Stop(StopReason::Cancelled));
                }
            }
        }
        Ok(Step::Continue)
    }

    async fn evaluate(&mut self, state: PairState) -> Result<Step, AgentError> {
        let (negotiation, supplier) = self.load_parties().await?;
        let system_prompt = self.system_prompt(&state, &negotiation, &supplier).await?;
        let history = self.ctx.store.pair_history(&self.pair).await?;
        let mut turns = negotiator_turns(&history);
        turns.push(Turn::user(
            self.ctx.prompts.evaluate_task(state.rounds, self.ctx.settings.max_rounds)?,
        ));

        let raw = match self.generate("evaluate", &system_prompt, &turns).await {
            Cancellable::Cancelled => return Ok(Step::Stop(StopReason::Cancelled)),
            Cancellable::Done(Ok(text)) => text,
            Cancellable::Done(Err(error)) => {
                return self.fail_generation(state, &negotiation, &supplier, error).await;
            }
        };

        let verdict = parse_verdict(&raw);
        if verdict.body.is_empty() {
            return self
                .fail_generation(state, &negotiation, &supplier, GenerationError::NoOutput)
                .await;
        }

        let context = self.flow_context(state.rounds);
        let event = match verdict.decision {
            Decision::Accept => NegotiatorEvent::OfferAccepted,
            Decision::Counter if context.round_limit_reached() => {
                NegotiatorEvent::RoundLimitReached
            }
            Decision::Counter => NegotiatorEvent::CounterOfferSent,
        };
        let outcome = self.engine.apply(&state.state, &event, &context)?;
        let message = self.negotiator_message(&verdict.body, &outcome);

        let summary = match pair_outcome(&outcome) {
            Some(pair_outcome) => {
                turns.pop();
                turns.push(Turn::assistant(&verdict.body));
                let offer = verdict.offer.clone();
                match self
                    .summarize(&negotiation, &supplier, &turns, pair_outcome, offer.as_ref())
                    .await
                {
                    Some(summary) => Some(NewSummary { outcome: pair_outcome, summary, offer }),
                    None => return Ok(Step::Stop(StopReason::Cancelled)),
                }
            }
            None => None,
        };

        let transition = self.transition(&state, &outcome, state.rounds, None, message, summary);
        self.commit_and_notify(state.rounds, outcome, transition, &negotiation, &supplier, &verdict.body)
            .await
    }

    async fn time_out(&mut self, state: PairState) -> Result<Step, AgentError> {
        let (negotiation, supplier) = self.load_parties().await?;
        let outcome = self.engine.apply(
            &state.state,
            &NegotiatorEvent::ReplyTimedOut,
            &self.flow_context(state.rounds),
        )?;
        let pair_outcome = pair_outcome(&outcome)
            .unwrap_or(PairOutcome::Exhausted(ExhaustionReason::ReplyTimeout));

        let history = self.ctx.store.pair_history(&self.pair).await?;
        let turns = negotiator_turns(&history);
        let Some(summary) =
            self.summarize(&negotiation, &supplier, &turns, pair_outcome, None).await
        else {
            return Ok(Step::Stop(StopReason::Cancelled));
        };

        info!(
            event_name = "negotiation.pair.reply_timeout",
            negotiation_id = %self.pair.negotiation_id,
            supplier_id = %self.pair.supplier_id,
            timeout_secs = self.ctx.settings.reply_timeout_secs,
            "supplier did not reply in time"
        );

        let summary = NewSummary { outcome: pair_outcome, summary, offer: None };
        let transition = self.transition(&state, &outcome, state.rounds, None, None, Some(summary));
        self.commit(state.rounds, outcome, transition).await
    }

    async fn fail_generation(
        &mut self,
        state: PairState,
        negotiation: &Negotiation,
        supplier: &Supplier,
        error: GenerationError,
    ) -> Result<Step, AgentError> {
        warn!(
            event_name = "negotiation.pair.generation_failed",
            negotiation_id = %self.pair.negotiation_id,
            supplier_id = %self.pair.supplier_id,
            state = state.state.as_str(),
            error = %error,
            "generation failed; closing pair"
        );

        let outcome = self.engine.apply(
            &state.state,
            &NegotiatorEvent::GenerationFailed,
            &self.flow_context(state.rounds),
        )?;
        let pair_outcome = pair_outcome(&outcome)
            .unwrap_or(PairOutcome::Exhausted(ExhaustionReason::GenerationFailure));
        let summary = NewSummary {
            outcome: pair_outcome,
            summary: format!(
                "{} Last error: {error}.",
                fallback_summary(&supplier.name, &negotiation.product, pair_outcome, None)
            ),
            offer: None,
        };
        let transition = self.transition(&state, &outcome, state.rounds, None, None, Some(summary));
        self.commit(state.rounds, outcome, transition).await
    }

    /// Pair summary from the model, or a deterministic sentence when generation fails. `None`
    /// only when the run was cancelled mid-call.
    async fn summarize(
        &mut self,
        negotiation: &Negotiation,
        supplier: &Supplier,
        turns: &[Turn],
        outcome: PairOutcome,
        offer: Option<&OfferTerms>,
    ) -> Option<String> {
        let fallback = fallback_summary(&supplier.name, &negotiation.product, outcome, offer);
        let described = match outcome {
            PairOutcome::Converged => "converged".to_string(),
            PairOutcome::Exhausted(reason) => format!("exhausted, {}", reason.describe()),
        };
        let offer_text = offer.map(ToString::to_string);
        let task = match self.ctx.prompts.summary_task(
            &supplier.name,
            &negotiation.product,
            &described,
            offer_text.as_deref(),
        ) {
            Ok(task) => task,
            Err(error) => {
                warn!(error = %error, "summary prompt failed to render; using fallback summary");
                return Some(fallback);
            }
        };

        let mut history = turns.to_vec();
        history.push(Turn::user(task));
        let system_prompt = format!(
            "You summarise procurement negotiations for a buyer. Product: {}. Strategy: {}.",
            negotiation.product, negotiation.strategy
        );

        match self.generate("summary", &system_prompt, &history).await {
            Cancellable::Cancelled => None,
            Cancellable::Done(Ok(summary)) => Some(summary),
            Cancellable::Done(Err(error)) => {
                warn!(
                    negotiation_id = %self.pair.negotiation_id,
                    supplier_id = %self.pair.supplier_id,
                    error = %error,
                    "summary generation failed; using fallback summary"
                );
                Some(fallback)
            }
        }
    }

    async fn commit(
        &mut self,
        rounds: u32,
        outcome: TransitionOutcome,
        transition: PairTransition,
    ) -> Result<Step, AgentError> {
        match self.ctx.store.commit_pair_transition(transition).await {
            Ok(commit) => {
                info!(
                    event_name = "negotiation.pair.transition",
                    negotiation_id = %self.pair.negotiation_id,
                    supplier_id = %self.pair.supplier_id,
                    from = outcome.from.as_str(),
                    to = outcome.to.as_str(),
                    rounds,
                    state_version = commit.pair.state_version,
                    "pair transition committed"
                );
                let terminal = pair_outcome(&outcome);
                self.report(NegotiatorReport::Transition {
                    pair: self.pair.clone(),
                    outcome,
                    rounds,
                });

                let Some(terminal) = terminal else {
                    return Ok(Step::Continue);
                };
                let (outcome, summary) = commit
                    .summary
                    .map(|summary| (summary.outcome, summary.summary))
                    .unwrap_or((terminal, String::new()));
                self.report(NegotiatorReport::Finished { pair: self.pair.clone(), outcome, summary });
                Ok(Step::Finished(outcome))
            }
            Err(RepositoryError::Conflict(reason)) => {
                debug!(
                    negotiation_id = %self.pair.negotiation_id,
                    supplier_id = %self.pair.supplier_id,
                    reason = %reason,
                    "pair moved concurrently; reloading"
                );
                Ok(Step::Retry)
            }
            Err(RepositoryError::Inactive { .. }) => Ok(Step::Stop(StopReason::NegotiationInactive)),
            Err(error) => Err(error.into()),
        }
    }

    /// Commits, then mails the message just appended. Delivery failures are logged only: the
    /// message is already part of the conversation.
    async fn commit_and_notify(
        &mut self,
        rounds: u32,
        outcome: TransitionOutcome,
        transition: PairTransition,
        negotiation: &Negotiation,
        supplier: &Supplier,
        body: &str,
    ) -> Result<Step, AgentError> {
        let step = self.commit(rounds, outcome, transition).await?;
        if matches!(step, Step::Stop(_) | Step::Retry) {
            return Ok(step);
        }

        if let Some(address) = supplier.email.as_deref() {
            let email = OutboundEmail::for_pair(&self.pair, address, &negotiation.product, body);
            if let Err(error) = self.ctx.mailer.send(email).await {
                warn!(
                    event_name = "negotiation.pair.mail_failed",
                    negotiation_id = %self.pair.negotiation_id,
                    supplier_id = %self.pair.supplier_id,
                    error = %error,
                    "failed to mail negotiator message"
                );
            }
        }
        Ok(step)
    }

    async fn load_parties(&self) -> Result<(Negotiation, Supplier), AgentError> {
        let negotiation = self
            .ctx
            .store
            .find_negotiation(&self.pair.negotiation_id)
            .await?
            .ok_or_else(|| AgentError::missing("negotiation", self.pair.negotiation_id.0.clone()))?;
        let supplier = self
            .ctx
            .suppliers
            .find_supplier(&self.pair.supplier_id)
            .await?
            .ok_or_else(|| AgentError::missing("supplier", self.pair.supplier_id.0.clone()))?;
        Ok((negotiation, supplier))
    }

    /// Instructions are read on every step so revisions apply from the next turn on.
    async fn system_prompt(
        &self,
        state: &PairState,
        negotiation: &Negotiation,
        supplier: &Supplier,
    ) -> Result<String, AgentError> {
        let instructions = self.ctx.store.find_instructions(&self.pair).await?;
        Ok(self.ctx.prompts.negotiator_system(
            &state.system_prompt,
            negotiation,
            supplier,
            instructions.as_ref().map(|instructions| instructions.text.as_str()),
        )?)
    }

    async fn generate(
        &mut self,
        operation: &'static str,
        system_prompt: &str,
        history: &[Turn],
    ) -> Cancellable<Result<String, GenerationError>> {
        let call =
            self.ctx.retry.generate(self.ctx.gateway.as_ref(), operation, system_prompt, history);
        tokio::select! {
            result = call => Cancellable::Done(result),
            _ = cancelled(&mut self.cancel) => Cancellable::Cancelled,
        }
    }

    fn flow_context(&self, rounds: u32) -> NegotiatorContext {
        NegotiatorContext::new(rounds, self.ctx.settings.max_rounds)
    }

    fn negotiator_message(&self, body: &str, outcome: &TransitionOutcome) -> Option<NewMessage> {
        outcome.appended_message_completed().map(|completed| {
            NewMessage::new(
                self.pair.negotiation_id.clone(),
                Some(self.pair.supplier_id.clone()),
                MessageRole::Negotiator,
                body,
            )
            .completed(completed)
        })
    }

    fn transition(
        &self,
        state: &PairState,
        outcome: &TransitionOutcome,
        rounds: u32,
        claimed: Option<MessageId>,
        message: Option<NewMessage>,
        summary: Option<NewSummary>,
    ) -> PairTransition {
        PairTransition {
            pair: self.pair.clone(),
            agent_id: state.agent_id.clone(),
            expected_version: state.state_version,
            to_state: outcome.to,
            rounds,
            last_processed_message_id: claimed.or_else(|| state.last_processed_message_id.clone()),
            message,
            summary,
        }
    }

    fn report(&self, report: NegotiatorReport) {
        if self.reports.send(report).is_err() {
            debug!(
                negotiation_id = %self.pair.negotiation_id,
                supplier_id = %self.pair.supplier_id,
                "orchestrator is gone; dropping negotiator report"
            );
        }
    }
}

enum Cancellable<T> {
    Done(T),
    Cancelled,
}

/// Resolves once cancellation is requested or the sender side is dropped.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// A pair closed by [`force_exhaust`].
pub(crate) struct ForcedExhaustion {
    pub transition: TransitionOutcome,
    pub rounds: u32,
    pub outcome: PairOutcome,
    pub summary: String,
}

/// Closes an open pair as `Exhausted(InternalFailure)` with a deterministic summary. `None`
/// when the pair is already terminal or the negotiation is no longer active.
pub(crate) async fn force_exhaust(
    ctx: &AgentContext,
    pair: &PairKey,
    cause: &str,
) -> Result<Option<ForcedExhaustion>, AgentError> {
    let engine = FlowEngine::<NegotiatorFlow>::default();

    for _ in 0..MAX_STEP_ATTEMPTS {
        let state = ctx
            .store
            .load_pair(pair)
            .await?
            .ok_or_else(|| AgentError::missing("pair", pair.to_string()))?;
        if state.is_terminal() {
            return Ok(None);
        }

        let transition = engine.apply(
            &state.state,
            &NegotiatorEvent::StepFailed,
            &NegotiatorContext::new(state.rounds, ctx.settings.max_rounds),
        )?;
        let outcome = PairOutcome::Exhausted(ExhaustionReason::InternalFailure);

        // Names are cosmetic here; the lookups may be what is failing.
        let product = match ctx.store.find_negotiation(&pair.negotiation_id).await {
            Ok(Some(negotiation)) => negotiation.product,
            _ => "the requested product".to_string(),
        };
        let supplier_name = match ctx.suppliers.find_supplier(&pair.supplier_id).await {
            Ok(Some(supplier)) => supplier.name,
            _ => pair.supplier_id.0.clone(),
        };
        let summary = format!(
            "{} Last error: {cause}.",
            fallback_summary(&supplier_name, &product, outcome, None)
        );

        let commit = ctx
            .store
            .commit_pair_transition(PairTransition {
                pair: pair.clone(),
                agent_id: state.agent_id.clone(),
                expected_version: state.state_version,
                to_state: transition.to,
                rounds: state.rounds,
                last_processed_message_id: state.last_processed_message_id.clone(),
                message: None,
                summary: Some(NewSummary { outcome, summary: summary.clone(), offer: None }),
            })
            .await;

        match commit {
            Ok(_) => {
                warn!(
                    event_name = "negotiation.pair.force_exhausted",
                    negotiation_id = %pair.negotiation_id,
                    supplier_id = %pair.supplier_id,
                    from = transition.from.as_str(),
                    rounds = state.rounds,
                    "pair closed after repeated failures"
                );
                return Ok(Some(ForcedExhaustion {
                    transition,
                    rounds: state.rounds,
                    outcome,
                    summary,
                }));
            }
            Err(RepositoryError::Conflict(_)) => continue,
            Err(RepositoryError::Inactive { .. }) => return Ok(None),
            Err(error) => return Err(error.into()),
        }
    }

    Ok(None)
}

fn pair_outcome(outcome: &TransitionOutcome) -> Option<PairOutcome> {
    match outcome.to {
        NegotiatorState::Converged => Some(PairOutcome::Converged),
        NegotiatorState::Exhausted => outcome.exhaustion.map(PairOutcome::Exhausted),
        _ => None,
    }
}

fn fallback_summary(
    supplier_name: &str,
    product: &str,
    outcome: PairOutcome,
    offer: Option<&OfferTerms>,
) -> String {
    match (outcome, offer) {
        (PairOutcome::Converged, Some(offer)) => {
            format!("Agreement reached with {supplier_name} on {product} at {offer} per unit.")
        }
        (PairOutcome::Converged, None) => {
            format!("Agreement reached with {supplier_name} on {product}; no unit price was stated.")
        }
        (PairOutcome::Exhausted(reason), _) => {
            format!("No agreement with {supplier_name} on {product}: {}.", reason.describe())
        }
    }
}
