//! Orchestrator: one per negotiation. Issues instructions, supervises the negotiators, and closes
//! the negotiation once every pair is terminal.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use procura_core::domain::activity::{ActivityAction, OrchestratorActivity};
use procura_core::domain::agent::{AgentRole, PairKey, PairState};
use procura_core::domain::instructions::Instructions;
use procura_core::domain::negotiation::{Negotiation, NegotiationId, NegotiationStatus};
use procura_core::domain::summary::PairOutcome;
use procura_core::domain::supplier::{Supplier, SupplierId};
use procura_core::flows::TransitionOutcome;
use procura_core::ranking::RankingVerdict;

use crate::context::AgentContext;
use crate::conversation::{orchestrator_turns, parse_instructions};
use crate::error::AgentError;
use crate::llm::Turn;
use crate::negotiator::{
    cancelled, force_exhaust, NegotiatorAgent, NegotiatorReport, StopReason,
};
use crate::prompts::DEFAULT_ORCHESTRATOR_PROMPT;

/// How an orchestrator run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrchestratorExit {
    Completed { final_summary: String },
    /// Another run already closed the negotiation.
    AlreadyClosed { status: NegotiationStatus },
    Cancelled,
    /// Every negotiator stopped and some pairs could not be closed, not even as exhausted.
    Stalled { open_pairs: usize },
}

enum Progress {
    /// Number of pairs still running.
    Open(usize),
    Closed(NegotiationStatus),
}

pub struct Orchestrator {
    ctx: Arc<AgentContext>,
    negotiation_id: NegotiationId,
    cancel: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        ctx: Arc<AgentContext>,
        negotiation_id: NegotiationId,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self { ctx, negotiation_id, cancel }
    }

    pub async fn run(mut self) -> Result<OrchestratorExit, AgentError> {
        let negotiation = self.load_negotiation().await?;
        if negotiation.status != NegotiationStatus::Active {
            return Ok(OrchestratorExit::AlreadyClosed { status: negotiation.status });
        }

        let suppliers = self.load_suppliers().await?;
        let system_prompt = self.system_prompt(&negotiation, &suppliers).await?;
        let started = self.record_started(&negotiation).await;
        self.audit("negotiation_started", started);

        let pairs = self.ctx.store.list_pairs(&self.negotiation_id).await?;
        let issued = self.issue_instructions(&negotiation, &system_prompt, &suppliers, &pairs).await;
        self.audit("instructions_issued", issued);

        let (reports, mut inbox) = mpsc::unbounded_channel();
        let mut negotiators = JoinSet::new();
        for pair in pairs.iter().filter(|pair| !pair.is_terminal()) {
            let agent = NegotiatorAgent::new(
                Arc::clone(&self.ctx),
                pair.pair.clone(),
                reports.clone(),
                self.cancel.clone(),
            );
            negotiators.spawn(agent.run());
        }
        drop(reports);

        info!(
            event_name = "negotiation.orchestrator.started",
            negotiation_id = %self.negotiation_id,
            pairs = pairs.len(),
            running = negotiators.len(),
            "orchestrator supervising negotiators"
        );

        let mut exit = self.settle(&negotiation, &system_prompt, &suppliers).await?;

        while exit.is_none() {
            let received = tokio::select! {
                report = inbox.recv() => Some(report),
                _ = cancelled(&mut self.cancel) => None,
            };
            let Some(report) = received else {
                exit = Some(OrchestratorExit::Cancelled);
                break;
            };

            match report {
                Some(NegotiatorReport::Transition { pair, outcome, rounds }) => {
                    let recorded = self.record_transition(&pair, &outcome, rounds).await;
                    self.audit("negotiator_transition", recorded);
                    if outcome.is_continuing() && self.ctx.settings.revise_instructions {
                        let revised = self
                            .revise_instructions(&negotiation, &system_prompt, &suppliers, &pair)
                            .await;
                        self.audit("instructions_revised", revised);
                    }
                }
                Some(NegotiatorReport::Finished { pair, outcome, summary }) => {
                    let recorded =
                        self.record_outcome(&negotiation, &suppliers, &pair, outcome, &summary).await;
                    self.audit("outcome_recorded", recorded);
                    exit = self.settle(&negotiation, &system_prompt, &suppliers).await?;
                }
                Some(NegotiatorReport::Stopped { pair, reason: StopReason::Failed(cause) }) => {
                    self.close_failed_pair(&negotiation, &suppliers, &pair, &cause).await;
                    exit = self.settle(&negotiation, &system_prompt, &suppliers).await?;
                }
                Some(NegotiatorReport::Stopped { pair, reason }) => {
                    debug!(
                        negotiation_id = %self.negotiation_id,
                        supplier_id = %pair.supplier_id,
                        reason = ?reason,
                        "negotiator stopped"
                    );
                }
                None => {
                    if *self.cancel.borrow() {
                        exit = Some(OrchestratorExit::Cancelled);
                        break;
                    }
                    exit = self.settle(&negotiation, &system_prompt, &suppliers).await?;
                    if exit.is_some() {
                        break;
                    }
                    // Every negotiator is gone; nobody else will move the open pairs.
                    for pair in self.ctx.store.list_pairs(&self.negotiation_id).await? {
                        if !pair.is_terminal() {
                            self.close_failed_pair(
                                &negotiation,
                                &suppliers,
                                &pair.pair,
                                "negotiator stopped before the pair was terminal",
                            )
                            .await;
                        }
                    }
                    exit = Some(match self.settle(&negotiation, &system_prompt, &suppliers).await? {
                        Some(exit) => exit,
                        None => OrchestratorExit::Stalled { open_pairs: self.open_pairs().await? },
                    });
                }
            }
        }
        let exit = exit.unwrap_or(OrchestratorExit::Cancelled);

        while let Some(joined) = negotiators.join_next().await {
            if let Err(error) = joined {
                if !error.is_cancelled() {
                    warn!(
                        negotiation_id = %self.negotiation_id,
                        error = %error,
                        "negotiator task panicked"
                    );
                }
            }
        }

        info!(
            event_name = "negotiation.orchestrator.finished",
            negotiation_id = %self.negotiation_id,
            exit = ?exit,
            "orchestrator finished"
        );
        Ok(exit)
    }

    async fn load_negotiation(&self) -> Result<Negotiation, AgentError> {
        self.ctx
            .store
            .find_negotiation(&self.negotiation_id)
            .await?
            .ok_or_else(|| AgentError::missing("negotiation", self.negotiation_id.0.clone()))
    }

    async fn load_suppliers(&self) -> Result<Vec<Supplier>, AgentError> {
        let agents = self.ctx.store.list_agents(&self.negotiation_id).await?;
        let mut suppliers = Vec::with_capacity(agents.len());
        for supplier_id in agents.iter().filter_map(|agent| agent.supplier_id.as_ref()) {
            let supplier = self
                .ctx
                .suppliers
                .find_supplier(supplier_id)
                .await?
                .ok_or_else(|| AgentError::missing("supplier", supplier_id.0.clone()))?;
            suppliers.push(supplier);
        }
        Ok(suppliers)
    }

    async fn system_prompt(
        &self,
        negotiation: &Negotiation,
        suppliers: &[Supplier],
    ) -> Result<String, AgentError> {
        let agents = self.ctx.store.list_agents(&self.negotiation_id).await?;
        let base = agents
            .iter()
            .find(|agent| agent.role == AgentRole::Orchestrator)
            .map(|agent| agent.system_prompt.as_str())
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or(DEFAULT_ORCHESTRATOR_PROMPT);
        Ok(self.ctx.prompts.orchestrator_system(base, negotiation, suppliers)?)
    }

    /// `negotiation_started` is written once per negotiation, not once per (re)start.
    async fn record_started(&self, negotiation: &Negotiation) -> Result<(), AgentError> {
        let history = self.ctx.store.list_activity(&self.negotiation_id, None).await?;
        if history.iter().any(|activity| activity.action == ActivityAction::NegotiationStarted) {
            debug!(negotiation_id = %self.negotiation_id, "resuming negotiation");
            return Ok(());
        }

        self.ctx
            .store
            .record_activity(
                OrchestratorActivity::new(
                    self.negotiation_id.clone(),
                    ActivityAction::NegotiationStarted,
                    format!("Negotiation for {} started", negotiation.product),
                )
                .with_detail("product", negotiation.product.clone())
                .with_detail("strategy", negotiation.strategy.clone()),
            )
            .await?;
        Ok(())
    }

    /// One model call for every pair still lacking instructions; suppliers the model skipped
    /// get the template text.
    async fn issue_instructions(
        &self,
        negotiation: &Negotiation,
        system_prompt: &str,
        suppliers: &[Supplier],
        pairs: &[PairState],
    ) -> Result<(), AgentError> {
        let mut missing = Vec::new();
        for pair in pairs.iter().filter(|pair| !pair.is_terminal()) {
            if self.ctx.store.find_instructions(&pair.pair).await?.is_none() {
                missing.push(pair.pair.clone());
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        let task = self.ctx.prompts.instructions_task()?;
        let generated = match self
            .ctx
            .retry
            .generate(self.ctx.gateway.as_ref(), "instructions", system_prompt, &[Turn::user(task)])
            .await
        {
            Ok(raw) => parse_instructions(&raw),
            Err(error) => {
                warn!(
                    event_name = "negotiation.orchestrator.instructions_failed",
                    negotiation_id = %self.negotiation_id,
                    error = %error,
                    "instruction generation failed; using template instructions"
                );
                HashMap::new()
            }
        };

        for pair in missing {
            let name = supplier_name(suppliers, &pair.supplier_id);
            let (text, source) = match generated.get(&pair.supplier_id) {
                Some(text) => (text.clone(), "model"),
                None => (template_instructions(negotiation, name), "template"),
            };
            self.ctx.store.upsert_instructions(Instructions::new(pair.clone(), text)).await?;
            self.ctx
                .store
                .record_activity(
                    OrchestratorActivity::new(
                        self.negotiation_id.clone(),
                        ActivityAction::InstructionsIssued,
                        format!("Instructions issued for {name}"),
                    )
                    .for_supplier(pair.supplier_id.clone())
                    .with_detail("source", source),
                )
                .await?;
        }
        Ok(())
    }

    async fn revise_instructions(
        &self,
        negotiation: &Negotiation,
        system_prompt: &str,
        suppliers: &[Supplier],
        pair: &PairKey,
    ) -> Result<(), AgentError> {
        let Some(supplier) = suppliers.iter().find(|supplier| supplier.id == pair.supplier_id)
        else {
            return Ok(());
        };
        let current = self.ctx.store.find_instructions(pair).await?;
        let history = self.ctx.store.negotiation_history(&negotiation.id).await?;

        let mut turns = orchestrator_turns(&history, &supplier_names(suppliers));
        turns.push(Turn::user(self.ctx.prompts.revise_task(
            supplier,
            current.as_ref().map(|instructions| instructions.text.as_str()),
        )?));

        let revised = match self
            .ctx
            .retry
            .generate(self.ctx.gateway.as_ref(), "revise", system_prompt, &turns)
            .await
        {
            Ok(raw) => parse_instructions(&raw).remove(&pair.supplier_id),
            Err(error) => {
                warn!(
                    negotiation_id = %self.negotiation_id,
                    supplier_id = %pair.supplier_id,
                    error = %error,
                    "instruction revision failed; keeping current instructions"
                );
                None
            }
        };

        let Some(text) = revised else {
            return Ok(());
        };
        self.ctx.store.upsert_instructions(Instructions::new(pair.clone(), text)).await?;
        self.ctx
            .store
            .record_activity(
                OrchestratorActivity::new(
                    self.negotiation_id.clone(),
                    ActivityAction::InstructionsIssued,
                    format!("Instructions revised for {}", supplier.name),
                )
                .for_supplier(pair.supplier_id.clone())
                .with_detail("source", "revision"),
            )
            .await?;
        Ok(())
    }

    async fn record_transition(
        &self,
        pair: &PairKey,
        outcome: &TransitionOutcome,
        rounds: u32,
    ) -> Result<(), AgentError> {
        self.ctx
            .store
            .record_activity(
                OrchestratorActivity::new(
                    self.negotiation_id.clone(),
                    ActivityAction::NegotiatorTransition,
                    format!("{} -> {}", outcome.from.as_str(), outcome.to.as_str()),
                )
                .for_supplier(pair.supplier_id.clone())
                .with_detail("from", outcome.from.as_str())
                .with_detail("to", outcome.to.as_str())
                .with_detail("event", format!("{:?}", outcome.event))
                .with_detail("rounds", rounds.to_string())
                .completed(outcome.to.is_terminal()),
            )
            .await?;
        Ok(())
    }

    async fn record_outcome(
        &self,
        negotiation: &Negotiation,
        suppliers: &[Supplier],
        pair: &PairKey,
        outcome: PairOutcome,
        summary: &str,
    ) -> Result<(), AgentError> {
        let name = supplier_name(suppliers, &pair.supplier_id);
        let mut activity = OrchestratorActivity::new(
            self.negotiation_id.clone(),
            ActivityAction::OutcomeRecorded,
            format!("{name}: {}", outcome.as_str()),
        )
        .for_supplier(pair.supplier_id.clone())
        .with_detail("outcome", outcome.as_str());
        if let Some(reason) = outcome.exhaustion_reason() {
            activity = activity.with_detail("reason", reason.as_str());
        }
        self.ctx.store.record_activity(activity).await?;

        if !summary.trim().is_empty() {
            let insights = format!(
                "{} negotiation ({}): {}",
                negotiation.product,
                outcome.as_str(),
                summary.trim()
            );
            if let Err(error) = self.ctx.suppliers.update_insights(&pair.supplier_id, &insights).await
            {
                warn!(
                    supplier_id = %pair.supplier_id,
                    error = %error,
                    "failed to update supplier insights"
                );
            }
        }
        Ok(())
    }

    async fn progress(&self) -> Result<Progress, AgentError> {
        let negotiation = self.load_negotiation().await?;
        if negotiation.status != NegotiationStatus::Active {
            return Ok(Progress::Closed(negotiation.status));
        }
        Ok(Progress::Open(self.open_pairs().await?))
    }

    async fn open_pairs(&self) -> Result<usize, AgentError> {
        let pairs = self.ctx.store.list_pairs(&self.negotiation_id).await?;
        Ok(pairs.iter().filter(|pair| !pair.is_terminal()).count())
    }

    /// Finalizes once no pair is open; `None` while some pair is still running.
    async fn settle(
        &mut self,
        negotiation: &Negotiation,
        system_prompt: &str,
        suppliers: &[Supplier],
    ) -> Result<Option<OrchestratorExit>, AgentError> {
        match self.progress().await? {
            Progress::Open(0) => Ok(Some(self.finalize(negotiation, system_prompt, suppliers).await?)),
            Progress::Open(_) => Ok(None),
            Progress::Closed(status) => Ok(Some(OrchestratorExit::AlreadyClosed { status })),
        }
    }

    /// Closes the pair of a negotiator that gave up, so the negotiation can still complete.
    async fn close_failed_pair(
        &self,
        negotiation: &Negotiation,
        suppliers: &[Supplier],
        pair: &PairKey,
        cause: &str,
    ) {
        match force_exhaust(&self.ctx, pair, cause).await {
            Ok(Some(forced)) => {
                let recorded = self.record_transition(pair, &forced.transition, forced.rounds).await;
                self.audit("negotiator_transition", recorded);
                let recorded = self
                    .record_outcome(negotiation, suppliers, pair, forced.outcome, &forced.summary)
                    .await;
                self.audit("outcome_recorded", recorded);
            }
            Ok(None) => {}
            Err(error) => warn!(
                event_name = "negotiation.orchestrator.close_failed",
                negotiation_id = %self.negotiation_id,
                supplier_id = %pair.supplier_id,
                error = %error,
                "could not close the pair of a failed negotiator"
            ),
        }
    }

    /// Audit and instruction writes never stop supervision; failures are logged.
    fn audit(&self, action: &'static str, result: Result<(), AgentError>) {
        if let Err(error) = result {
            warn!(
                event_name = "negotiation.orchestrator.audit_failed",
                negotiation_id = %self.negotiation_id,
                action,
                error = %error,
                "orchestrator write failed; continuing"
            );
        }
    }

    async fn finalize(
        &mut self,
        negotiation: &Negotiation,
        system_prompt: &str,
        suppliers: &[Supplier],
    ) -> Result<OrchestratorExit, AgentError> {
        let summaries = self.ctx.store.list_summaries(&self.negotiation_id).await?;
        let verdict = self.ctx.ranking.rank(&summaries);
        let names = supplier_names(suppliers);
        let ranking = describe_ranking(&verdict, &names);

        let history = self.ctx.store.negotiation_history(&self.negotiation_id).await?;
        let mut turns = orchestrator_turns(&history, &names);
        turns.push(Turn::user(self.ctx.prompts.final_summary_task(&negotiation.product, &ranking)?));

        let call = self.ctx.retry.generate(
            self.ctx.gateway.as_ref(),
            "final_summary",
            system_prompt,
            &turns,
        );
        let generated = tokio::select! {
            result = call => result,
            _ = cancelled(&mut self.cancel) => return Ok(OrchestratorExit::Cancelled),
        };
        let final_summary = match generated {
            Ok(text) => format!("{text}\n\n{ranking}"),
            Err(error) => {
                warn!(
                    negotiation_id = %self.negotiation_id,
                    error = %error,
                    "final summary generation failed; using ranking only"
                );
                ranking
            }
        };

        let change = self
            .ctx
            .store
            .transition_negotiation(
                &self.negotiation_id,
                NegotiationStatus::Completed,
                Some(final_summary.clone()),
            )
            .await?;

        if !change.applied() {
            return Ok(OrchestratorExit::AlreadyClosed { status: change.status() });
        }

        let mut activity = OrchestratorActivity::new(
            self.negotiation_id.clone(),
            ActivityAction::NegotiationCompleted,
            match verdict.best() {
                Some(best) => format!(
                    "Negotiation completed; best offer from {}",
                    names.get(&best.supplier_id).map(String::as_str).unwrap_or(&best.supplier_id.0)
                ),
                None => "Negotiation completed without an acceptable offer".to_string(),
            },
        )
        .with_detail("acceptable_offer", verdict.has_acceptable_offer().to_string());
        if let Some(best) = verdict.best() {
            activity = activity.with_detail("best_supplier_id", best.supplier_id.0.clone());
            if let Some(offer) = &best.offer {
                activity = activity.with_detail("best_offer", offer.to_string());
            }
        }
        let recorded = self.ctx.store.record_activity(activity).await.map_err(AgentError::from);
        self.audit("negotiation_completed", recorded);

        info!(
            event_name = "negotiation.completed",
            negotiation_id = %self.negotiation_id,
            acceptable_offer = verdict.has_acceptable_offer(),
            "negotiation completed"
        );
        Ok(OrchestratorExit::Completed { final_summary })
    }
}

fn supplier_names(suppliers: &[Supplier]) -> HashMap<SupplierId, String> {
    suppliers.iter().map(|supplier| (supplier.id.clone(), supplier.name.clone())).collect()
}

fn supplier_name<'a>(suppliers: &'a [Supplier], id: &'a SupplierId) -> &'a str {
    suppliers
        .iter()
        .find(|supplier| &supplier.id == id)
        .map(|supplier| supplier.name.as_str())
        .unwrap_or(id.0.as_str())
}

fn template_instructions(negotiation: &Negotiation, supplier_name: &str) -> String {
    format!(
        "Negotiate the unit price of {} with {supplier_name} following the {} strategy. Open by \
         asking for their best price, counter any offer that is not clearly competitive, and \
         accept only terms you would defend to the buyer.",
        negotiation.product, negotiation.strategy
    )
}

/// Plain-text ranking used both as model input and as the final summary fallback.
pub fn describe_ranking(verdict: &RankingVerdict, names: &HashMap<SupplierId, String>) -> String {
    let name = |id: &SupplierId| names.get(id).cloned().unwrap_or_else(|| id.0.clone());
    let mut text = String::new();

    match verdict {
        RankingVerdict::Ranked { ranked, unranked, currencies_mixed } => {
            for offer in ranked {
                let terms = offer
                    .offer
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "no stated price".to_string());
                let _ = writeln!(text, "{}. {}: {terms}", offer.position, name(&offer.supplier_id));
            }
            if *currencies_mixed {
                text.push_str("Note: offers are quoted in different currencies.\n");
            }
            for pair in unranked {
                let reason = pair
                    .outcome
                    .exhaustion_reason()
                    .map(|reason| reason.describe())
                    .unwrap_or("not ranked");
                let _ = writeln!(text, "- {}: no agreement ({reason})", name(&pair.supplier_id));
            }
        }
        RankingVerdict::NoAcceptableOffer { unranked } => {
            text.push_str("No acceptable offer was obtained.\n");
            for pair in unranked {
                let reason = pair
                    .outcome
                    .exhaustion_reason()
                    .map(|reason| reason.describe())
                    .unwrap_or("not ranked");
                let _ = writeln!(text, "- {}: no agreement ({reason})", name(&pair.supplier_id));
            }
        }
    }

    text.trim_end().to_string()
}
