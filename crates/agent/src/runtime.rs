use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use procura_core::domain::activity::{ActivityAction, OrchestratorActivity};
use procura_core::domain::agent::PairKey;
use procura_core::domain::negotiation::{
    Negotiation, NegotiationId, NegotiationStatus, NewNegotiation, StatusChange,
};
use procura_core::domain::summary::NegotiationSummary;
use procura_core::domain::supplier::SupplierId;
use procura_core::errors::ApplicationError;
use procura_core::flows::NegotiatorState;
use procura_db::CreatedNegotiation;

use crate::context::AgentContext;
use crate::orchestrator::{Orchestrator, OrchestratorExit};
use crate::prompts::{DEFAULT_NEGOTIATOR_PROMPT, DEFAULT_ORCHESTRATOR_PROMPT};

/// Request accepted by [`NegotiationRuntime::start`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartNegotiation {
    pub product: String,
    pub strategy: String,
    pub prompt: Option<String>,
    pub suppliers: Vec<SupplierId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PairStatus {
    pub supplier_id: SupplierId,
    pub supplier_name: Option<String>,
    pub state: NegotiatorState,
    pub rounds: u32,
    pub message_count: usize,
    pub completed: bool,
    pub summary: Option<NegotiationSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NegotiationStatusReport {
    pub negotiation: Negotiation,
    pub pairs: Vec<PairStatus>,
    pub all_completed: bool,
}

struct RunningNegotiation {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the orchestrator tasks of every active negotiation in this process.
pub struct NegotiationRuntime {
    ctx: Arc<AgentContext>,
    running: Mutex<HashMap<NegotiationId, RunningNegotiation>>,
}

impl NegotiationRuntime {
    pub fn new(ctx: AgentContext) -> Self {
        Self { ctx: Arc::new(ctx), running: Mutex::new(HashMap::new()) }
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    /// Validates, persists the negotiation with its agents, and starts the orchestrator.
    pub async fn start(
        &self,
        request: StartNegotiation,
    ) -> Result<CreatedNegotiation, ApplicationError> {
        let new = NewNegotiation {
            product: request.product,
            strategy: request.strategy,
            prompt: request.prompt.unwrap_or_default(),
            suppliers: request.suppliers,
            orchestrator_prompt: DEFAULT_ORCHESTRATOR_PROMPT.to_string(),
            negotiator_prompt: DEFAULT_NEGOTIATOR_PROMPT.to_string(),
        };
        new.validate().map_err(|error| ApplicationError::Validation(error.to_string()))?;

        for supplier_id in &new.suppliers {
            if self.ctx.suppliers.find_supplier(supplier_id).await?.is_none() {
                return Err(ApplicationError::not_found("supplier", supplier_id.0.clone()));
            }
        }

        let created = self.ctx.store.create_negotiation(new).await?;
        self.spawn(created.negotiation.id.clone());
        Ok(created)
    }

    /// Moves the negotiation to `cancelled` and stops its tasks. Cancelling a closed negotiation
    /// is a no-op that reports the current status.
    pub async fn cancel(&self, id: &NegotiationId) -> Result<StatusChange, ApplicationError> {
        if self.ctx.store.find_negotiation(id).await?.is_none() {
            return Err(ApplicationError::not_found("negotiation", id.0.clone()));
        }

        let change =
            self.ctx.store.transition_negotiation(id, NegotiationStatus::Cancelled, None).await?;
        if change.applied() {
            self.ctx
                .store
                .record_activity(OrchestratorActivity::new(
                    id.clone(),
                    ActivityAction::NegotiationCancelled,
                    "Negotiation cancelled",
                ))
                .await?;
            info!(event_name = "negotiation.cancelled", negotiation_id = %id, "negotiation cancelled");
        }

        if let Some(running) = self.running.lock().unwrap_or_else(PoisonError::into_inner).get(id) {
            running.cancel.send_replace(true);
        }
        for agent in self.ctx.store.list_agents(id).await? {
            if let Some(supplier_id) = agent.supplier_id {
                self.ctx.store.release_pair(&PairKey::new(id.clone(), supplier_id));
            }
        }

        Ok(change)
    }

    pub async fn status(
        &self,
        id: &NegotiationId,
    ) -> Result<NegotiationStatusReport, ApplicationError> {
        let negotiation = self
            .ctx
            .store
            .find_negotiation(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("negotiation", id.0.clone()))?;

        let summaries = self.ctx.store.list_summaries(id).await?;
        let mut pairs = Vec::new();
        for state in self.ctx.store.list_pairs(id).await? {
            let supplier_name = self
                .ctx
                .suppliers
                .find_supplier(&state.pair.supplier_id)
                .await?
                .map(|supplier| supplier.name);
            let message_count = self.ctx.store.pair_history(&state.pair).await?.len();
            let summary = summaries.iter().find(|summary| summary.pair == state.pair).cloned();

            pairs.push(PairStatus {
                supplier_id: state.pair.supplier_id.clone(),
                supplier_name,
                state: state.state,
                rounds: state.rounds,
                message_count,
                completed: state.is_terminal(),
                summary,
            });
        }

        let all_completed = !pairs.is_empty() && pairs.iter().all(|pair| pair.completed);
        Ok(NegotiationStatusReport { negotiation, pairs, all_completed })
    }

    /// Restarts orchestrators for negotiations left active by a previous process.
    pub async fn resume_active(&self) -> Result<usize, ApplicationError> {
        let active = self.ctx.store.list_negotiations(Some(NegotiationStatus::Active)).await?;
        let mut resumed = 0;
        for negotiation in active {
            if !self.is_running(&negotiation.id) {
                self.spawn(negotiation.id.clone());
                resumed += 1;
            }
        }
        if resumed > 0 {
            info!(event_name = "negotiation.resumed", count = resumed, "resumed active negotiations");
        }
        Ok(resumed)
    }

    pub fn is_running(&self, id: &NegotiationId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Waits until the orchestrator of `id` has exited; `false` on timeout.
    pub async fn wait_for(&self, id: &NegotiationId, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_running(id) {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Stops every task without touching persisted state; the next `resume_active` picks up
    /// where they left off.
    pub async fn shutdown(&self, grace: Duration) {
        let running: Vec<RunningNegotiation> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, running)| running)
            .collect();

        for task in &running {
            task.cancel.send_replace(true);
        }
        for task in running {
            let mut handle = task.handle;
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("orchestrator did not stop within the grace period; aborting");
                handle.abort();
            }
        }
    }

    fn spawn(&self, id: NegotiationId) {
        let (cancel, cancel_rx) = watch::channel(false);
        let orchestrator = Orchestrator::new(Arc::clone(&self.ctx), id.clone(), cancel_rx);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            match orchestrator.run().await {
                Ok(OrchestratorExit::Stalled { open_pairs }) => warn!(
                    event_name = "negotiation.orchestrator.stalled",
                    negotiation_id = %task_id,
                    open_pairs,
                    "negotiators stopped before every pair was terminal"
                ),
                Ok(_) => {}
                Err(run_error) => error!(
                    event_name = "negotiation.orchestrator.failed",
                    negotiation_id = %task_id,
                    error = %run_error,
                    "orchestrator failed"
                ),
            }
        });

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.retain(|_, task| !task.handle.is_finished());
        if let Some(previous) = running.insert(id, RunningNegotiation { cancel, handle }) {
            previous.cancel.send_replace(true);
        }
    }
}
