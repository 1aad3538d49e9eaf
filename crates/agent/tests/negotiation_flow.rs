use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use procura_agent::{
    AgentContext, GenerationGateway, NegotiationRuntime, NegotiatorAgent, PromptLibrary,
    RecordedCall, RetryPolicy, ScriptedGateway, StartNegotiation,
};
use procura_channel::{InboundReply, OutboundMailer, RecordingMailer, ReplyIngestor};
use procura_core::chrono::Utc;
use procura_core::config::NegotiationSettings;
use procura_core::domain::activity::ActivityAction;
use procura_core::domain::agent::PairKey;
use procura_core::domain::message::MessageRole;
use procura_core::domain::negotiation::{NegotiationId, NegotiationStatus};
use procura_core::domain::summary::PairOutcome;
use procura_core::domain::supplier::{Supplier, SupplierId};
use procura_core::flows::{ExhaustionReason, NegotiatorState};
use procura_db::{
    connect_with_settings, migrations, ActivityRepository, ConversationStore,
    InstructionsRepository, MessageRepository, NegotiationRepository, PairRepository,
    RepositoryError, SqlCatalogRepository, SqlConversationStore, SummaryRepository,
    SupplierRepository,
};
use tokio::sync::{mpsc, watch};

struct Harness {
    store: Arc<SqlConversationStore>,
    catalog: Arc<SqlCatalogRepository>,
    gateway: Arc<ScriptedGateway>,
    mailer: Arc<RecordingMailer>,
    runtime: NegotiationRuntime,
    ingestor: ReplyIngestor,
}

impl Harness {
    async fn new(reply_timeout_secs: u64) -> Self {
        Self::with_catalog(reply_timeout_secs, |catalog| catalog as Arc<dyn SupplierRepository>)
            .await
    }

    /// Agents see the catalog through `wrap`; the harness itself always uses the real one.
    async fn with_catalog(
        reply_timeout_secs: u64,
        wrap: impl FnOnce(Arc<SqlCatalogRepository>) -> Arc<dyn SupplierRepository>,
    ) -> Self {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");

        let store = Arc::new(SqlConversationStore::new(pool.clone()));
        let catalog = Arc::new(SqlCatalogRepository::new(pool));
        let gateway = Arc::new(ScriptedGateway::new(respond));
        let mailer = Arc::new(RecordingMailer::new());

        let ctx = AgentContext::new(
            store.clone() as Arc<dyn ConversationStore>,
            wrap(catalog.clone()),
            gateway.clone() as Arc<dyn GenerationGateway>,
            mailer.clone() as Arc<dyn OutboundMailer>,
            Arc::new(PromptLibrary::new().expect("prompts")),
            RetryPolicy::immediate(0),
            NegotiationSettings {
                max_rounds: 3,
                reply_timeout_secs,
                poll_interval_ms: 20,
                revise_instructions: false,
            },
        );
        let ingestor = ReplyIngestor::new(
            store.clone() as Arc<dyn ConversationStore>,
            catalog.clone() as Arc<dyn SupplierRepository>,
        );

        Self { store, catalog, gateway, mailer, runtime: NegotiationRuntime::new(ctx), ingestor }
    }

    async fn supplier(&self, name: &str, email: &str) -> SupplierId {
        let id = SupplierId::generate();
        self.catalog
            .save_supplier(Supplier {
                id: id.clone(),
                name: name.to_string(),
                email: Some(email.to_string()),
                description: format!("{name} distribution"),
                insights: None,
                image_url: None,
                created_at: Utc::now(),
            })
            .await
            .expect("supplier");
        id
    }

    async fn start(&self, suppliers: Vec<SupplierId>) -> NegotiationId {
        self.runtime
            .start(StartNegotiation {
                product: "nRF54L15".to_string(),
                strategy: "aggressive".to_string(),
                prompt: Some("10k units per quarter".to_string()),
                suppliers,
            })
            .await
            .expect("start")
            .negotiation
            .id
    }

    async fn reply(&self, pair: &PairKey, content: &str) {
        self.ingestor
            .ingest(InboundReply::synthetic(pair.clone(), content, None))
            .await
            .expect("ingest");
    }

    async fn wait_for_state(&self, pair: &PairKey, state: NegotiatorState) {
        for _ in 0..250 {
            let current = self.store.load_pair(pair).await.expect("load").expect("pair");
            if current.state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("pair {pair} never reached {}", state.as_str());
    }

    async fn wait_for_messages(&self, pair: &PairKey, count: usize) {
        for _ in 0..250 {
            if self.store.pair_history(pair).await.expect("history").len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("pair {pair} never reached {count} messages");
    }
}

/// Fails lookups of "Flaky Fabs" on the calls selected by `failing` (1-based).
struct FlakyCatalog {
    inner: Arc<SqlCatalogRepository>,
    lookups: AtomicUsize,
    failing: fn(usize) -> bool,
}

impl FlakyCatalog {
    fn wrap(
        failing: fn(usize) -> bool,
    ) -> impl FnOnce(Arc<SqlCatalogRepository>) -> Arc<dyn SupplierRepository> {
        move |inner| -> Arc<dyn SupplierRepository> {
            Arc::new(Self { inner, lookups: AtomicUsize::new(0), failing })
        }
    }
}

#[async_trait]
impl SupplierRepository for FlakyCatalog {
    async fn list_suppliers(&self) -> Result<Vec<Supplier>, RepositoryError> {
        self.inner.list_suppliers().await
    }

    async fn find_supplier(&self, id: &SupplierId) -> Result<Option<Supplier>, RepositoryError> {
        let supplier = self.inner.find_supplier(id).await?;
        if supplier.as_ref().is_some_and(|supplier| supplier.name == "Flaky Fabs") {
            let call = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
            if (self.failing)(call) {
                return Err(RepositoryError::Decode(format!("corrupt supplier row on lookup {call}")));
            }
        }
        Ok(supplier)
    }

    async fn find_suppliers_by_email(&self, address: &str) -> Result<Vec<Supplier>, RepositoryError> {
        self.inner.find_suppliers_by_email(address).await
    }

    async fn find_suppliers_by_prefix(&self, prefix: &str) -> Result<Vec<Supplier>, RepositoryError> {
        self.inner.find_suppliers_by_prefix(prefix).await
    }

    async fn save_supplier(&self, supplier: Supplier) -> Result<(), RepositoryError> {
        self.inner.save_supplier(supplier).await
    }

    async fn update_insights(&self, id: &SupplierId, insights: &str) -> Result<(), RepositoryError> {
        self.inner.update_insights(id, insights).await
    }
}

/// Nordic and Flaky Fabs accept on the first reply, Stubborn Supply never accepts, Mute Models
/// cannot be evaluated; everyone else counters once, then accepts.
fn respond(call: &RecordedCall) -> Result<String, procura_agent::GenerationError> {
    let task = call.task();
    let negotiating_with = |name: &str| call.system_prompt.contains(&format!("negotiating with {name}"));
    let text = if task.starts_with("TASK: INSTRUCTIONS") {
        "No blocks, use your defaults.".to_string()
    } else if task.starts_with("TASK: OPENING") {
        "Hello, could you quote your best unit price for 10k units?".to_string()
    } else if task.starts_with("TASK: EVALUATE") {
        if negotiating_with("Mute Models") {
            return Err(procura_agent::GenerationError::NoOutput);
        } else if negotiating_with("Stubborn Supply") {
            "DECISION: COUNTER\nOFFER: 3.10 USD\nThat is still too high, could you do 2.40 USD?".to_string()
        } else if negotiating_with("Nordic Parts") || negotiating_with("Flaky Fabs") {
            "DECISION: ACCEPT\nOFFER: 2.35 USD\nThank you, we accept 2.35 USD.".to_string()
        } else if task.contains("(round 1 of") {
            "DECISION: COUNTER\nOFFER: 2.80 USD\nCould you do 2.40 USD?".to_string()
        } else {
            "DECISION: ACCEPT\nOFFER: 2.50 USD\nAgreed at 2.50 USD.".to_string()
        }
    } else if task.starts_with("TASK: SUMMARY") {
        "Supplier summary.".to_string()
    } else if task.starts_with("TASK: FINAL_SUMMARY") {
        "Recommend Nordic Parts.".to_string()
    } else {
        return Err(procura_agent::GenerationError::NoOutput);
    };
    Ok(text)
}

#[tokio::test]
async fn start_creates_one_negotiator_per_supplier_and_opens_every_pair() {
    let harness = Harness::new(30).await;
    let s1 = harness.supplier("Nordic Parts", "sales@nordic.example").await;
    let s2 = harness.supplier("Baltic Chips", "sales@baltic.example").await;
    let id = harness.start(vec![s1.clone(), s2.clone()]).await;

    let agents = harness.store.list_agents(&id).await.expect("agents");
    assert_eq!(agents.len(), 3);

    for supplier in [&s1, &s2] {
        let pair = PairKey::new(id.clone(), supplier.clone());
        harness.wait_for_state(&pair, NegotiatorState::AwaitingSupplierReply).await;
        let history = harness.store.pair_history(&pair).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, MessageRole::Negotiator);
        assert!(!history[0].completed);
    }

    let instructions = harness.store.list_instructions(&id).await.expect("instructions");
    assert_eq!(instructions.len(), 2);
    assert!(instructions.iter().all(|instructions| instructions.text.contains("aggressive")));
    for _ in 0..50 {
        if harness.mailer.sent().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(harness.mailer.sent().len(), 2);
    assert!(harness.mailer.sent().iter().all(|email| email.subject.contains("[REF-")));

    let report = harness.runtime.status(&id).await.expect("status");
    assert_eq!(report.negotiation.status, NegotiationStatus::Active);
    assert!(!report.all_completed);

    harness.runtime.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn negotiation_completes_once_every_supplier_converges() {
    let harness = Harness::new(30).await;
    let s1 = harness.supplier("Nordic Parts", "sales@nordic.example").await;
    let s2 = harness.supplier("Baltic Chips", "sales@baltic.example").await;
    let id = harness.start(vec![s1.clone(), s2.clone()]).await;
    let p1 = PairKey::new(id.clone(), s1.clone());
    let p2 = PairKey::new(id.clone(), s2.clone());

    harness.wait_for_state(&p1, NegotiatorState::AwaitingSupplierReply).await;
    harness.wait_for_state(&p2, NegotiatorState::AwaitingSupplierReply).await;

    harness.reply(&p1, "Our price is 2.35 USD per unit.").await;
    harness.reply(&p2, "Our price is 2.80 USD per unit.").await;
    harness.wait_for_state(&p1, NegotiatorState::Converged).await;
    harness.reply(&p2, "We can do 2.50 USD.").await;

    assert!(harness.runtime.wait_for(&id, Duration::from_secs(5)).await);

    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Completed);
    let final_summary = negotiation.final_summary.expect("final summary");
    assert!(final_summary.starts_with("Recommend Nordic Parts."));
    assert!(final_summary.contains("1. Nordic Parts: 2.35 USD"));
    assert!(final_summary.contains("2. Baltic Chips: 2.50 USD"));

    let summaries = harness.store.list_summaries(&id).await.expect("summaries");
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|summary| summary.outcome == PairOutcome::Converged));

    let activity = harness.store.list_activity(&id, None).await.expect("activity");
    let count = |action: ActivityAction| activity.iter().filter(|item| item.action == action).count();
    assert_eq!(count(ActivityAction::NegotiationStarted), 1);
    assert_eq!(count(ActivityAction::InstructionsIssued), 2);
    assert_eq!(count(ActivityAction::OutcomeRecorded), 2);
    assert_eq!(count(ActivityAction::NegotiationCompleted), 1);

    let history = harness.store.pair_history(&p2).await.expect("history");
    let last = history.last().expect("messages");
    assert_eq!(last.role, MessageRole::Negotiator);
    assert!(last.completed);

    let insights = harness.catalog.find_supplier(&s1).await.expect("find").expect("supplier");
    assert!(insights.insights.expect("insights").contains("Supplier summary."));
}

#[tokio::test]
async fn silent_supplier_times_out_while_the_other_keeps_negotiating() {
    let harness = Harness::new(1).await;
    let s1 = harness.supplier("Silent Semis", "sales@silent.example").await;
    let s2 = harness.supplier("Baltic Chips", "sales@baltic.example").await;
    let id = harness.start(vec![s1.clone(), s2.clone()]).await;
    let p1 = PairKey::new(id.clone(), s1.clone());
    let p2 = PairKey::new(id.clone(), s2.clone());

    harness.wait_for_state(&p2, NegotiatorState::AwaitingSupplierReply).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.reply(&p2, "Our price is 2.80 USD per unit.").await;

    harness.wait_for_state(&p1, NegotiatorState::Exhausted).await;
    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Active);
    let p2_state = harness.store.load_pair(&p2).await.expect("load").expect("pair");
    assert!(!p2_state.is_terminal());

    let summary = harness.store.find_summary(&p1).await.expect("summary").expect("written");
    assert_eq!(summary.outcome, PairOutcome::Exhausted(ExhaustionReason::ReplyTimeout));
    assert_eq!(summary.offer, None);

    harness.reply(&p2, "We can do 2.50 USD.").await;
    assert!(harness.runtime.wait_for(&id, Duration::from_secs(5)).await);

    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Completed);
    let final_summary = negotiation.final_summary.expect("final summary");
    assert!(final_summary.contains("1. Baltic Chips: 2.50 USD"));
    assert!(final_summary.contains("- Silent Semis: no agreement (the supplier did not reply in time)"));
}

#[tokio::test]
async fn cancelled_negotiation_stores_late_replies_without_advancing() {
    let harness = Harness::new(30).await;
    let s1 = harness.supplier("Nordic Parts", "sales@nordic.example").await;
    let id = harness.start(vec![s1.clone()]).await;
    let pair = PairKey::new(id.clone(), s1.clone());
    harness.wait_for_state(&pair, NegotiatorState::AwaitingSupplierReply).await;

    let change = harness.runtime.cancel(&id).await.expect("cancel");
    assert!(change.applied());
    assert_eq!(change.status(), NegotiationStatus::Cancelled);
    assert!(harness.runtime.wait_for(&id, Duration::from_secs(5)).await);

    harness.reply(&pair, "Sorry for the delay, 2.20 USD.").await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let state = harness.store.load_pair(&pair).await.expect("load").expect("pair");
    assert_eq!(state.state, NegotiatorState::AwaitingSupplierReply);
    assert_eq!(state.rounds, 0);
    assert_eq!(harness.store.pair_history(&pair).await.expect("history").len(), 2);

    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Cancelled);

    let again = harness.runtime.cancel(&id).await.expect("second cancel");
    assert!(!again.applied());
    let activity = harness.store.list_activity(&id, None).await.expect("activity");
    assert_eq!(
        activity.iter().filter(|item| item.action == ActivityAction::NegotiationCancelled).count(),
        1
    );
}

#[tokio::test]
async fn competing_agents_claim_each_reply_exactly_once() {
    let harness = Harness::new(30).await;
    let s1 = harness.supplier("Nordic Parts", "sales@nordic.example").await;
    let created = harness
        .store
        .create_negotiation(procura_core::domain::negotiation::NewNegotiation {
            product: "nRF54L15".to_string(),
            strategy: "aggressive".to_string(),
            prompt: String::new(),
            suppliers: vec![s1.clone()],
            orchestrator_prompt: "coordinate".to_string(),
            negotiator_prompt: "negotiate".to_string(),
        })
        .await
        .expect("create");
    let pair = PairKey::new(created.negotiation.id.clone(), s1.clone());

    let (reports, mut inbox) = mpsc::unbounded_channel();
    let (_cancel, cancel_rx) = watch::channel(false);
    let ctx = harness.runtime.context().clone();
    let first = tokio::spawn(
        NegotiatorAgent::new(ctx.clone(), pair.clone(), reports.clone(), cancel_rx.clone()).run(),
    );
    let second =
        tokio::spawn(NegotiatorAgent::new(ctx, pair.clone(), reports, cancel_rx).run());

    harness.wait_for_state(&pair, NegotiatorState::AwaitingSupplierReply).await;
    harness.reply(&pair, "Our price is 2.35 USD per unit.").await;

    tokio::time::timeout(Duration::from_secs(5), async {
        first.await.expect("first agent");
        second.await.expect("second agent");
    })
    .await
    .expect("agents finish");

    let state = harness.store.load_pair(&pair).await.expect("load").expect("pair");
    assert_eq!(state.state, NegotiatorState::Converged);
    assert_eq!(state.rounds, 1);

    let history = harness.store.pair_history(&pair).await.expect("history");
    let roles: Vec<MessageRole> = history.iter().map(|message| message.role).collect();
    assert_eq!(roles, vec![MessageRole::Negotiator, MessageRole::Supplier, MessageRole::Negotiator]);

    let mut finished = 0;
    while let Ok(report) = inbox.try_recv() {
        if matches!(report, procura_agent::NegotiatorReport::Finished { .. }) {
            finished += 1;
        }
    }
    assert_eq!(finished, 1);
    assert_eq!(harness.store.list_summaries(&pair.negotiation_id).await.expect("summaries").len(), 1);
    assert!(!harness.gateway.calls().is_empty());
}

#[tokio::test]
async fn stubborn_supplier_is_closed_out_at_the_round_limit() {
    let harness = Harness::new(30).await;
    let s1 = harness.supplier("Stubborn Supply", "sales@stubborn.example").await;
    let id = harness.start(vec![s1.clone()]).await;
    let pair = PairKey::new(id.clone(), s1);

    for (round, messages) in [(1, 1), (2, 3), (3, 5)] {
        harness.wait_for_messages(&pair, messages).await;
        harness.reply(&pair, &format!("Best we can do is 3.{round}0 USD.")).await;
    }
    assert!(harness.runtime.wait_for(&id, Duration::from_secs(5)).await);

    let state = harness.store.load_pair(&pair).await.expect("load").expect("pair");
    assert_eq!(state.state, NegotiatorState::Exhausted);
    assert_eq!(state.rounds, 3);

    let history = harness.store.pair_history(&pair).await.expect("history");
    assert_eq!(history.len(), 7);
    let closing = history.last().expect("closing message");
    assert_eq!(closing.role, MessageRole::Negotiator);
    assert!(closing.completed);
    assert!(history[..6].iter().all(|message| !message.completed));

    let summary = harness.store.find_summary(&pair).await.expect("summary").expect("written");
    assert_eq!(summary.outcome, PairOutcome::Exhausted(ExhaustionReason::RoundLimit));

    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Completed);
    assert!(negotiation
        .final_summary
        .expect("final summary")
        .contains("No acceptable offer was obtained."));
}

#[tokio::test]
async fn generation_failure_exhausts_only_the_affected_pair() {
    let harness = Harness::new(30).await;
    let s1 = harness.supplier("Mute Models", "sales@mute.example").await;
    let s2 = harness.supplier("Nordic Parts", "sales@nordic.example").await;
    let id = harness.start(vec![s1.clone(), s2.clone()]).await;
    let p1 = PairKey::new(id.clone(), s1);
    let p2 = PairKey::new(id.clone(), s2);

    harness.wait_for_state(&p1, NegotiatorState::AwaitingSupplierReply).await;
    harness.wait_for_state(&p2, NegotiatorState::AwaitingSupplierReply).await;
    harness.reply(&p1, "Our price is 2.90 USD per unit.").await;
    harness.wait_for_state(&p1, NegotiatorState::Exhausted).await;

    let summary = harness.store.find_summary(&p1).await.expect("summary").expect("written");
    assert_eq!(summary.outcome, PairOutcome::Exhausted(ExhaustionReason::GenerationFailure));
    let roles: Vec<MessageRole> = harness
        .store
        .pair_history(&p1)
        .await
        .expect("history")
        .iter()
        .map(|message| message.role)
        .collect();
    assert_eq!(roles, vec![MessageRole::Negotiator, MessageRole::Supplier]);

    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Active);

    harness.reply(&p2, "Our price is 2.35 USD per unit.").await;
    assert!(harness.runtime.wait_for(&id, Duration::from_secs(5)).await);

    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Completed);
    let final_summary = negotiation.final_summary.expect("final summary");
    assert!(final_summary.contains("1. Nordic Parts: 2.35 USD"));
    assert!(final_summary.contains("- Mute Models: no agreement (text generation kept failing)"));
}

#[tokio::test]
async fn negotiator_retries_a_step_after_a_transient_store_error() {
    // Lookup 1 validates the request, 2 loads the orchestrator's suppliers, 3 opens the pair.
    let harness = Harness::with_catalog(30, FlakyCatalog::wrap(|call| call == 3)).await;
    let s1 = harness.supplier("Flaky Fabs", "sales@flaky.example").await;
    let id = harness.start(vec![s1.clone()]).await;
    let pair = PairKey::new(id.clone(), s1);

    harness.wait_for_state(&pair, NegotiatorState::AwaitingSupplierReply).await;
    harness.reply(&pair, "Our price is 2.35 USD per unit.").await;
    assert!(harness.runtime.wait_for(&id, Duration::from_secs(5)).await);

    let summary = harness.store.find_summary(&pair).await.expect("summary").expect("written");
    assert_eq!(summary.outcome, PairOutcome::Converged);
    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Completed);
}

#[tokio::test]
async fn persistently_failing_pair_is_exhausted_and_the_negotiation_completes() {
    let harness = Harness::with_catalog(30, FlakyCatalog::wrap(|call| call >= 3)).await;
    let s1 = harness.supplier("Flaky Fabs", "sales@flaky.example").await;
    let s2 = harness.supplier("Nordic Parts", "sales@nordic.example").await;
    let id = harness.start(vec![s1.clone(), s2.clone()]).await;
    let p1 = PairKey::new(id.clone(), s1);
    let p2 = PairKey::new(id.clone(), s2);

    harness.wait_for_state(&p1, NegotiatorState::Exhausted).await;
    let summary = harness.store.find_summary(&p1).await.expect("summary").expect("written");
    assert_eq!(summary.outcome, PairOutcome::Exhausted(ExhaustionReason::InternalFailure));
    assert!(summary.summary.contains("Last error"));
    assert!(harness.store.pair_history(&p1).await.expect("history").is_empty());

    harness.wait_for_state(&p2, NegotiatorState::AwaitingSupplierReply).await;
    harness.reply(&p2, "Our price is 2.35 USD per unit.").await;
    assert!(harness.runtime.wait_for(&id, Duration::from_secs(5)).await);

    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Completed);
    let final_summary = negotiation.final_summary.expect("final summary");
    assert!(final_summary.contains("1. Nordic Parts: 2.35 USD"));
    assert!(final_summary.contains(
        "- Flaky Fabs: no agreement (the negotiator could not continue after repeated errors)"
    ));

    let activity = harness.store.list_activity(&id, None).await.expect("activity");
    let outcomes = activity.iter().filter(|item| item.action == ActivityAction::OutcomeRecorded);
    assert_eq!(outcomes.count(), 2);
    assert_eq!(harness.store.signals().tracked_pairs(), 0);
}

#[tokio::test]
async fn shutdown_releases_reply_channels_of_stopped_negotiators() {
    let harness = Harness::new(30).await;
    let s1 = harness.supplier("Nordic Parts", "sales@nordic.example").await;
    let s2 = harness.supplier("Baltic Chips", "sales@baltic.example").await;
    let id = harness.start(vec![s1.clone(), s2.clone()]).await;

    for supplier in [s1, s2] {
        let pair = PairKey::new(id.clone(), supplier);
        harness.wait_for_state(&pair, NegotiatorState::AwaitingSupplierReply).await;
    }
    for _ in 0..50 {
        if harness.store.signals().tracked_pairs() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(harness.store.signals().tracked_pairs(), 2);

    harness.runtime.shutdown(Duration::from_secs(2)).await;
    assert_eq!(harness.store.signals().tracked_pairs(), 0);

    let negotiation = harness.store.find_negotiation(&id).await.expect("find").expect("exists");
    assert_eq!(negotiation.status, NegotiationStatus::Active);
}
