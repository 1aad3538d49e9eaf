//! Prompt rendering for both agent roles.
//!
//! Templates are compiled into the binary; the task templates start with a `TASK: <NAME>` line so
//! that scripted gateways (and logs) can tell calls apart.

use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

use procura_core::domain::negotiation::Negotiation;
use procura_core::domain::supplier::Supplier;

pub const DEFAULT_NEGOTIATOR_PROMPT: &str = "You are a procurement negotiator acting for a buyer. \
Your goal is to obtain the best possible unit price and terms for the product from one supplier. \
Be courteous and concise, keep every message focused on price, quantity, lead time and payment \
terms, and never agree to terms outside the buyer strategy.";

pub const DEFAULT_ORCHESTRATOR_PROMPT: &str = "You coordinate several negotiators, each talking to \
one supplier about the same product on behalf of a single buyer. You set their instructions, \
follow their progress, and at the end recommend the best overall deal with a short justification.";

pub const TASK_OPENING: &str = "TASK: OPENING";
pub const TASK_EVALUATE: &str = "TASK: EVALUATE";
pub const TASK_SUMMARY: &str = "TASK: SUMMARY";
pub const TASK_INSTRUCTIONS: &str = "TASK: INSTRUCTIONS";
pub const TASK_REVISE: &str = "TASK: REVISE";
pub const TASK_FINAL_SUMMARY: &str = "TASK: FINAL_SUMMARY";

const TEMPLATES: [(&str, &str); 8] = [
    ("negotiator_system", include_str!("../templates/negotiator_system.txt")),
    ("orchestrator_system", include_str!("../templates/orchestrator_system.txt")),
    ("task_opening", include_str!("../templates/task_opening.txt")),
    ("task_evaluate", include_str!("../templates/task_evaluate.txt")),
    ("task_summary", include_str!("../templates/task_summary.txt")),
    ("task_instructions", include_str!("../templates/task_instructions.txt")),
    ("task_revise", include_str!("../templates/task_revise.txt")),
    ("task_final_summary", include_str!("../templates/task_final_summary.txt")),
];

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt templates failed to compile: {0}")]
    Compile(String),
    #[error("prompt `{name}` failed to render: {message}")]
    Render { name: &'static str, message: String },
}

#[derive(Serialize)]
struct SupplierBrief<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    insights: &'a str,
}

pub struct PromptLibrary {
    tera: Tera,
}

impl PromptLibrary {
    pub fn new() -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.to_vec())
            .map_err(|error| PromptError::Compile(error.to_string()))?;
        Ok(Self { tera })
    }

    /// System prompt of one negotiator. `base_prompt` is the stored agent prompt, so prompts
    /// supplied at negotiation creation survive restarts.
    pub fn negotiator_system(
        &self,
        base_prompt: &str,
        negotiation: &Negotiation,
        supplier: &Supplier,
        instructions: Option<&str>,
    ) -> Result<String, PromptError> {
        let mut context = negotiation_context(base_prompt, negotiation);
        context.insert("supplier_name", &supplier.name);
        context.insert("supplier_description", &supplier.description);
        context.insert("supplier_insights", supplier.insights.as_deref().unwrap_or_default());
        context.insert("instructions", instructions.unwrap_or_default());
        self.render("negotiator_system", &context)
    }

    pub fn orchestrator_system(
        &self,
        base_prompt: &str,
        negotiation: &Negotiation,
        suppliers: &[Supplier],
    ) -> Result<String, PromptError> {
        let briefs = suppliers
            .iter()
            .map(|supplier| SupplierBrief {
                id: &supplier.id.0,
                name: &supplier.name,
                description: &supplier.description,
                insights: supplier.insights.as_deref().unwrap_or_default(),
            })
            .collect::<Vec<_>>();

        let mut context = negotiation_context(base_prompt, negotiation);
        context.insert("suppliers", &briefs);
        self.render("orchestrator_system", &context)
    }

    pub fn opening_task(&self, supplier_name: &str, product: &str) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("supplier_name", supplier_name);
        context.insert("product", product);
        self.render("task_opening", &context)
    }

    pub fn evaluate_task(&self, rounds: u32, max_rounds: u32) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("rounds", &rounds);
        context.insert("max_rounds", &max_rounds);
        context.insert("final_round", &(rounds >= max_rounds));
        self.render("task_evaluate", &context)
    }

    pub fn summary_task(
        &self,
        supplier_name: &str,
        product: &str,
        outcome: &str,
        offer: Option<&str>,
    ) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("supplier_name", supplier_name);
        context.insert("product", product);
        context.insert("outcome", outcome);
        context.insert("offer", offer.unwrap_or_default());
        self.render("task_summary", &context)
    }

    pub fn instructions_task(&self) -> Result<String, PromptError> {
        self.render("task_instructions", &Context::new())
    }

    pub fn revise_task(
        &self,
        supplier: &Supplier,
        current_instructions: Option<&str>,
    ) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("supplier_name", &supplier.name);
        context.insert("supplier_id", &supplier.id.0);
        context.insert("current_instructions", current_instructions.unwrap_or_default());
        self.render("task_revise", &context)
    }

    pub fn final_summary_task(&self, product: &str, ranking: &str) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("product", product);
        context.insert("ranking", ranking);
        self.render("task_final_summary", &context)
    }

    fn render(&self, name: &'static str, context: &Context) -> Result<String, PromptError> {
        self.tera
            .render(name, context)
            .map(|rendered| rendered.trim().to_string())
            .map_err(|error| PromptError::Render { name, message: error.to_string() })
    }
}

fn negotiation_context(base_prompt: &str, negotiation: &Negotiation) -> Context {
    let mut context = Context::new();
    context.insert("base_prompt", base_prompt.trim());
    context.insert("product", &negotiation.product);
    context.insert("strategy", &negotiation.strategy);
    context.insert("buyer_context", negotiation.prompt.trim());
    context
}

#[cfg(test)]
mod tests {
    use procura_core::chrono::Utc;
    use procura_core::domain::negotiation::{Negotiation, NegotiationId, NegotiationStatus};
    use procura_core::domain::supplier::{Supplier, SupplierId};

    use super::{PromptLibrary, DEFAULT_NEGOTIATOR_PROMPT, TASK_EVALUATE, TASK_OPENING};

    fn negotiation() -> Negotiation {
        Negotiation {
            id: NegotiationId("n-1".to_string()),
            product: "nRF54L15".to_string(),
            strategy: "aggressive".to_string(),
            prompt: "10k units per quarter".to_string(),
            status: NegotiationStatus::Active,
            final_summary: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn supplier(insights: Option<&str>) -> Supplier {
        Supplier {
            id: SupplierId("s-1".to_string()),
            name: "Nordic Parts".to_string(),
            email: Some("sales@nordic.example".to_string()),
            description: "Authorised distributor".to_string(),
            insights: insights.map(str::to_string),
            image_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn negotiator_prompt_carries_strategy_supplier_and_instructions() {
        let prompts = PromptLibrary::new().expect("templates compile");
        let rendered = prompts
            .negotiator_system(
                DEFAULT_NEGOTIATOR_PROMPT,
                &negotiation(),
                &supplier(Some("moves 5% on volume")),
                Some("anchor at 2.10 USD"),
            )
            .expect("render");

        assert!(rendered.starts_with(DEFAULT_NEGOTIATOR_PROMPT));
        assert!(rendered.contains("Buyer strategy: aggressive"));
        assert!(rendered.contains("Buyer context: 10k units per quarter"));
        assert!(rendered.contains("moves 5% on volume"));
        assert!(rendered.contains("anchor at 2.10 USD"));
    }

    #[test]
    fn optional_sections_are_omitted() {
        let prompts = PromptLibrary::new().expect("templates compile");
        let rendered =
            prompts.negotiator_system("base", &negotiation(), &supplier(None), None).expect("render");
        assert!(!rendered.contains("earlier dealings"));
        assert!(!rendered.contains("Current instructions"));
    }

    #[test]
    fn task_prompts_start_with_their_marker() {
        let prompts = PromptLibrary::new().expect("templates compile");
        assert!(prompts.opening_task("Nordic Parts", "nRF54L15").expect("opening").starts_with(TASK_OPENING));

        let evaluate = prompts.evaluate_task(3, 3).expect("evaluate");
        assert!(evaluate.starts_with(TASK_EVALUATE));
        assert!(evaluate.contains("final round"));
        assert!(!prompts.evaluate_task(1, 3).expect("evaluate").contains("final round"));
    }

    #[test]
    fn orchestrator_prompt_lists_every_supplier() {
        let prompts = PromptLibrary::new().expect("templates compile");
        let mut second = supplier(None);
        second.id = SupplierId("s-2".to_string());
        second.name = "Mouser".to_string();

        let rendered = prompts
            .orchestrator_system("coordinate", &negotiation(), &[supplier(None), second])
            .expect("render");
        assert!(rendered.contains("- s-1: Nordic Parts"));
        assert!(rendered.contains("- s-2: Mouser"));
    }
}
