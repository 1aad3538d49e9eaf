use procura_agent::{ChatCompletionsGateway, PromptLibrary};
use procura_core::domain::negotiation::NegotiationStatus;
use procura_db::{NegotiationRepository, SqlConversationStore};

use crate::commands::{with_migrated_pool, CommandResult};

struct Preflight {
    provider: &'static str,
    model: String,
    active: usize,
}

pub fn run() -> CommandResult {
    let result = with_migrated_pool("start", |config, pool| async move {
        ChatCompletionsGateway::from_config(&config.llm)
            .map_err(|error| ("gateway_init", error.to_string(), 6u8))?;
        PromptLibrary::new().map_err(|error| ("prompt_templates", error.to_string(), 6u8))?;

        let active = SqlConversationStore::new(pool)
            .list_negotiations(Some(NegotiationStatus::Active))
            .await
            .map_err(|error| ("db_query", error.to_string(), 4u8))?
            .len();

        Ok(Preflight { provider: config.llm.provider.as_str(), model: config.llm.model, active })
    });

    match result {
        Ok(preflight) => CommandResult::success(
            "start",
            format!(
                "preflight passed: generation via {} ({}); {} active negotiation(s) resume when procura-server starts",
                preflight.provider, preflight.model, preflight.active
            ),
        ),
        Err(failure) => failure,
    }
}
