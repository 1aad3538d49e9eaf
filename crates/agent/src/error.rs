use thiserror::Error;

use procura_core::errors::{ApplicationError, DomainError};
use procura_core::flows::FlowTransitionError;
use procura_db::RepositoryError;

use crate::llm::GenerationError;
use crate::prompts::PromptError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Transition(#[from] FlowTransitionError),
    #[error("{entity} `{id}` disappeared while its agent was running")]
    Missing { entity: &'static str, id: String },
}

impl AgentError {
    pub fn missing(entity: &'static str, id: impl Into<String>) -> Self {
        Self::Missing { entity, id: id.into() }
    }
}

impl From<AgentError> for ApplicationError {
    fn from(value: AgentError) -> Self {
        match value {
            AgentError::Repository(error) => error.into(),
            AgentError::Generation(error) => error.into(),
            AgentError::Prompt(error) => Self::Configuration(error.to_string()),
            AgentError::Transition(error) => Self::Domain(DomainError::from(error)),
            AgentError::Missing { entity, id } => Self::NotFound { entity, id },
        }
    }
}
