use std::sync::Arc;

use procura_agent::{
    AgentContext, ChatCompletionsGateway, GenerationError, NegotiationRuntime, PromptError,
    PromptLibrary, RetryPolicy,
};
use procura_channel::{
    MailboxRunner, NoopMailboxTransport, NoopMailer, ReconnectPolicy, ReplyIngestor,
};
use procura_core::config::{AppConfig, EmailSettings};
use procura_core::errors::ApplicationError;
use procura_db::{
    connect_with_settings, migrations, DbPool, EmailConfigRepository, RepositoryError,
    SqlCatalogRepository, SqlConversationStore, SqlEmailConfigRepository,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: Arc<SqlConversationStore>,
    pub catalog: Arc<SqlCatalogRepository>,
    pub ingestor: ReplyIngestor,
    pub runtime: Arc<NegotiationRuntime>,
    pub mailbox: Option<MailboxRunner>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("email configuration could not be read: {0}")]
    EmailConfig(#[source] RepositoryError),
    #[error("generation gateway could not be built: {0}")]
    Gateway(#[from] GenerationError),
    #[error("prompt templates failed to compile: {0}")]
    Prompts(#[from] PromptError),
    #[error("resuming active negotiations failed: {0}")]
    Resume(#[source] ApplicationError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SqlConversationStore::new(db_pool.clone()));
    let catalog = Arc::new(SqlCatalogRepository::new(db_pool.clone()));
    let ingestor = ReplyIngestor::new(store.clone(), catalog.clone());

    let email = effective_email_settings(&config.email, &db_pool).await?;
    let gateway = ChatCompletionsGateway::from_config(&config.llm)?;
    info!(
        event_name = "system.bootstrap.gateway_ready",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        "generation gateway configured"
    );

    let context = AgentContext::new(
        store.clone(),
        catalog.clone(),
        Arc::new(gateway),
        Arc::new(NoopMailer),
        Arc::new(PromptLibrary::new()?),
        RetryPolicy::from_config(&config.llm),
        config.negotiation.clone(),
    );
    let runtime = Arc::new(NegotiationRuntime::new(context));

    let resumed = runtime.resume_active().await.map_err(BootstrapError::Resume)?;
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        resumed,
        "negotiation runtime started"
    );

    let mailbox = (email.enabled && email.has_credentials()).then(|| {
        MailboxRunner::new(
            Arc::new(NoopMailboxTransport),
            Arc::new(ingestor.clone()),
            ReconnectPolicy::default(),
        )
    });

    Ok(Application { config, db_pool, store, catalog, ingestor, runtime, mailbox })
}

/// File and environment settings, overridden by the active `email_config` row when one exists.
async fn effective_email_settings(
    configured: &EmailSettings,
    pool: &DbPool,
) -> Result<EmailSettings, BootstrapError> {
    let stored = SqlEmailConfigRepository::new(pool.clone())
        .active_email_config()
        .await
        .map_err(BootstrapError::EmailConfig)?;

    let Some(stored) = stored else {
        return Ok(configured.clone());
    };

    info!(
        event_name = "system.bootstrap.email_config",
        correlation_id = "bootstrap",
        address = %stored.address,
        "using stored email configuration"
    );
    Ok(EmailSettings {
        enabled: true,
        address: Some(stored.address),
        app_password: Some(stored.app_password),
        imap_host: stored.imap_host,
        imap_port: stored.imap_port,
        smtp_host: stored.smtp_host,
        smtp_port: stored.smtp_port,
        poll_interval_secs: configured.poll_interval_secs,
    })
}
