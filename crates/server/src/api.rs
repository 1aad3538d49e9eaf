//! JSON API over the negotiation runtime and the conversation store.
//!
//! - `GET  /suppliers`
//! - `GET  /products`, `GET /products/search?q=`
//! - `POST /negotiations`, `GET /negotiations`, `GET /negotiations/{id}`
//! - `POST /negotiations/{id}/cancel`
//! - `GET  /negotiations/{id}/messages`
//! - `GET  /negotiations/{id}/suppliers/{supplier_id}/messages`
//! - `POST /negotiations/{id}/suppliers/{supplier_id}/replies`
//! - `GET  /negotiations/{id}/activity?supplier_id=`
//! - `GET  /negotiations/{id}/summaries`
//! - `POST /email/config`, `GET /email/config`

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use procura_agent::{NegotiationRuntime, NegotiationStatusReport, StartNegotiation};
use procura_channel::{InboundReply, IngestError, ReplyIngestor};
use procura_core::chrono::Utc;
use procura_core::domain::activity::OrchestratorActivity;
use procura_core::config::EmailSettings;
use procura_core::domain::agent::PairKey;
use procura_core::domain::email::{EmailConfig, EmailConfigId};
use procura_core::domain::message::Message;
use procura_core::domain::negotiation::{Negotiation, NegotiationId, NegotiationStatus};
use procura_core::domain::product::Product;
use procura_core::domain::summary::NegotiationSummary;
use procura_core::domain::supplier::{Supplier, SupplierId};
use procura_core::errors::{ApplicationError, InterfaceError};
use procura_db::{
    ConversationStore, EmailConfigRepository, ProductRepository, RepositoryError,
    SupplierRepository,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<NegotiationRuntime>,
    pub store: Arc<dyn ConversationStore>,
    pub suppliers: Arc<dyn SupplierRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub ingestor: ReplyIngestor,
    pub email_configs: Arc<dyn EmailConfigRepository>,
    pub mail_servers: MailServers,
}

/// Mail server endpoints used when a credentials request names none.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailServers {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl MailServers {
    pub fn from_settings(settings: &EmailSettings) -> Self {
        Self {
            imap_host: settings.imap_host.clone(),
            imap_port: settings.imap_port,
            smtp_host: settings.smtp_host.clone(),
            smtp_port: settings.smtp_port,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/suppliers", get(list_suppliers))
        .route("/products", get(list_products))
        .route("/products/search", get(search_products))
        .route("/negotiations", post(create_negotiation).get(list_negotiations))
        .route("/negotiations/{id}", get(negotiation_status))
        .route("/negotiations/{id}/cancel", post(cancel_negotiation))
        .route("/negotiations/{id}/messages", get(negotiation_messages))
        .route("/negotiations/{id}/suppliers/{supplier_id}/messages", get(pair_messages))
        .route("/negotiations/{id}/suppliers/{supplier_id}/replies", post(post_reply))
        .route("/negotiations/{id}/activity", get(list_activity))
        .route("/negotiations/{id}/summaries", get(list_summaries))
        .route("/email/config", post(save_email_config).get(active_email_config))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateNegotiationRequest {
    pub product: String,
    pub strategy: String,
    pub prompt: Option<String>,
    pub suppliers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedNegotiationResponse {
    pub negotiation_id: NegotiationId,
    pub status: NegotiationStatus,
    pub suppliers: Vec<SupplierId>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListNegotiationsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ActivityQuery {
    pub supplier_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub negotiation_id: NegotiationId,
    pub status: NegotiationStatus,
    pub changed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub content: String,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub message: Message,
    pub duplicate: bool,
}

#[derive(Deserialize)]
pub struct EmailConfigRequest {
    pub address: String,
    pub app_password: String,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
}

/// Stored mailbox credentials without the password.
#[derive(Debug, Serialize)]
pub struct EmailConfigResponse {
    pub id: String,
    pub address: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub active: bool,
    /// The mailbox runner picks up new credentials on the next server start.
    pub applies_on_restart: bool,
}

impl From<EmailConfig> for EmailConfigResponse {
    fn from(config: EmailConfig) -> Self {
        Self {
            id: config.id.0,
            address: config.address,
            imap_host: config.imap_host,
            imap_port: config.imap_port,
            smtp_host: config.smtp_host,
            smtp_port: config.smtp_port,
            active: config.active,
            applies_on_restart: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

/// Interface error carrying a per-request correlation id.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        Self(error.into_interface(Uuid::new_v4().to_string()))
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::from(error).into()
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        ApplicationError::from(error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(
                event_name = "api.request.failed",
                correlation_id = %self.0.correlation_id(),
                status = status.as_u16(),
                detail = %self.0.detail(),
                "request failed"
            );
        }
        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.detail().to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

async fn list_suppliers(State(state): State<ApiState>) -> ApiResult<Json<Vec<Supplier>>> {
    Ok(Json(state.suppliers.list_suppliers().await?))
}

async fn list_products(State(state): State<ApiState>) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(state.products.list_products().await?))
}

async fn search_products(
    State(state): State<ApiState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Product>>> {
    let term = query.q.unwrap_or_default();
    let term = term.trim();
    if term.is_empty() {
        return Ok(Json(state.products.list_products().await?));
    }
    Ok(Json(state.products.search_products(term).await?))
}

// ---------------------------------------------------------------------------
// Negotiations
// ---------------------------------------------------------------------------

async fn create_negotiation(
    State(state): State<ApiState>,
    Json(request): Json<CreateNegotiationRequest>,
) -> ApiResult<(StatusCode, Json<CreatedNegotiationResponse>)> {
    let created = state
        .runtime
        .start(StartNegotiation {
            product: request.product,
            strategy: request.strategy,
            prompt: request.prompt.filter(|prompt| !prompt.trim().is_empty()),
            suppliers: request.suppliers.into_iter().map(SupplierId).collect(),
        })
        .await?;

    info!(
        event_name = "api.negotiation.created",
        negotiation_id = %created.negotiation.id,
        "negotiation started through the API"
    );

    let suppliers =
        created.negotiators.into_iter().filter_map(|agent| agent.supplier_id).collect();
    Ok((
        StatusCode::CREATED,
        Json(CreatedNegotiationResponse {
            negotiation_id: created.negotiation.id,
            status: created.negotiation.status,
            suppliers,
        }),
    ))
}

async fn list_negotiations(
    State(state): State<ApiState>,
    Query(query): Query<ListNegotiationsQuery>,
) -> ApiResult<Json<Vec<Negotiation>>> {
    let status = match query.status.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => Some(NegotiationStatus::parse(raw).ok_or_else(|| {
            ApplicationError::Validation(format!(
                "unknown status `{raw}` (expected active|completed|cancelled)"
            ))
        })?),
        None => None,
    };
    Ok(Json(state.store.list_negotiations(status).await?))
}

async fn negotiation_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<NegotiationStatusReport>> {
    Ok(Json(state.runtime.status(&NegotiationId(id)).await?))
}

async fn cancel_negotiation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let id = NegotiationId(id);
    let change = state.runtime.cancel(&id).await?;
    Ok(Json(CancelResponse { negotiation_id: id, status: change.status(), changed: change.applied() }))
}

async fn negotiation_messages(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let id = require_negotiation(&state, id).await?;
    Ok(Json(state.store.negotiation_history(&id).await?))
}

async fn pair_messages(
    State(state): State<ApiState>,
    Path((id, supplier_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<Message>>> {
    let pair = PairKey::new(NegotiationId(id), SupplierId(supplier_id));
    if state.store.load_pair(&pair).await?.is_none() {
        return Err(ApplicationError::not_found(
            "negotiator",
            format!("{}/{}", pair.negotiation_id, pair.supplier_id),
        )
        .into());
    }
    Ok(Json(state.store.pair_history(&pair).await?))
}

/// Synthetic ingestion channel: stores a supplier reply for a known pair.
async fn post_reply(
    State(state): State<ApiState>,
    Path((id, supplier_id)): Path<(String, String)>,
    Json(request): Json<ReplyRequest>,
) -> ApiResult<(StatusCode, Json<ReplyResponse>)> {
    let pair = PairKey::new(NegotiationId(id), SupplierId(supplier_id));
    let key = request.idempotency_key.filter(|key| !key.trim().is_empty());
    let ingested = state.ingestor.ingest(InboundReply::synthetic(pair, request.content, key)).await?;

    let duplicate = ingested.outcome.is_duplicate();
    let status = if duplicate { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(ReplyResponse { message: ingested.outcome.into_message(), duplicate })))
}

async fn list_activity(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<Vec<OrchestratorActivity>>> {
    let id = require_negotiation(&state, id).await?;
    let supplier_id = query.supplier_id.filter(|raw| !raw.trim().is_empty()).map(SupplierId);
    Ok(Json(state.store.list_activity(&id, supplier_id.as_ref()).await?))
}

async fn list_summaries(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<NegotiationSummary>>> {
    let id = require_negotiation(&state, id).await?;
    Ok(Json(state.store.list_summaries(&id).await?))
}

// ---------------------------------------------------------------------------
// Mailbox credentials
// ---------------------------------------------------------------------------

/// Saves mailbox credentials and makes them the active configuration.
async fn save_email_config(
    State(state): State<ApiState>,
    Json(request): Json<EmailConfigRequest>,
) -> ApiResult<(StatusCode, Json<EmailConfigResponse>)> {
    let address = request.address.trim().to_string();
    if address.is_empty() || !address.contains('@') {
        return Err(ApplicationError::Validation(format!(
            "`{address}` is not a valid email address"
        ))
        .into());
    }
    let app_password = SecretString::from(request.app_password);
    if app_password.expose_secret().trim().is_empty() {
        return Err(ApplicationError::Validation("app_password must not be empty".to_string()).into());
    }

    let defaults = &state.mail_servers;
    let imap_port = request.imap_port.unwrap_or(defaults.imap_port);
    let smtp_port = request.smtp_port.unwrap_or(defaults.smtp_port);
    if imap_port == 0 || smtp_port == 0 {
        return Err(ApplicationError::Validation(
            "imap_port and smtp_port must be greater than zero".to_string(),
        )
        .into());
    }

    let config = EmailConfig {
        id: EmailConfigId::generate(),
        address,
        app_password,
        imap_host: request
            .imap_host
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| defaults.imap_host.clone()),
        imap_port,
        smtp_host: request
            .smtp_host
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| defaults.smtp_host.clone()),
        smtp_port,
        active: true,
        created_at: Utc::now(),
    };
    state.email_configs.save_email_config(config.clone()).await?;
    state.email_configs.activate_email_config(&config.id).await?;

    info!(
        event_name = "api.email_config.saved",
        email_config_id = %config.id.0,
        address = %config.address,
        "mailbox credentials saved and activated"
    );
    Ok((StatusCode::CREATED, Json(config.into())))
}

async fn active_email_config(
    State(state): State<ApiState>,
) -> ApiResult<Json<EmailConfigResponse>> {
    let config = state
        .email_configs
        .active_email_config()
        .await?
        .ok_or_else(|| ApplicationError::not_found("email_config", "active"))?;
    Ok(Json(config.into()))
}

async fn require_negotiation(state: &ApiState, id: String) -> ApiResult<NegotiationId> {
    let id = NegotiationId(id);
    if state.store.find_negotiation(&id).await?.is_none() {
        return Err(ApplicationError::not_found("negotiation", id.0).into());
    }
    Ok(id)
}
