use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use procura_db::DbPool;
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub active_negotiations: Option<i64>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let active = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM negotiation WHERE status = 'active'",
    )
    .fetch_one(&state.db_pool)
    .await;

    let (status_code, payload) = match active {
        Ok(count) => (
            StatusCode::OK,
            HealthResponse {
                status: "ready",
                database: HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
                active_negotiations: Some(count),
                checked_at: Utc::now().to_rfc3339(),
            },
        ),
        Err(error) => {
            warn!(
                event_name = "system.health.database_degraded",
                error = %error,
                "health check query failed"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                HealthResponse {
                    status: "degraded",
                    database: HealthCheck {
                        status: "degraded",
                        detail: format!("database query failed: {error}"),
                    },
                    active_negotiations: None,
                    checked_at: Utc::now().to_rfc3339(),
                },
            )
        }
    };

    (status_code, Json(payload))
}
