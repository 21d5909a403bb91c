use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::CorsConfig;
use crate::state::AppState;

mod mint;
mod minted;
mod resolve;

pub const TAP_KEY_HEADER: &str = "x-tap-key";

pub fn router(state: AppState, cors: &CorsConfig) -> Router {
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    assert!(
        !origins.is_empty(),
        "CORS allow-list must contain at least one valid origin"
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(TAP_KEY_HEADER)])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/api/health", get(health))
        .route("/api/mint", post(mint::handle))
        .route("/api/minted", get(minted::handle))
        .route("/api/resolve", get(resolve::handle))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Configuration presence only: no secrets echoed, no external probing.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        chain_id: state.chain_id,
        contract: state.contract_hex(),
        relayer: state.relayer_status(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    chain_id: u64,
    contract: String,
    relayer: &'static str,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}
