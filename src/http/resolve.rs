//! `GET /api/resolve` - ENS-only resolution for UI previews.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::eth::address::Address;
use crate::state::AppState;

use super::HttpError;

#[derive(Debug, Default, Deserialize)]
pub struct ResolveQuery {
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    name: String,
    address: Address,
}

pub async fn handle(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, HttpError> {
    let name = query.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() || !name.to_lowercase().ends_with(".eth") {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            "Invalid ENS name".to_string(),
        ));
    }

    let Some(address) = state.resolver.resolve(name).await else {
        return Err(HttpError::new(
            StatusCode::NOT_FOUND,
            "ENS name not found".to_string(),
        ));
    };

    Ok(Json(ResolveResponse {
        name: name.to_string(),
        address,
    }))
}
