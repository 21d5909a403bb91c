//! `GET /api/minted` - read-only enumeration of tokens minted to an
//! address or ENS name. Idempotent, unauthenticated, never cached by
//! intermediaries.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::state::AppState;

use super::HttpError;

#[derive(Debug, Default, Deserialize)]
pub struct MintedQuery {
    pub address: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "fromBlock")]
    pub from_block: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MintedResponse {
    address: String,
    count: usize,
    token_ids: Vec<String>,
    last_token_id: Option<String>,
}

pub async fn handle(
    State(state): State<AppState>,
    Query(query): Query<MintedQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let raw = [&query.address, &query.name]
        .into_iter()
        .flatten()
        .map(|value| value.trim())
        .find(|value| !value.is_empty());
    let Some(raw) = raw else {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            "address is required".to_string(),
        ));
    };

    let Some(contract) = state.contract.as_ref() else {
        return Err(HttpError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "CONTRACT_ADDRESS is not configured".to_string(),
        ));
    };

    let Some(resolved) = state.resolver.resolve(raw).await else {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            "Invalid address or ENS name".to_string(),
        ));
    };

    let from_block = query
        .from_block
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(state.deploy_block);

    let token_ids = contract
        .minted_token_ids(resolved, from_block)
        .await
        .map_err(|err| {
            error!("Minted lookup failed for {resolved}: {err:#}");
            HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Minted lookup failed".to_string(),
            )
        })?;

    let response = MintedResponse {
        address: resolved.to_checksum(),
        count: token_ids.len(),
        last_token_id: token_ids.last().cloned(),
        token_ids,
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok((headers, Json(response)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_response_wire_shape() {
        let response = MintedResponse {
            address: "0xAb".into(),
            count: 2,
            last_token_id: Some("5".into()),
            token_ids: vec!["3".into(), "5".into()],
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["address"], "0xAb");
        assert_eq!(value["count"], 2);
        assert_eq!(value["tokenIds"][1], "5");
        assert_eq!(value["lastTokenId"], "5");
    }

    #[test]
    fn empty_history_has_null_last_token() {
        let response = MintedResponse {
            address: "0xAb".into(),
            count: 0,
            last_token_id: None,
            token_ids: Vec::new(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value["lastTokenId"].is_null());
    }
}
