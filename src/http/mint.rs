//! `POST /api/mint` - the relayed mint endpoint.
//!
//! Handler-level guards (auth, IP rate limit, body shape) run here in the
//! order the drop rules demand: the tap key gate first, then the rate limit
//! before any body parsing so malformed floods stay cheap. Everything after
//! that is [`crate::relay::process_mint`].

use std::net::SocketAddr;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use crate::relay::{self, MintError};
use crate::state::AppState;
use crate::store::MintRecord;

use super::{HttpError, TAP_KEY_HEADER};

#[derive(Debug, Default, Deserialize)]
pub struct MintQuery {
    /// Tap key fallback for clients that cannot set headers (NFC tag URLs).
    pub k: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MintBody {
    recipient: Option<String>,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
}

pub async fn handle(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<MintQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MintRecord>, HttpError> {
    let presented = headers
        .get(TAP_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .or(query.k.as_deref());
    if !relay::tap_key_valid(state.tap_key.as_deref(), presented) {
        return Err(HttpError::new(
            StatusCode::FORBIDDEN,
            "Invalid tap key".to_string(),
        ));
    }

    let client_ip = client_ip(&headers, peer);
    let decision = state
        .store
        .rate_hit(
            &client_ip,
            Utc::now().timestamp_millis(),
            state.limits.rate_window_ms,
            state.limits.rate_max,
        )
        .await
        .map_err(|err| {
            HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        })?;
    if !decision.allowed {
        warn!(%client_ip, count = decision.count, "Mint rate limit exceeded");
        return Err(HttpError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Try again shortly.".to_string(),
        ));
    }

    // Lenient body handling: malformed JSON behaves like an empty body and
    // falls out as a missing-field 400 below.
    let body: MintBody = serde_json::from_slice(&body).unwrap_or_default();
    let recipient = body.recipient.unwrap_or_default();
    let request_id = body.request_id.unwrap_or_default();

    let record = relay::process_mint(
        state.store.as_ref(),
        state.resolver.as_ref(),
        state.contract.is_some(),
        state.minter.as_ref(),
        &recipient,
        &request_id,
        state.limits.max_mints_per_address,
    )
    .await
    .map_err(mint_error_response)?;

    Ok(Json(record))
}

/// First `X-Forwarded-For` hop when present (the service runs behind an
/// edge proxy), otherwise the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

fn mint_error_response(err: MintError) -> HttpError {
    let status = match err {
        MintError::MissingRecipient
        | MintError::MissingRequestId
        | MintError::InvalidRecipient => StatusCode::BAD_REQUEST,
        MintError::CapReached => StatusCode::TOO_MANY_REQUESTS,
        MintError::InFlight => StatusCode::CONFLICT,
        MintError::ContractNotConfigured
        | MintError::RelayerNotConfigured
        | MintError::MintFailed
        | MintError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    HttpError::new(status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "203.0.113.9:443".parse().unwrap()
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "198.51.100.7, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(client_ip(&headers, peer()), "198.51.100.7");
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "203.0.113.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "".parse().unwrap());
        assert_eq!(client_ip(&headers, peer()), "203.0.113.9");
    }

    #[test]
    fn error_statuses_follow_the_taxonomy() {
        use axum::response::IntoResponse;

        let cases = [
            (MintError::MissingRecipient, StatusCode::BAD_REQUEST),
            (MintError::InvalidRecipient, StatusCode::BAD_REQUEST),
            (MintError::CapReached, StatusCode::TOO_MANY_REQUESTS),
            (MintError::InFlight, StatusCode::CONFLICT),
            (
                MintError::ContractNotConfigured,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (MintError::MintFailed, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let response = mint_error_response(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn body_parsing_is_lenient() {
        let parsed: MintBody = serde_json::from_slice(b"not json").unwrap_or_default();
        assert!(parsed.recipient.is_none());
        assert!(parsed.request_id.is_none());

        let parsed: MintBody =
            serde_json::from_slice(br#"{"recipient":"vitalik.eth","requestId":"abc-1"}"#)
                .unwrap_or_default();
        assert_eq!(parsed.recipient.as_deref(), Some("vitalik.eth"));
        assert_eq!(parsed.request_id.as_deref(), Some("abc-1"));
    }
}
