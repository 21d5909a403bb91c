//! The mint pipeline: the ordered guards between an authenticated,
//! rate-admitted request and a confirmed on-chain mint.
//!
//! Ordering is deliberate. The idempotency lookup precedes the cap check so
//! a retried request for an already-minted id succeeds from the cache even
//! when the cap would otherwise block it; configuration is validated before
//! any chain traffic; the request-id claim and the cap slot are taken in a
//! single atomic reservation before the transaction is submitted, and a
//! failed submission releases both.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::contract::MintSubmitter;
use crate::ens::RecipientResolver;
use crate::store::{MintRecord, RelayStore, Reservation, StoreError};

/// Maximum successful mints per resolved recipient address.
pub const MAX_MINTS_PER_ADDRESS: u32 = 3;

#[derive(Debug, Error)]
pub enum MintError {
    #[error("recipient is required")]
    MissingRecipient,
    #[error("requestId is required")]
    MissingRequestId,
    #[error("Invalid recipient")]
    InvalidRecipient,
    #[error("CONTRACT_ADDRESS is not configured")]
    ContractNotConfigured,
    #[error("RELAYER_PRIVATE_KEY is not configured")]
    RelayerNotConfigured,
    #[error("Mint limit reached for this address")]
    CapReached,
    #[error("Mint already in progress for this request")]
    InFlight,
    #[error("Mint failed")]
    MintFailed,
    #[error("Store operation failed")]
    Store(#[source] StoreError),
}

impl From<StoreError> for MintError {
    fn from(err: StoreError) -> Self {
        error!("Relay store failure: {err}");
        Self::Store(err)
    }
}

/// Runs guards 5-10 of the mint pipeline (everything after method, auth,
/// rate limit, and body shape). `minter` is `None` while the relayer key or
/// contract address is unconfigured.
pub async fn process_mint(
    store: &dyn RelayStore,
    resolver: &dyn RecipientResolver,
    contract_configured: bool,
    minter: Option<&Arc<dyn MintSubmitter>>,
    recipient_raw: &str,
    request_id: &str,
    max_per_address: u32,
) -> Result<MintRecord, MintError> {
    let recipient_raw = recipient_raw.trim();
    let request_id = request_id.trim();
    if recipient_raw.is_empty() {
        return Err(MintError::MissingRecipient);
    }
    if request_id.is_empty() {
        return Err(MintError::MissingRequestId);
    }

    // Idempotency short-circuit: retries must succeed without chain traffic
    // regardless of cap or configuration state.
    if let Some(cached) = store.cached_result(request_id).await? {
        info!(request_id, "Serving cached mint result");
        return Ok(cached);
    }

    if !contract_configured {
        return Err(MintError::ContractNotConfigured);
    }
    let Some(minter) = minter else {
        return Err(MintError::RelayerNotConfigured);
    };

    let resolved = resolver
        .resolve(recipient_raw)
        .await
        .ok_or(MintError::InvalidRecipient)?;
    let count_key = resolved.to_lowercase_hex();

    match store
        .reserve(request_id, &count_key, max_per_address)
        .await?
    {
        Reservation::Granted => {}
        Reservation::Completed(record) => {
            info!(request_id, "Reservation found a completed racing retry");
            return Ok(record);
        }
        Reservation::InFlight => return Err(MintError::InFlight),
        Reservation::CapReached => return Err(MintError::CapReached),
    }

    let outcome = match minter.mint_to(resolved).await {
        Ok(outcome) => outcome,
        Err(err) => {
            // Underlying chain errors stay server-side by design.
            error!(request_id, "Mint failed for {resolved}: {err:#}");
            if let Err(release_err) = store.release(request_id, &count_key).await {
                error!(request_id, "Failed to release reservation: {release_err}");
            }
            return Err(MintError::MintFailed);
        }
    };

    let record = MintRecord {
        resolved_address: resolved.to_checksum(),
        tx_hash: outcome.tx_hash,
        token_id: outcome.token_id,
    };

    // The mint is confirmed on-chain at this point. If the commit fails the
    // pending reservation stays put, which keeps retries from double
    // minting; it is not released.
    if let Err(err) = store.commit(request_id, &record).await {
        error!(request_id, "Failed to persist mint result: {err}");
        return Err(err.into());
    }

    info!(
        request_id,
        recipient = %record.resolved_address,
        tx_hash = %record.tx_hash,
        token_id = %record.token_id,
        "Mint completed"
    );
    Ok(record)
}

/// Validates the tap key presented via header or query parameter. An
/// unconfigured secret rejects everything; these requests spend real gas.
pub fn tap_key_valid(expected: Option<&str>, presented: Option<&str>) -> bool {
    match expected {
        Some(expected) if !expected.is_empty() => presented == Some(expected),
        _ => {
            warn!("Mint request rejected: TAP_KEY is not configured");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use crate::contract::{MintOutcome, MintSubmitter};
    use crate::ens::RecipientResolver;
    use crate::eth::address::Address;
    use crate::store::MemoryStore;

    use super::*;

    const RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    struct LiteralResolver;

    #[async_trait]
    impl RecipientResolver for LiteralResolver {
        async fn resolve(&self, raw: &str) -> Option<Address> {
            Address::parse(raw.trim()).ok()
        }
    }

    /// Counts submissions; every call errors when `fail` is set.
    struct CountingMinter {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingMinter {
        fn succeeding() -> Arc<dyn MintSubmitter> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<dyn MintSubmitter> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl MintSubmitter for CountingMinter {
        async fn mint_to(&self, _recipient: Address) -> anyhow::Result<MintOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("nonce too low"));
            }
            Ok(MintOutcome {
                tx_hash: format!("0xhash{call}"),
                token_id: (call + 1).to_string(),
            })
        }
    }

    #[tokio::test]
    async fn identical_retry_returns_identical_record_and_mints_once() {
        let store = MemoryStore::new();
        let counting = Arc::new(CountingMinter {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let minter: Arc<dyn MintSubmitter> = counting.clone();

        let first = process_mint(&store, &LiteralResolver, true, Some(&minter), RECIPIENT, "abc-1", 3)
            .await
            .unwrap();
        let second = process_mint(&store, &LiteralResolver, true, Some(&minter), RECIPIENT, "abc-1", 3)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cap_blocks_fourth_mint_without_submission() {
        let store = MemoryStore::new();
        let counting = Arc::new(CountingMinter {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let minter: Arc<dyn MintSubmitter> = counting.clone();

        for i in 0..3 {
            let id = format!("req-{i}");
            process_mint(&store, &LiteralResolver, true, Some(&minter), RECIPIENT, &id, 3)
                .await
                .unwrap();
        }
        let blocked =
            process_mint(&store, &LiteralResolver, true, Some(&minter), RECIPIENT, "req-4", 3).await;
        assert!(matches!(blocked, Err(MintError::CapReached)));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_for_cached_id_succeeds_even_past_the_cap() {
        let store = MemoryStore::new();
        let minter = CountingMinter::succeeding();

        for i in 0..3 {
            let id = format!("req-{i}");
            process_mint(&store, &LiteralResolver, true, Some(&minter), RECIPIENT, &id, 3)
                .await
                .unwrap();
        }
        // Retrying one of the original ids still serves the cache.
        let retried =
            process_mint(&store, &LiteralResolver, true, Some(&minter), RECIPIENT, "req-1", 3)
                .await
                .unwrap();
        assert_eq!(retried.token_id, "2");
    }

    #[tokio::test]
    async fn failed_mint_releases_the_reservation() {
        let store = MemoryStore::new();
        let failing = CountingMinter::failing();

        let failed =
            process_mint(&store, &LiteralResolver, true, Some(&failing), RECIPIENT, "req-1", 3).await;
        assert!(matches!(failed, Err(MintError::MintFailed)));
        assert!(store.cached_result("req-1").await.unwrap().is_none());

        // The slot and the id are both free: a later attempt succeeds.
        let minter = CountingMinter::succeeding();
        let recovered =
            process_mint(&store, &LiteralResolver, true, Some(&minter), RECIPIENT, "req-1", 3)
                .await
                .unwrap();
        assert_eq!(recovered.token_id, "1");
    }

    #[tokio::test]
    async fn blank_fields_are_rejected_before_any_work() {
        let store = MemoryStore::new();
        let minter = CountingMinter::succeeding();

        let no_recipient =
            process_mint(&store, &LiteralResolver, true, Some(&minter), "  ", "req-1", 3).await;
        assert!(matches!(no_recipient, Err(MintError::MissingRecipient)));

        let no_id =
            process_mint(&store, &LiteralResolver, true, Some(&minter), RECIPIENT, "\t", 3).await;
        assert!(matches!(no_id, Err(MintError::MissingRequestId)));
    }

    #[tokio::test]
    async fn unresolvable_recipient_is_a_client_error() {
        let store = MemoryStore::new();
        let minter = CountingMinter::succeeding();
        let result =
            process_mint(&store, &LiteralResolver, true, Some(&minter), "not-an-address", "r", 3).await;
        assert!(matches!(result, Err(MintError::InvalidRecipient)));
    }

    #[tokio::test]
    async fn missing_relayer_config_is_a_server_error() {
        let store = MemoryStore::new();
        let result = process_mint(&store, &LiteralResolver, true, None, RECIPIENT, "req-1", 3).await;
        assert!(matches!(result, Err(MintError::RelayerNotConfigured)));

        let result =
            process_mint(&store, &LiteralResolver, false, None, RECIPIENT, "req-1", 3).await;
        assert!(matches!(result, Err(MintError::ContractNotConfigured)));
    }

    #[tokio::test]
    async fn recipient_case_does_not_split_the_cap() {
        let store = MemoryStore::new();
        let minter = CountingMinter::succeeding();

        let lower = RECIPIENT.to_lowercase();
        process_mint(&store, &LiteralResolver, true, Some(&minter), &lower, "req-a", 1)
            .await
            .unwrap();
        let blocked =
            process_mint(&store, &LiteralResolver, true, Some(&minter), RECIPIENT, "req-b", 1).await;
        assert!(matches!(blocked, Err(MintError::CapReached)));
    }

    #[test]
    fn tap_key_validation() {
        assert!(tap_key_valid(Some("secret"), Some("secret")));
        assert!(!tap_key_valid(Some("secret"), Some("wrong")));
        assert!(!tap_key_valid(Some("secret"), None));
        assert!(!tap_key_valid(Some(""), Some("")));
        assert!(!tap_key_valid(None, Some("secret")));
    }
}
