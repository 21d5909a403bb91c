//! Process-local relay store.
//!
//! One mutex guards all maps, so every trait operation is a single critical
//! section and trivially atomic. Ephemeral: state is gone on restart, and
//! two instances sharing nothing would each enforce their own caps.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{MintRecord, RateDecision, RelayStore, Reservation, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    requests: HashMap<String, RequestSlot>,
    counts: HashMap<String, u32>,
    rates: HashMap<String, RateWindow>,
}

enum RequestSlot {
    Pending,
    Completed(MintRecord),
}

struct RateWindow {
    count: u32,
    reset_at: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn count_for(&self, address: &str) -> u32 {
        self.inner
            .lock()
            .await
            .counts
            .get(address)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn cached_result(&self, request_id: &str) -> Result<Option<MintRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(match inner.requests.get(request_id) {
            Some(RequestSlot::Completed(record)) => Some(record.clone()),
            _ => None,
        })
    }

    async fn reserve(
        &self,
        request_id: &str,
        address: &str,
        max_per_address: u32,
    ) -> Result<Reservation, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.requests.get(request_id) {
            Some(RequestSlot::Completed(record)) => {
                return Ok(Reservation::Completed(record.clone()));
            }
            Some(RequestSlot::Pending) => return Ok(Reservation::InFlight),
            None => {}
        }

        let count = inner.counts.get(address).copied().unwrap_or(0);
        if count >= max_per_address {
            return Ok(Reservation::CapReached);
        }

        inner
            .requests
            .insert(request_id.to_string(), RequestSlot::Pending);
        inner.counts.insert(address.to_string(), count + 1);
        Ok(Reservation::Granted)
    }

    async fn commit(&self, request_id: &str, record: &MintRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.requests.get_mut(request_id) {
            Some(slot) => {
                *slot = RequestSlot::Completed(record.clone());
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!(
                "Commit for unreserved request {request_id}"
            ))),
        }
    }

    async fn release(&self, request_id: &str, address: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        // Only a pending slot may be rolled back; a completed record is
        // authoritative forever.
        if matches!(inner.requests.get(request_id), Some(RequestSlot::Pending)) {
            inner.requests.remove(request_id);
            if let Some(count) = inner.counts.get_mut(address) {
                *count = count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn rate_hit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_hits: u32,
    ) -> Result<RateDecision, StoreError> {
        let mut inner = self.inner.lock().await;
        let window = inner.rates.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            reset_at: now_ms + window_ms,
        });

        if now_ms > window.reset_at {
            window.count = 0;
            window.reset_at = now_ms + window_ms;
        }

        if window.count >= max_hits {
            return Ok(RateDecision {
                allowed: false,
                count: window.count,
                reset_at: window.reset_at,
            });
        }

        window.count += 1;
        Ok(RateDecision {
            allowed: true,
            count: window.count,
            reset_at: window.reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token_id: &str) -> MintRecord {
        MintRecord {
            resolved_address: "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".into(),
            tx_hash: "0xfeed".into(),
            token_id: token_id.into(),
        }
    }

    #[tokio::test]
    async fn reserve_commit_then_cached() {
        let store = MemoryStore::new();
        let granted = store.reserve("req-1", "0xaa", 3).await.unwrap();
        assert!(matches!(granted, Reservation::Granted));
        assert!(store.cached_result("req-1").await.unwrap().is_none());

        store.commit("req-1", &record("1")).await.unwrap();
        assert_eq!(store.cached_result("req-1").await.unwrap(), Some(record("1")));
    }

    #[tokio::test]
    async fn duplicate_request_id_is_in_flight_then_completed() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.reserve("req-1", "0xaa", 3).await.unwrap(),
            Reservation::Granted
        ));
        assert!(matches!(
            store.reserve("req-1", "0xaa", 3).await.unwrap(),
            Reservation::InFlight
        ));

        store.commit("req-1", &record("1")).await.unwrap();
        match store.reserve("req-1", "0xaa", 3).await.unwrap() {
            Reservation::Completed(rec) => assert_eq!(rec, record("1")),
            other => panic!("Expected completed reservation, got {other:?}"),
        }
        // The retry did not consume another cap slot.
        assert_eq!(store.count_for("0xaa").await, 1);
    }

    #[tokio::test]
    async fn cap_is_enforced_at_reservation() {
        let store = MemoryStore::new();
        for i in 0..3 {
            let id = format!("req-{i}");
            assert!(matches!(
                store.reserve(&id, "0xaa", 3).await.unwrap(),
                Reservation::Granted
            ));
            store.commit(&id, &record(&i.to_string())).await.unwrap();
        }
        assert!(matches!(
            store.reserve("req-4", "0xaa", 3).await.unwrap(),
            Reservation::CapReached
        ));
        // A different recipient is unaffected.
        assert!(matches!(
            store.reserve("req-5", "0xbb", 3).await.unwrap(),
            Reservation::Granted
        ));
    }

    #[tokio::test]
    async fn release_returns_the_cap_slot() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.reserve("req-1", "0xaa", 1).await.unwrap(),
            Reservation::Granted
        ));
        store.release("req-1", "0xaa").await.unwrap();
        assert_eq!(store.count_for("0xaa").await, 0);

        // The id and the slot are both free again.
        assert!(matches!(
            store.reserve("req-1", "0xaa", 1).await.unwrap(),
            Reservation::Granted
        ));
    }

    #[tokio::test]
    async fn release_never_rolls_back_a_completed_mint() {
        let store = MemoryStore::new();
        store.reserve("req-1", "0xaa", 3).await.unwrap();
        store.commit("req-1", &record("1")).await.unwrap();
        store.release("req-1", "0xaa").await.unwrap();
        assert_eq!(store.cached_result("req-1").await.unwrap(), Some(record("1")));
        assert_eq!(store.count_for("0xaa").await, 1);
    }

    #[tokio::test]
    async fn rate_window_counts_and_resets() {
        let store = MemoryStore::new();
        let window_ms = 600_000;
        let now = 1_000_000;

        for expected in 1..=120 {
            let decision = store.rate_hit("ip", now, window_ms, 120).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.count, expected);
        }
        let denied = store.rate_hit("ip", now, window_ms, 120).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 120);
        assert_eq!(denied.reset_at, now + window_ms);

        // Still inside the window: denied.
        let late = store
            .rate_hit("ip", now + window_ms, window_ms, 120)
            .await
            .unwrap();
        assert!(!late.allowed);

        // Past expiry: the counter restarts at 1.
        let fresh = store
            .rate_hit("ip", now + window_ms + 1, window_ms, 120)
            .await
            .unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.reset_at, now + window_ms + 1 + window_ms);
    }

    #[tokio::test]
    async fn rate_windows_are_per_key() {
        let store = MemoryStore::new();
        store.rate_hit("a", 0, 1_000, 1).await.unwrap();
        assert!(!store.rate_hit("a", 0, 1_000, 1).await.unwrap().allowed);
        assert!(store.rate_hit("b", 0, 1_000, 1).await.unwrap().allowed);
    }
}
