//! Postgres-backed relay store.
//!
//! Reservation, completion, release, and rate hits each run in one
//! transaction with `SELECT ... FOR UPDATE` row locks. Counter rows are
//! upserted with `ON CONFLICT DO NOTHING` before locking so the very first
//! request for a key has a row to lock, which is what serializes concurrent
//! first requests.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    DatabaseConnection, DatabaseTransaction, EntityTrait, QuerySelect, SqlErr, TransactionTrait,
};
use tracing::debug;

use crate::entities::prelude::{MintCount, MintRequest, RateWindow};
use crate::entities::{mint_count, mint_request, rate_window};
use crate::entities::mint_request::{STATUS_COMPLETED, STATUS_PENDING};

use super::{MintRecord, RateDecision, RelayStore, Reservation, StoreError};

pub struct PostgresStore {
    db: DatabaseConnection,
}

impl PostgresStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn locked_count(
        txn: &DatabaseTransaction,
        address: &str,
    ) -> Result<mint_count::Model, StoreError> {
        let ensure = mint_count::ActiveModel {
            address: Set(address.to_string()),
            count: Set(0),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        MintCount::insert(ensure)
            .on_conflict(
                OnConflict::column(mint_count::Column::Address)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(txn)
            .await?;

        MintCount::find_by_id(address.to_string())
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("Missing count row for {address}")))
    }
}

fn record_from_row(row: &mint_request::Model) -> Result<MintRecord, StoreError> {
    match (&row.tx_hash, &row.token_id) {
        (Some(tx_hash), Some(token_id)) => Ok(MintRecord {
            resolved_address: row.resolved_address.clone(),
            tx_hash: tx_hash.clone(),
            token_id: token_id.clone(),
        }),
        _ => Err(StoreError::Corrupt(format!(
            "Completed request {} lacks a transaction hash or token id",
            row.request_id
        ))),
    }
}

#[async_trait]
impl RelayStore for PostgresStore {
    async fn cached_result(&self, request_id: &str) -> Result<Option<MintRecord>, StoreError> {
        let row = MintRequest::find_by_id(request_id.to_string())
            .one(&self.db)
            .await?;
        match row {
            Some(row) if row.status == STATUS_COMPLETED => Ok(Some(record_from_row(&row)?)),
            _ => Ok(None),
        }
    }

    async fn reserve(
        &self,
        request_id: &str,
        address: &str,
        max_per_address: u32,
    ) -> Result<Reservation, StoreError> {
        let txn = self.db.begin().await?;

        let existing = MintRequest::find_by_id(request_id.to_string())
            .lock_exclusive()
            .one(&txn)
            .await?;
        if let Some(row) = existing {
            // Racing retries land here; completed rows are authoritative.
            return if row.status == STATUS_COMPLETED {
                Ok(Reservation::Completed(record_from_row(&row)?))
            } else {
                Ok(Reservation::InFlight)
            };
        }

        let count_row = Self::locked_count(&txn, address).await?;
        if count_row.count >= max_per_address as i32 {
            return Ok(Reservation::CapReached);
        }

        let pending = mint_request::ActiveModel {
            request_id: Set(request_id.to_string()),
            resolved_address: Set(address.to_string()),
            status: Set(STATUS_PENDING.to_string()),
            tx_hash: Set(None),
            token_id: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
        };
        if let Err(err) = MintRequest::insert(pending).exec(&txn).await {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                debug!(request_id, "Lost reservation race");
                return Ok(Reservation::InFlight);
            }
            return Err(err.into());
        }

        let bumped = mint_count::ActiveModel {
            address: Set(address.to_string()),
            count: Set(count_row.count + 1),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        MintCount::update(bumped).exec(&txn).await?;

        txn.commit().await?;
        Ok(Reservation::Granted)
    }

    async fn commit(&self, request_id: &str, record: &MintRecord) -> Result<(), StoreError> {
        let completed = mint_request::ActiveModel {
            request_id: Set(request_id.to_string()),
            resolved_address: Set(record.resolved_address.clone()),
            status: Set(STATUS_COMPLETED.to_string()),
            tx_hash: Set(Some(record.tx_hash.clone())),
            token_id: Set(Some(record.token_id.clone())),
            created_at: NotSet,
        };
        MintRequest::update(completed).exec(&self.db).await?;
        Ok(())
    }

    async fn release(&self, request_id: &str, address: &str) -> Result<(), StoreError> {
        let txn = self.db.begin().await?;

        let row = MintRequest::find_by_id(request_id.to_string())
            .lock_exclusive()
            .one(&txn)
            .await?;
        let Some(row) = row else {
            return Ok(());
        };
        if row.status != STATUS_PENDING {
            // A completed record is never rolled back.
            return Ok(());
        }

        MintRequest::delete_by_id(request_id.to_string())
            .exec(&txn)
            .await?;

        let count_row = Self::locked_count(&txn, address).await?;
        let decremented = mint_count::ActiveModel {
            address: Set(address.to_string()),
            count: Set((count_row.count - 1).max(0)),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        MintCount::update(decremented).exec(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn rate_hit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max_hits: u32,
    ) -> Result<RateDecision, StoreError> {
        let txn = self.db.begin().await?;

        let ensure = rate_window::ActiveModel {
            key: Set(key.to_string()),
            count: Set(0),
            reset_at: Set(now_ms + window_ms),
        };
        RateWindow::insert(ensure)
            .on_conflict(
                OnConflict::column(rate_window::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        let window = RateWindow::find_by_id(key.to_string())
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("Missing rate window for {key}")))?;

        let (count, reset_at) = if now_ms > window.reset_at {
            (0, now_ms + window_ms)
        } else {
            (window.count, window.reset_at)
        };

        if count >= max_hits as i32 {
            return Ok(RateDecision {
                allowed: false,
                count: count as u32,
                reset_at,
            });
        }

        let bumped = rate_window::ActiveModel {
            key: Set(key.to_string()),
            count: Set(count + 1),
            reset_at: Set(reset_at),
        };
        RateWindow::update(bumped).exec(&txn).await?;
        txn.commit().await?;

        Ok(RateDecision {
            allowed: true,
            count: (count + 1) as u32,
            reset_at,
        })
    }
}
