//! Mint request entity: one row per logical mint attempt, keyed by the
//! client-supplied request id. A `pending` row is an in-flight reservation;
//! a `completed` row is the immutable, authoritative result for every retry.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mint_requests")]
pub struct Model {
    /// Client-generated idempotency token.
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(StringLen::N(128))")]
    pub request_id: String,
    /// EIP-55 checksummed recipient, as returned in the response body.
    #[sea_orm(column_type = "String(StringLen::N(64))")]
    pub resolved_address: String,
    #[sea_orm(column_type = "String(StringLen::N(16))")]
    pub status: String,
    #[sea_orm(column_type = "String(StringLen::N(128))", nullable)]
    pub tx_hash: Option<String>,
    #[sea_orm(column_type = "String(StringLen::N(96))", nullable)]
    pub token_id: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
