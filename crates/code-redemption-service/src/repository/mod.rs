//! 仓储层
//!
//! 定义存储接口，并提供 PostgreSQL 与内存两种实现

mod batch_repo;
mod memory;
mod redemption_repo;
mod traits;

pub use batch_repo::BatchRepository;
pub use memory::{MemoryCodeStore, MemoryConsumptionTx};
pub use redemption_repo::{PgConsumptionTx, RedemptionRepository};
pub use traits::*;

use access_code_shared::database::TenantSchema;

/// 带 schema 前缀的表名
#[derive(Debug, Clone)]
pub(crate) struct Tables {
    pub batches: String,
    pub codes: String,
    pub redemptions: String,
    pub benefits: String,
}

impl Tables {
    pub fn new(schema: &TenantSchema) -> Self {
        Self {
            batches: schema.qualify("code_batches"),
            codes: schema.qualify("codes"),
            redemptions: schema.qualify("redemptions"),
            benefits: schema.qualify("principal_benefits"),
        }
    }
}

pub(crate) const BATCH_COLUMNS: &str = "id, benefit_id, name, use_type, num_codes, code_prefix, \
     code_suffix, random_length, exclude_chars, code_hash, code_plain, max_uses, use_count, \
     expires_at, created_by, created_at";

pub(crate) const CODE_COLUMNS: &str = "id, batch_id, code_hash, status, redeemed_at, \
     redeemed_by_principal_id, redeemed_for_beneficiary_id, created_at";
