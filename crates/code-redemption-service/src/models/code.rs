//! 一次性兑换码与多次使用兑换记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::CodeStatus;

/// 一次性兑换码
///
/// 只保存哈希，明文仅在生成时返回一次
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Code {
    pub id: i64,
    pub batch_id: i64,
    pub code_hash: String,
    pub status: CodeStatus,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub redeemed_by_principal_id: Option<String>,
    pub redeemed_for_beneficiary_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Code {
    pub fn is_available(&self) -> bool {
        self.status == CodeStatus::Available
    }
}

/// 待写入的兑换码
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewCode {
    pub code_hash: String,
}

/// 多次使用批次的兑换记录（只追加）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Redemption {
    pub id: i64,
    pub batch_id: i64,
    pub principal_id: String,
    pub beneficiary_id: String,
    pub redeemed_at: DateTime<Utc>,
}

/// 待写入的兑换记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRedemption {
    pub batch_id: i64,
    pub principal_id: String,
    pub beneficiary_id: String,
    pub redeemed_at: DateTime<Utc>,
}
