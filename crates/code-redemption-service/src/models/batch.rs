//! 兑换码批次实体
//!
//! 批次是一条发放策略：关联的权益、使用类型、有效期，
//! 以及一次性批次的生成参数或多次使用批次的共享码。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::UseType;

/// 兑换码批次
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CodeBatch {
    pub id: i64,
    /// 兑换后发放的权益 ID（外部系统的不透明标识）
    pub benefit_id: String,
    pub name: String,
    pub use_type: UseType,

    // 一次性批次的生成参数
    pub num_codes: Option<i32>,
    pub code_prefix: Option<String>,
    pub code_suffix: Option<String>,
    pub random_length: Option<i32>,
    pub exclude_chars: Option<String>,

    // 多次使用批次的共享码
    #[serde(skip_serializing)]
    pub code_hash: Option<String>,
    pub code_plain: Option<String>,
    /// 最大使用次数，None 表示不限
    pub max_uses: Option<i32>,
    pub use_count: i32,

    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl CodeBatch {
    pub fn is_single_use(&self) -> bool {
        self.use_type == UseType::SingleUse
    }

    pub fn is_multi_use(&self) -> bool {
        self.use_type == UseType::MultiUse
    }

    /// 是否已过期（到期时刻本身即视为过期）
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// 多次使用批次是否还有剩余次数
    pub fn has_remaining_uses(&self) -> bool {
        match self.max_uses {
            Some(max) => self.use_count < max,
            None => true,
        }
    }

    /// 剩余使用次数，不限次数时返回 None
    pub fn remaining_uses(&self) -> Option<i32> {
        self.max_uses.map(|max| (max - self.use_count).max(0))
    }
}

/// 新建一次性批次的写入参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSingleUseBatch {
    pub benefit_id: String,
    pub name: String,
    pub num_codes: i32,
    pub code_prefix: String,
    pub code_suffix: String,
    pub random_length: i32,
    pub exclude_chars: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// 新建多次使用批次的写入参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMultiUseBatch {
    pub benefit_id: String,
    pub name: String,
    pub code_plain: String,
    pub code_hash: String,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// 批次统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BatchStats {
    pub batch_id: i64,
    pub use_type: UseType,
    pub total_codes: i64,
    pub available_codes: i64,
    pub redeemed_codes: i64,
    pub use_count: i32,
    pub max_uses: Option<i32>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn single_use_batch(id: i64) -> CodeBatch {
        CodeBatch {
            id,
            benefit_id: "membership-gold".to_string(),
            name: "新会员礼包".to_string(),
            use_type: UseType::SingleUse,
            num_codes: Some(10),
            code_prefix: Some("VIP-".to_string()),
            code_suffix: None,
            random_length: Some(8),
            exclude_chars: Some("oO0iIlL1".to_string()),
            code_hash: None,
            code_plain: None,
            max_uses: None,
            use_count: 0,
            expires_at: None,
            created_by: "operator".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn multi_use_batch(id: i64, max_uses: Option<i32>, use_count: i32) -> CodeBatch {
        CodeBatch {
            id,
            benefit_id: "membership-gold".to_string(),
            name: "直播间口令".to_string(),
            use_type: UseType::MultiUse,
            num_codes: None,
            code_prefix: None,
            code_suffix: None,
            random_length: None,
            exclude_chars: None,
            code_hash: Some("a".repeat(64)),
            code_plain: Some("LIVE2025".to_string()),
            max_uses,
            use_count,
            expires_at: None,
            created_by: "operator".to_string(),
            created_at: Utc::now(),
        }
    }
}
