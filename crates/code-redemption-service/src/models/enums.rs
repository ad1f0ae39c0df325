//! 兑换码枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 批次使用类型
///
/// 一次性批次下挂多个独立兑换码；多次使用批次自身持有一个共享码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum UseType {
    /// 一次性 - 每个码只能兑换一次
    SingleUse,
    /// 多次使用 - 共享码，受 max_uses 限制
    MultiUse,
}

impl UseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleUse => "single_use",
            Self::MultiUse => "multi_use",
        }
    }
}

/// 一次性兑换码状态
///
/// available -> redeemed 为唯一合法迁移，redeemed 为终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum CodeStatus {
    /// 可兑换
    #[default]
    Available,
    /// 已兑换
    Redeemed,
}

/// 兑换成功时的结果类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionOutcome {
    /// 本次兑换发放了权益
    Granted,
    /// 受益人已持有该权益
    AlreadyEntitled,
}

impl RedemptionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::AlreadyEntitled => "already_entitled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_use_type_serialization() {
        assert_eq!(
            serde_json::to_string(&UseType::SingleUse).unwrap(),
            "\"single_use\""
        );
        let parsed: UseType = serde_json::from_str("\"multi_use\"").unwrap();
        assert_eq!(parsed, UseType::MultiUse);
        assert_eq!(UseType::MultiUse.as_str(), "multi_use");
    }

    #[test]
    fn test_code_status_default() {
        assert_eq!(CodeStatus::default(), CodeStatus::Available);
        assert_eq!(
            serde_json::to_string(&CodeStatus::Redeemed).unwrap(),
            "\"redeemed\""
        );
    }
}
