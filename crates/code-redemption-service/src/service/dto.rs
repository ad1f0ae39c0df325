//! 服务层数据传输对象
//!
//! 定义发放、兑换与查询接口的请求和结果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RedemptionError, Result};
use crate::models::{BatchStats, CodeBatch, RedemptionOutcome, UseType};

/// 单次请求允许生成的兑换码上限
pub const MAX_CODES_PER_REQUEST: usize = 100_000;

/// 名称类字段上限，与表结构对齐
const MAX_NAME_LENGTH: usize = 255;
const MAX_ID_LENGTH: usize = 128;

/// 非空且不超长的字符串字段
pub(crate) fn require_text(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RedemptionError::InvalidInput(format!("{field} 不能为空")));
    }
    if value.chars().count() > max_len {
        return Err(RedemptionError::InvalidInput(format!(
            "{field} 长度不能超过 {max_len}"
        )));
    }
    Ok(())
}

pub(crate) fn require_id(field: &str, value: &str) -> Result<()> {
    require_text(field, value, MAX_ID_LENGTH)
}

/// 创建一次性批次请求
///
/// 未指定的生成参数取服务配置中的默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSingleUseBatchRequest {
    pub benefit_id: String,
    pub name: String,
    pub num_codes: usize,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub random_length: Option<usize>,
    #[serde(default)]
    pub exclude_chars: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

impl CreateSingleUseBatchRequest {
    pub fn new(
        benefit_id: impl Into<String>,
        name: impl Into<String>,
        num_codes: usize,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            benefit_id: benefit_id.into(),
            name: name.into(),
            num_codes,
            prefix: None,
            suffix: None,
            random_length: None,
            exclude_chars: None,
            expires_at: None,
            created_by: created_by.into(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_random_length(mut self, random_length: usize) -> Self {
        self.random_length = Some(random_length);
        self
    }

    pub fn with_exclude_chars(mut self, exclude_chars: impl Into<String>) -> Self {
        self.exclude_chars = Some(exclude_chars.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_id("benefit_id", &self.benefit_id)?;
        require_text("name", &self.name, MAX_NAME_LENGTH)?;
        require_id("created_by", &self.created_by)?;
        validate_count(self.num_codes)
    }
}

/// 创建多次使用批次请求
///
/// `code` 为空时自动生成共享码
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMultiUseBatchRequest {
    pub benefit_id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub max_uses: Option<i32>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

impl CreateMultiUseBatchRequest {
    pub fn new(
        benefit_id: impl Into<String>,
        name: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            benefit_id: benefit_id.into(),
            name: name.into(),
            code: None,
            max_uses: None,
            expires_at: None,
            created_by: created_by.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_max_uses(mut self, max_uses: i32) -> Self {
        self.max_uses = Some(max_uses);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_id("benefit_id", &self.benefit_id)?;
        require_text("name", &self.name, MAX_NAME_LENGTH)?;
        require_id("created_by", &self.created_by)?;

        if let Some(max_uses) = self.max_uses.filter(|m| *m <= 0) {
            return Err(RedemptionError::InvalidInput(format!(
                "max_uses 必须大于 0: {max_uses}"
            )));
        }

        if let Some(code) = &self.code {
            require_text("code", code, MAX_ID_LENGTH)?;
            if code.trim().chars().any(char::is_whitespace) {
                return Err(RedemptionError::InvalidInput(
                    "code 中间不能包含空白字符".to_string(),
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_count(count: usize) -> Result<()> {
    if count == 0 || count > MAX_CODES_PER_REQUEST {
        return Err(RedemptionError::InvalidInput(format!(
            "兑换码数量必须在 1..={MAX_CODES_PER_REQUEST} 之间: {count}"
        )));
    }
    Ok(())
}

/// 新建一次性批次的结果，明文兑换码只在此返回一次
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedBatchDto {
    pub batch: CodeBatch,
    pub codes: Vec<String>,
}

/// 追加发放的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCodesDto {
    pub batch_id: i64,
    pub codes: Vec<String>,
}

/// 兑换结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionResult {
    pub batch_id: i64,
    pub benefit_id: String,
    pub use_type: UseType,
    pub outcome: RedemptionOutcome,
    /// 本次请求是否消耗了兑换码（或使用次数）
    pub code_consumed: bool,
    pub redeemed_at: DateTime<Utc>,
}

/// 批次概览
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOverviewDto {
    pub batch: CodeBatch,
    pub stats: BatchStats,
}
