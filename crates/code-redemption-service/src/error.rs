//! 兑换码服务错误类型
//!
//! 区分校验错误、兑换业务结果（无效、过期、已用尽、已被兑换）与系统故障，
//! 调用方据此决定是否重试、如何提示用户。

use thiserror::Error;

/// 兑换码服务错误类型
#[derive(Debug, Error)]
pub enum RedemptionError {
    // === 校验错误 ===
    #[error("参数校验失败: {0}")]
    InvalidInput(String),

    // === 兑换结果 ===
    #[error("兑换码无效")]
    InvalidCode,

    #[error("兑换码已过期: batch_id={batch_id}")]
    Expired { batch_id: i64 },

    #[error("兑换码使用次数已达上限: batch_id={batch_id}")]
    UseLimitExceeded { batch_id: i64 },

    #[error("兑换码已被使用")]
    AlreadyRedeemed,

    // === 批次与生成 ===
    #[error("兑换码批次不存在: {0}")]
    BatchNotFound(i64),

    #[error("兑换码生成重试耗尽: 需要 {requested}, 已生成 {generated}, 尝试 {attempts} 次")]
    ExhaustedRetries {
        requested: usize,
        generated: usize,
        attempts: usize,
    },

    /// 写入时与已有兑换码哈希冲突（并发发放竞争）
    #[error("兑换码哈希冲突")]
    HashConflict,

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("外部依赖调用失败: {collaborator}: {message}")]
    DependencyFailure {
        collaborator: &'static str,
        message: String,
    },

    #[error("安全随机源不可用: {0}")]
    RandomSource(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 兑换码服务 Result 类型别名
pub type Result<T> = std::result::Result<T, RedemptionError>;

impl RedemptionError {
    /// 将 sqlx 错误映射为领域错误，唯一约束冲突单独识别为 `HashConflict`
    pub fn from_write(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => Self::HashConflict,
            other => Self::Database(other),
        }
    }

    /// 包装为外部依赖失败，已是依赖失败的保持原样
    pub fn into_dependency(self, collaborator: &'static str) -> Self {
        match self {
            Self::DependencyFailure { .. } => self,
            other => Self::DependencyFailure {
                collaborator,
                message: other.to_string(),
            },
        }
    }

    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Storage(_) | Self::DependencyFailure { .. }
        )
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::InvalidCode
                | Self::Expired { .. }
                | Self::UseLimitExceeded { .. }
                | Self::AlreadyRedeemed
                | Self::BatchNotFound(_)
                | Self::ExhaustedRetries { .. }
        )
    }

    /// 并发竞争失败（另一请求先完成了消耗），属于预期结果
    pub fn is_race_loss(&self) -> bool {
        matches!(self, Self::AlreadyRedeemed | Self::UseLimitExceeded { .. })
    }

    /// 存储层写入或提交失败
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Storage(_))
    }

    /// 获取错误码（用于 CLI 输出与指标标签）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidCode => "INVALID_CODE",
            Self::Expired { .. } => "EXPIRED",
            Self::UseLimitExceeded { .. } => "USE_LIMIT_EXCEEDED",
            Self::AlreadyRedeemed => "ALREADY_REDEEMED",
            Self::BatchNotFound(_) => "BATCH_NOT_FOUND",
            Self::ExhaustedRetries { .. } => "EXHAUSTED_RETRIES",
            Self::HashConflict => "HASH_CONFLICT",
            Self::Database(_) | Self::Storage(_) => "PERSISTENCE_FAILURE",
            Self::DependencyFailure { .. } => "DEPENDENCY_FAILURE",
            Self::RandomSource(_) => "RANDOM_SOURCE_FAILURE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 指标中的 outcome 标签
    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidCode => "invalid_code",
            Self::Expired { .. } => "expired",
            Self::UseLimitExceeded { .. } => "use_limit_exceeded",
            Self::AlreadyRedeemed => "already_redeemed",
            Self::DependencyFailure { .. } => "dependency_failure",
            Self::Database(_) | Self::Storage(_) => "persistence_failure",
            _ => "error",
        }
    }
}
