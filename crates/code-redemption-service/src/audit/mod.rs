//! 审计备注协作方
//!
//! 兑换成功后为受益人记录一条备注。写入失败只记录日志，不影响兑换结果。

mod memory;

pub use memory::{AuditNote, InMemoryAuditLog};

use access_code_shared::database::TenantSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{RedemptionError, Result};

/// 备注分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteCategory {
    CodeRedemption,
}

impl NoteCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeRedemption => "code_redemption",
        }
    }
}

/// 审计备注接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record_note(
        &self,
        beneficiary_id: &str,
        text: &str,
        category: NoteCategory,
    ) -> Result<()>;
}

/// 基于 audit_notes 表的审计备注
pub struct PgAuditLog {
    pool: PgPool,
    table: String,
}

impl PgAuditLog {
    pub fn new(pool: PgPool, schema: &TenantSchema) -> Self {
        Self {
            pool,
            table: schema.qualify("audit_notes"),
        }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn record_note(
        &self,
        beneficiary_id: &str,
        text: &str,
        category: NoteCategory,
    ) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (beneficiary_id, category, note) VALUES ($1, $2, $3)",
            self.table
        ))
        .bind(beneficiary_id)
        .bind(category.as_str())
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(|e| RedemptionError::Database(e).into_dependency("audit_log"))?;

        Ok(())
    }
}
