//! 权益发放（PostgreSQL）

use access_code_shared::database::TenantSchema;
use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};

use super::{BenefitAssignment, BenefitSource};
use crate::error::{RedemptionError, Result};

const COLLABORATOR: &str = "benefit_assignment";

/// 写入一条权益，已持有时保留原来源，返回是否新写入
///
/// 兑换事务与直接发放共用同一条语句
pub(crate) async fn insert_grant<'e, E: PgExecutor<'e>>(
    executor: E,
    table: &str,
    beneficiary_id: &str,
    benefit_id: &str,
    source: &BenefitSource,
) -> sqlx::Result<bool> {
    let result = sqlx::query(&format!(
        r#"
        INSERT INTO {table} (beneficiary_id, benefit_id, source)
        VALUES ($1, $2, $3)
        ON CONFLICT (beneficiary_id, benefit_id) DO NOTHING
        "#
    ))
    .bind(beneficiary_id)
    .bind(benefit_id)
    .bind(source.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// 基于 principal_benefits 表的权益发放
pub struct PgBenefitAssignment {
    pool: PgPool,
    table: String,
}

impl PgBenefitAssignment {
    pub fn new(pool: PgPool, schema: &TenantSchema) -> Self {
        Self {
            pool,
            table: schema.qualify("principal_benefits"),
        }
    }
}

#[async_trait]
impl BenefitAssignment for PgBenefitAssignment {
    async fn has_benefit(&self, beneficiary_id: &str, benefit_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(&format!(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM {} WHERE beneficiary_id = $1 AND benefit_id = $2
            )
            "#,
            self.table
        ))
        .bind(beneficiary_id)
        .bind(benefit_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RedemptionError::Database(e).into_dependency(COLLABORATOR))?;

        Ok(exists)
    }

    async fn assign_benefit(
        &self,
        beneficiary_id: &str,
        benefit_id: &str,
        source: &BenefitSource,
    ) -> Result<()> {
        insert_grant(
            &self.pool,
            &self.table,
            beneficiary_id,
            benefit_id,
            source,
        )
        .await
        .map_err(|e| RedemptionError::Database(e).into_dependency(COLLABORATOR))?;

        Ok(())
    }
}
