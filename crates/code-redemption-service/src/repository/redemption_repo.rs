//! 兑换仓储（PostgreSQL）
//!
//! 兑换码查找与消耗事务。消耗使用带条件的单语句 UPDATE，
//! 并发请求中只有一个能让影响行数为 1。

use access_code_shared::database::TenantSchema;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::traits::{ConsumptionTx, RedemptionStore};
use super::{BATCH_COLUMNS, CODE_COLUMNS, Tables};
use crate::benefit::{BenefitSource, insert_grant};
use crate::error::Result;
use crate::models::{Code, CodeBatch, NewRedemption};

/// 兑换仓储
pub struct RedemptionRepository {
    pool: PgPool,
    tables: Tables,
}

impl RedemptionRepository {
    pub fn new(pool: PgPool, schema: &TenantSchema) -> Self {
        Self {
            pool,
            tables: Tables::new(schema),
        }
    }
}

#[async_trait]
impl RedemptionStore for RedemptionRepository {
    async fn find_code_by_hash(&self, code_hash: &str) -> Result<Option<Code>> {
        let code = sqlx::query_as::<_, Code>(&format!(
            "SELECT {CODE_COLUMNS} FROM {} WHERE code_hash = $1",
            self.tables.codes
        ))
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(code)
    }

    async fn find_multi_use_batch_by_hash(&self, code_hash: &str) -> Result<Option<CodeBatch>> {
        let batch = sqlx::query_as::<_, CodeBatch>(&format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM {}
            WHERE code_hash = $1 AND use_type = 'multi_use'
            "#,
            self.tables.batches
        ))
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(batch)
    }

    async fn begin(&self) -> Result<Box<dyn ConsumptionTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgConsumptionTx {
            tx,
            tables: self.tables.clone(),
        }))
    }
}

/// PostgreSQL 消耗事务
///
/// 未提交即丢弃时 sqlx 会回滚底层事务
pub struct PgConsumptionTx {
    tx: Transaction<'static, Postgres>,
    tables: Tables,
}

#[async_trait]
impl ConsumptionTx for PgConsumptionTx {
    async fn claim_code(
        &mut self,
        code_hash: &str,
        principal_id: &str,
        beneficiary_id: &str,
        redeemed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET status = 'redeemed',
                redeemed_at = $2,
                redeemed_by_principal_id = $3,
                redeemed_for_beneficiary_id = $4
            WHERE code_hash = $1 AND status = 'available'
            "#,
            self.tables.codes
        ))
        .bind(code_hash)
        .bind(redeemed_at)
        .bind(principal_id)
        .bind(beneficiary_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn consume_use(&mut self, batch_id: i64) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET use_count = use_count + 1
            WHERE id = $1
              AND use_type = 'multi_use'
              AND (max_uses IS NULL OR use_count < max_uses)
            "#,
            self.tables.batches
        ))
        .bind(batch_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_redemption(&mut self, redemption: &NewRedemption) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(&format!(
            r#"
            INSERT INTO {} (batch_id, principal_id, beneficiary_id, redeemed_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
            self.tables.redemptions
        ))
        .bind(redemption.batch_id)
        .bind(&redemption.principal_id)
        .bind(&redemption.beneficiary_id)
        .bind(redemption.redeemed_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn grant_benefit(
        &mut self,
        beneficiary_id: &str,
        benefit_id: &str,
        source: &BenefitSource,
    ) -> Result<bool> {
        let granted = insert_grant(
            &mut *self.tx,
            &self.tables.benefits,
            beneficiary_id,
            benefit_id,
            source,
        )
        .await?;

        Ok(granted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}
