//! 批次仓储（PostgreSQL）
//!
//! 所有表名在构造时按租户 schema 限定

use std::collections::HashSet;

use access_code_shared::database::TenantSchema;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use super::traits::BatchStore;
use super::{BATCH_COLUMNS, CODE_COLUMNS, Tables};
use crate::error::{RedemptionError, Result};
use crate::models::{
    BatchStats, Code, CodeBatch, NewCode, NewMultiUseBatch, NewSingleUseBatch, Redemption,
    UseType,
};

/// 批次仓储
pub struct BatchRepository {
    pool: PgPool,
    tables: Tables,
}

impl BatchRepository {
    pub fn new(pool: PgPool, schema: &TenantSchema) -> Self {
        Self {
            pool,
            tables: Tables::new(schema),
        }
    }

    /// 在事务中批量写入兑换码
    ///
    /// 哈希唯一约束冲突映射为 `HashConflict`
    async fn insert_codes_in_tx(
        tx: &mut PgConnection,
        codes_table: &str,
        batch_id: i64,
        codes: &[NewCode],
    ) -> Result<u64> {
        let hashes: Vec<String> = codes.iter().map(|c| c.code_hash.clone()).collect();

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {codes_table} (batch_id, code_hash)
            SELECT $1, h FROM UNNEST($2::text[]) AS t(h)
            "#
        ))
        .bind(batch_id)
        .bind(&hashes)
        .execute(tx)
        .await
        .map_err(RedemptionError::from_write)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BatchStore for BatchRepository {
    async fn create_single_use_batch(
        &self,
        batch: &NewSingleUseBatch,
        codes: &[NewCode],
    ) -> Result<CodeBatch> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, CodeBatch>(&format!(
            r#"
            INSERT INTO {} (benefit_id, name, use_type, num_codes, code_prefix, code_suffix,
                            random_length, exclude_chars, expires_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {BATCH_COLUMNS}
            "#,
            self.tables.batches
        ))
        .bind(&batch.benefit_id)
        .bind(&batch.name)
        .bind(UseType::SingleUse)
        .bind(batch.num_codes)
        .bind(&batch.code_prefix)
        .bind(&batch.code_suffix)
        .bind(batch.random_length)
        .bind(&batch.exclude_chars)
        .bind(batch.expires_at)
        .bind(&batch.created_by)
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_codes_in_tx(&mut tx, &self.tables.codes, created.id, codes).await?;
        tx.commit().await?;

        debug!(batch_id = created.id, codes = codes.len(), "一次性批次已写入");
        Ok(created)
    }

    async fn create_multi_use_batch(&self, batch: &NewMultiUseBatch) -> Result<CodeBatch> {
        let created = sqlx::query_as::<_, CodeBatch>(&format!(
            r#"
            INSERT INTO {} (benefit_id, name, use_type, code_hash, code_plain, max_uses,
                            expires_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {BATCH_COLUMNS}
            "#,
            self.tables.batches
        ))
        .bind(&batch.benefit_id)
        .bind(&batch.name)
        .bind(UseType::MultiUse)
        .bind(&batch.code_hash)
        .bind(&batch.code_plain)
        .bind(batch.max_uses)
        .bind(batch.expires_at)
        .bind(&batch.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(RedemptionError::from_write)?;

        Ok(created)
    }

    async fn get_batch(&self, id: i64) -> Result<Option<CodeBatch>> {
        let batch = sqlx::query_as::<_, CodeBatch>(&format!(
            "SELECT {BATCH_COLUMNS} FROM {} WHERE id = $1",
            self.tables.batches
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(batch)
    }

    async fn list_batches(&self, limit: i64) -> Result<Vec<CodeBatch>> {
        let batches = sqlx::query_as::<_, CodeBatch>(&format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM {}
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
            self.tables.batches
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(batches)
    }

    async fn insert_codes(&self, batch_id: i64, codes: &[NewCode]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        // 锁定批次行，与并发追加串行化 num_codes 的更新
        let use_type: Option<UseType> = sqlx::query_scalar(&format!(
            "SELECT use_type FROM {} WHERE id = $1 FOR UPDATE",
            self.tables.batches
        ))
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await?;

        match use_type {
            None => return Err(RedemptionError::BatchNotFound(batch_id)),
            Some(UseType::MultiUse) => {
                return Err(RedemptionError::InvalidInput(format!(
                    "多次使用批次不能追加兑换码: batch_id={batch_id}"
                )));
            }
            Some(UseType::SingleUse) => {}
        }

        let inserted = Self::insert_codes_in_tx(&mut tx, &self.tables.codes, batch_id, codes).await?;

        sqlx::query(&format!(
            "UPDATE {} SET num_codes = COALESCE(num_codes, 0) + $2 WHERE id = $1",
            self.tables.batches
        ))
        .bind(batch_id)
        .bind(inserted as i32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_codes_by_batch(&self, batch_id: i64) -> Result<Vec<Code>> {
        let codes = sqlx::query_as::<_, Code>(&format!(
            "SELECT {CODE_COLUMNS} FROM {} WHERE batch_id = $1 ORDER BY id ASC",
            self.tables.codes
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    async fn list_code_hashes(&self, batch_id: i64) -> Result<HashSet<String>> {
        let hashes: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT code_hash FROM {} WHERE batch_id = $1",
            self.tables.codes
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(hashes.into_iter().collect())
    }

    async fn find_existing_hashes(&self, hashes: &[String]) -> Result<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }

        let existing: Vec<String> = sqlx::query_scalar(&format!(
            r#"
            SELECT code_hash FROM {} WHERE code_hash = ANY($1)
            UNION
            SELECT code_hash FROM {} WHERE code_hash = ANY($1)
            "#,
            self.tables.codes, self.tables.batches
        ))
        .bind(hashes)
        .fetch_all(&self.pool)
        .await?;

        Ok(existing.into_iter().collect())
    }

    async fn increment_use_count(&self, batch_id: i64) -> Result<bool> {
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
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn batch_stats(&self, batch_id: i64) -> Result<Option<BatchStats>> {
        let stats = sqlx::query_as::<_, BatchStats>(&format!(
            r#"
            SELECT b.id AS batch_id,
                   b.use_type,
                   COUNT(c.id) AS total_codes,
                   COUNT(c.id) FILTER (WHERE c.status = 'available') AS available_codes,
                   COUNT(c.id) FILTER (WHERE c.status = 'redeemed') AS redeemed_codes,
                   b.use_count,
                   b.max_uses
            FROM {} b
            LEFT JOIN {} c ON c.batch_id = b.id
            WHERE b.id = $1
            GROUP BY b.id
            "#,
            self.tables.batches, self.tables.codes
        ))
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn list_redemptions(&self, batch_id: i64, limit: i64) -> Result<Vec<Redemption>> {
        let redemptions = sqlx::query_as::<_, Redemption>(&format!(
            r#"
            SELECT id, batch_id, principal_id, beneficiary_id, redeemed_at
            FROM {}
            WHERE batch_id = $1
            ORDER BY redeemed_at DESC, id DESC
            LIMIT $2
            "#,
            self.tables.redemptions
        ))
        .bind(batch_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(redemptions)
    }
}
