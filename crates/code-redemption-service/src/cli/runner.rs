//! 命令执行器
//!
//! 将命令行参数转化为服务调用，结果以 JSON 输出

use std::sync::Arc;

use access_code_shared::config::RedemptionConfig;
use access_code_shared::database::{Database, TenantSchema};
use access_code_shared::retry::{RetryPolicy, retry_with_policy};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::commands::Commands;
use crate::MIGRATOR;
use crate::audit::PgAuditLog;
use crate::benefit::PgBenefitAssignment;
use crate::codegen::CodeGenerator;
use crate::error::RedemptionError;
use crate::repository::{BatchRepository, RedemptionRepository};
use crate::service::{
    BatchQueryService, CodeIssuer, CreateMultiUseBatchRequest, CreateSingleUseBatchRequest,
    IssuerSettings, RedemptionEngine,
};

/// 命令执行器
///
/// 持有数据库连接与按租户 schema 构造的各服务
pub struct CommandRunner {
    database: Database,
    schema: TenantSchema,
    issuer: CodeIssuer,
    engine: RedemptionEngine,
    queries: BatchQueryService,
    retry_policy: RetryPolicy,
}

impl CommandRunner {
    pub fn new(database: Database, schema: TenantSchema, config: &RedemptionConfig) -> Self {
        let pool = database.pool().clone();
        let batches = Arc::new(BatchRepository::new(pool.clone(), &schema));
        let redemptions = Arc::new(RedemptionRepository::new(pool.clone(), &schema));
        let benefits = Arc::new(PgBenefitAssignment::new(pool.clone(), &schema));
        let audit = Arc::new(PgAuditLog::new(pool, &schema));

        let issuer = CodeIssuer::new(batches.clone(), CodeGenerator::os())
            .with_settings(IssuerSettings::from(config));
        let engine = RedemptionEngine::new(batches.clone(), redemptions, benefits, audit)
            .with_policy(config.already_entitled);
        let queries = BatchQueryService::new(batches);

        Self {
            database,
            schema,
            issuer,
            engine,
            queries,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// 设置 redeem 子命令的重试策略
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// 执行子命令
    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Migrate => {
                self.database
                    .run_migrations(&MIGRATOR, &self.schema)
                    .await
                    .context("数据库迁移失败")?;
                print_json(&json!({ "schema": self.schema.as_str(), "migrated": true }))
            }
            Commands::CreateSingle {
                benefit_id,
                name,
                count,
                prefix,
                suffix,
                random_length,
                exclude_chars,
                expires_at,
                created_by,
            } => {
                let request = CreateSingleUseBatchRequest {
                    benefit_id,
                    name,
                    num_codes: count,
                    prefix,
                    suffix,
                    random_length,
                    exclude_chars,
                    expires_at,
                    created_by,
                };
                let issued = self.issuer.create_single_use_batch(request).await?;
                print_json(&issued)
            }
            Commands::CreateMulti {
                benefit_id,
                name,
                code,
                max_uses,
                expires_at,
                created_by,
            } => {
                let request = CreateMultiUseBatchRequest {
                    benefit_id,
                    name,
                    code,
                    max_uses,
                    expires_at,
                    created_by,
                };
                let batch = self.issuer.create_multi_use_batch(request).await?;
                print_json(&batch)
            }
            Commands::Issue { batch_id, count } => {
                let issued = self.issuer.issue_for_batch(batch_id, count).await?;
                print_json(&issued)
            }
            Commands::Redeem {
                code,
                principal_id,
                beneficiary_id,
            } => {
                // 兑换对同一受益人幂等，可重试错误直接重放
                let result = retry_with_policy(
                    &self.retry_policy,
                    "redeem",
                    RedemptionError::is_retryable,
                    || self.engine.redeem(&code, &principal_id, &beneficiary_id),
                )
                .await?;
                print_json(&result)
            }
            Commands::ShowBatch {
                batch_id,
                with_codes,
            } => {
                let overview = self.queries.batch_overview(batch_id).await?;
                if with_codes {
                    let codes = self.queries.list_codes(batch_id).await?;
                    print_json(&json!({ "overview": overview, "codes": codes }))
                } else {
                    print_json(&overview)
                }
            }
            Commands::ListBatches { limit } => {
                let batches = self.queries.list_batches(limit).await?;
                print_json(&batches)
            }
            Commands::History { batch_id, limit } => {
                let history = self.queries.redemption_history(batch_id, limit).await?;
                print_json(&history)
            }
        }
    }

    /// 关闭连接池
    pub async fn shutdown(&self) {
        self.database.close().await;
        info!("数据库连接已关闭");
    }
}

/// 业务错误的 JSON 表示
pub fn error_json(err: &RedemptionError) -> serde_json::Value {
    json!({
        "error": err.error_code(),
        "message": err.to_string(),
        "retryable": err.is_retryable(),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("结果序列化失败")?;
    println!("{output}");
    Ok(())
}
