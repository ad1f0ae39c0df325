//! 数据库连接管理模块
//!
//! 提供 PostgreSQL 连接池管理、租户 schema 句柄、健康检查与迁移执行。

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};
use regex::Regex;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, instrument};

/// 合法的 schema 名称：小写字母或下划线开头，最长 63 字节
static SCHEMA_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("schema 名称正则是常量")
});

/// 租户 schema 句柄
///
/// 多租户部署下每个租户的数据位于独立 schema。仓储在构造时接收该句柄，
/// 并用它限定所有表名，不依赖进程级全局状态。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantSchema(String);

impl TenantSchema {
    /// 校验并创建 schema 句柄
    ///
    /// 只接受小写标识符（字母或下划线开头，最长 63 字节），
    /// 因为名称会被直接拼接进 SQL。
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !SCHEMA_NAME.is_match(&name) {
            return Err(SharedError::InvalidSchema(name));
        }
        Ok(Self(name))
    }

    /// 默认 public schema
    pub fn public() -> Self {
        Self("public".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 生成带 schema 前缀的表名，如 `tenant_a.code_batches`
    pub fn qualify(&self, table: &str) -> String {
        format!("{}.{}", self.0, table)
    }
}

impl Default for TenantSchema {
    fn default() -> Self {
        Self::public()
    }
}

impl fmt::Display for TenantSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 数据库连接池包装
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 创建数据库连接池
    ///
    /// `statement_timeout_ms` 大于 0 时作为连接级运行参数下发，
    /// 兑换流程不再额外设置超时。
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut options: PgConnectOptions = config.url.parse()?;
        if config.statement_timeout_ms > 0 {
            options = options.options([(
                "statement_timeout",
                config.statement_timeout_ms.to_string(),
            )]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect_with(options)
            .await?;

        info!("Database connection pool created");

        Ok(Self { pool })
    }

    /// 基于已有连接池构建（测试用）
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(SharedError::from)
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }

    /// 在租户 schema 内运行迁移
    ///
    /// 迁移脚本不带 schema 前缀，这里在单个连接上切换 search_path 后执行，
    /// 迁移记录表也因此按租户隔离。执行完成后重置 search_path 再归还连接。
    #[instrument(skip(self, migrator), fields(schema = %schema))]
    pub async fn run_migrations(&self, migrator: &Migrator, schema: &TenantSchema) -> Result<()> {
        info!("Running database migrations...");

        let mut conn = self.pool.acquire().await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&mut *conn)
            .await?;
        sqlx::query(&format!("SET search_path TO {}", schema))
            .execute(&mut *conn)
            .await?;

        let outcome = migrator.run(&mut *conn).await;

        sqlx::query("RESET search_path").execute(&mut *conn).await?;
        outcome?;

        info!("Database migrations completed");
        Ok(())
    }
}

impl std::ops::Deref for Database {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_schema_validation() {
        assert!(TenantSchema::new("tenant_acme").is_ok());
        assert!(TenantSchema::new("_t1").is_ok());

        assert!(TenantSchema::new("").is_err());
        assert!(TenantSchema::new("1tenant").is_err());
        assert!(TenantSchema::new("Tenant").is_err());
        assert!(TenantSchema::new("tenant; DROP TABLE codes").is_err());
        assert!(TenantSchema::new("a".repeat(64)).is_err());
    }

    #[test]
    fn test_tenant_schema_pattern_shared_across_calls() {
        // 正则只编译一次，并发构造得到一致的结果
        let handles: Vec<_> = (0..8)
            .map(|i| {
                std::thread::spawn(move || {
                    (
                        TenantSchema::new(format!("tenant_{i}")).is_ok(),
                        TenantSchema::new(format!("Tenant_{i}")).is_err(),
                    )
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), (true, true));
        }
        assert!(TenantSchema::new("a".repeat(63)).is_ok());
        assert!(LazyLock::force(&SCHEMA_NAME).is_match("tenant_acme"));
    }

    #[test]
    fn test_tenant_schema_qualify() {
        let schema = TenantSchema::new("tenant_acme").unwrap();
        assert_eq!(schema.qualify("codes"), "tenant_acme.codes");
        assert_eq!(TenantSchema::default().qualify("codes"), "public.codes");
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_database_connection() {
        let config = DatabaseConfig::default();
        let db = Database::connect(&config).await.unwrap();
        db.health_check().await.unwrap();
    }
}
