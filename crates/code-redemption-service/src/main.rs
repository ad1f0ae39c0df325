//! 兑换码运维 CLI
//!
//! 加载配置、初始化日志，连接租户 schema 后执行子命令

use clap::Parser;

use access_code_shared::config::AppConfig;
use access_code_shared::database::{Database, TenantSchema};
use access_code_shared::observability;
use access_code_shared::retry::RetryPolicy;
use code_redemption::RedemptionError;
use code_redemption::cli::runner::error_json;
use code_redemption::cli::{Cli, CommandRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load("code-redemption")?;
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    observability::init(&config.observability)?;

    // schema 只在启动时读取一次，作为构造参数传入各仓储
    let schema = TenantSchema::new(
        cli.schema
            .clone()
            .unwrap_or_else(|| config.database.schema.clone()),
    )?;
    let database = Database::connect(&config.database).await?;

    let runner = CommandRunner::new(database, schema, &config.redemption)
        .with_retry_policy(RetryPolicy::from(&config.retry));
    let result = runner.run(cli.command).await;
    runner.shutdown().await;

    if let Err(err) = &result {
        if let Some(redemption_err) = err.downcast_ref::<RedemptionError>() {
            println!("{}", error_json(redemption_err));
        }
    }
    result
}
