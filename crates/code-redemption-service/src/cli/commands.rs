//! CLI 命令定义
//!
//! 使用 clap derive 宏定义命令行接口结构

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// 兑换码运维工具
///
/// 结果以 JSON 输出到 stdout，日志输出到 stderr
#[derive(Parser, Debug)]
#[command(name = "code-redemption")]
#[command(version, about = "兑换码发放与兑换工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别，覆盖配置文件 (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// 租户 schema，覆盖 database.schema
    #[arg(long, global = true, env = "ACCESS_CODE_SCHEMA")]
    pub schema: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// 子命令枚举
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 在租户 schema 中执行数据库迁移
    Migrate,

    /// 创建一次性批次并生成兑换码
    ///
    /// 明文兑换码只在本次输出中出现，之后无法从存储中恢复
    CreateSingle {
        /// 兑换后发放的权益 ID
        #[arg(short, long)]
        benefit_id: String,

        /// 批次名称
        #[arg(short, long)]
        name: String,

        /// 兑换码数量
        #[arg(short, long)]
        count: usize,

        /// 兑换码前缀
        #[arg(long)]
        prefix: Option<String>,

        /// 兑换码后缀
        #[arg(long)]
        suffix: Option<String>,

        /// 随机部分长度
        #[arg(long)]
        random_length: Option<usize>,

        /// 排除的字符
        #[arg(long)]
        exclude_chars: Option<String>,

        /// 过期时间（RFC 3339）
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,

        /// 操作人
        #[arg(long, default_value = "cli")]
        created_by: String,
    },

    /// 创建多次使用批次
    CreateMulti {
        /// 兑换后发放的权益 ID
        #[arg(short, long)]
        benefit_id: String,

        /// 批次名称
        #[arg(short, long)]
        name: String,

        /// 共享码，不指定时自动生成
        #[arg(long)]
        code: Option<String>,

        /// 最大使用次数，不指定时不限
        #[arg(long)]
        max_uses: Option<i32>,

        /// 过期时间（RFC 3339）
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,

        /// 操作人
        #[arg(long, default_value = "cli")]
        created_by: String,
    },

    /// 按批次保存的生成参数追加兑换码
    Issue {
        /// 批次 ID
        #[arg(short, long)]
        batch_id: i64,

        /// 兑换码数量
        #[arg(short, long)]
        count: usize,
    },

    /// 兑换
    Redeem {
        /// 兑换码
        code: String,

        /// 发起兑换的主体 ID
        #[arg(short, long)]
        principal_id: String,

        /// 受益人 ID
        #[arg(short = 'r', long)]
        beneficiary_id: String,
    },

    /// 查看批次详情与统计
    ShowBatch {
        /// 批次 ID
        batch_id: i64,

        /// 同时列出兑换码（仅哈希与状态）
        #[arg(long)]
        with_codes: bool,
    },

    /// 列出最近的批次
    ListBatches {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// 查看多次使用批次的兑换历史
    History {
        /// 批次 ID
        batch_id: i64,

        #[arg(short, long, default_value = "100")]
        limit: i64,
    },
}
