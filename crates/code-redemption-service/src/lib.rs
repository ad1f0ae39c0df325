//! 兑换码发放与兑换
//!
//! 为会员权益生成不可猜测的兑换码，并以并发安全的方式兑换：
//! 一次性兑换码最多成功兑换一次，多次使用兑换码不超过使用上限，
//! 兑换成功后通过协作方为受益人发放权益并记录审计备注。
//!
//! ## 模块结构
//!
//! - `codegen`: 字符表、安全随机源、生成器与哈希
//! - `models`: 批次、兑换码与兑换记录
//! - `repository`: 存储接口与 PostgreSQL / 内存实现
//! - `benefit` / `audit`: 协作方接口与实现
//! - `service`: 发放、兑换与查询服务
//! - `cli`: 运维命令行

pub mod audit;
pub mod benefit;
pub mod cli;
pub mod codegen;
pub mod error;
pub mod models;
pub mod repository;
pub mod service;

pub use error::{RedemptionError, Result};

/// 内嵌的数据库迁移
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");
