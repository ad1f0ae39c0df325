//! CLI 模块
//!
//! 运维命令行，直接驱动发放与兑换服务：
//!
//! - `migrate` - 在租户 schema 中执行数据库迁移
//! - `create-single` / `create-multi` - 创建批次
//! - `issue` - 向一次性批次追加兑换码
//! - `redeem` - 兑换
//! - `show-batch` / `list-batches` / `history` - 查询
//!
//! # 使用示例
//!
//! ```bash
//! code-redemption migrate
//! code-redemption create-single -b membership-gold -n "新会员礼包" -c 100 --prefix VIP-
//! code-redemption create-multi -b membership-gold -n "直播口令" --code LIVE2025 --max-uses 500
//! code-redemption redeem VIP-AbCdEfGh -p user-001 -r contact-001
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;
