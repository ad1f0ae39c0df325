//! 服务层
//!
//! 实现兑换码业务逻辑，协调仓储层与协作方。
//!
//! ## 模块结构
//!
//! - `dto`: 数据传输对象定义
//! - `issuer`: 批次创建与兑换码发放
//! - `redemption_engine`: 兑换
//! - `query_service`: 批次查询（只读操作）

pub mod dto;
pub mod issuer;
pub mod query_service;
pub mod redemption_engine;

pub use dto::*;
pub use issuer::{CodeIssuer, IssuerSettings};
pub use query_service::BatchQueryService;
pub use redemption_engine::RedemptionEngine;
