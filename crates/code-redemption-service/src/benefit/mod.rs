//! 权益发放协作方
//!
//! 兑换成功后为受益人发放批次关联的权益。实现需保证幂等：
//! 对同一受益人与权益重复调用不会产生第二份权益。
//! 兑换流程中的发放由消耗事务完成（见 `ConsumptionTx::grant_benefit`），
//! 与码的消耗一起提交或回滚。

mod memory;
mod pg;

pub use memory::InMemoryBenefitLedger;
pub use pg::PgBenefitAssignment;
pub(crate) use pg::insert_grant;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::UseType;

/// 权益来源
///
/// 记录权益是通过哪个兑换码批次获得的
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenefitSource {
    pub batch_id: i64,
    pub batch_name: String,
    pub use_type: UseType,
}

impl fmt::Display for BenefitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "access_code:{}:{}", self.use_type.as_str(), self.batch_id)
    }
}

/// 权益发放接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BenefitAssignment: Send + Sync {
    /// 受益人是否已持有该权益
    async fn has_benefit(&self, beneficiary_id: &str, benefit_id: &str) -> Result<bool>;

    /// 直接发放权益（幂等），不经过兑换事务
    async fn assign_benefit(
        &self,
        beneficiary_id: &str,
        benefit_id: &str,
        source: &BenefitSource,
    ) -> Result<()>;
}
