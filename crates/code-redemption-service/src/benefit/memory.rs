//! 内存权益账本

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{BenefitAssignment, BenefitSource};
use crate::error::{RedemptionError, Result};

/// 内存权益账本
///
/// 测试中可注入发放失败，并统计发放调用次数
#[derive(Debug, Default)]
pub struct InMemoryBenefitLedger {
    grants: DashMap<(String, String), BenefitSource>,
    assign_calls: AtomicUsize,
    fail_assign: AtomicBool,
}

impl InMemoryBenefitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入一条权益（准备测试数据）
    pub fn grant(&self, beneficiary_id: &str, benefit_id: &str, source: BenefitSource) {
        self.grants
            .insert((beneficiary_id.to_string(), benefit_id.to_string()), source);
    }

    pub fn holds(&self, beneficiary_id: &str, benefit_id: &str) -> bool {
        self.grants
            .contains_key(&(beneficiary_id.to_string(), benefit_id.to_string()))
    }

    pub fn source_of(&self, beneficiary_id: &str, benefit_id: &str) -> Option<BenefitSource> {
        self.grants
            .get(&(beneficiary_id.to_string(), benefit_id.to_string()))
            .map(|s| s.clone())
    }

    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }

    /// 发放被调用的次数（含失败与事务内发放）
    pub fn assign_calls(&self) -> usize {
        self.assign_calls.load(Ordering::SeqCst)
    }

    /// 设置后续发放是否失败
    pub fn set_fail_assign(&self, fail: bool) {
        self.fail_assign.store(fail, Ordering::SeqCst);
    }

    /// 发放前的计数与故障注入，内存消耗事务在登记待提交权益前调用
    pub(crate) fn prepare_assign(&self) -> Result<()> {
        self.assign_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_assign.load(Ordering::SeqCst) {
            return Err(RedemptionError::DependencyFailure {
                collaborator: "benefit_assignment",
                message: "权益服务不可用".to_string(),
            });
        }
        Ok(())
    }

    /// 写入权益，已持有时保留原来源，返回是否新写入
    pub(crate) fn apply_assign(
        &self,
        beneficiary_id: &str,
        benefit_id: &str,
        source: &BenefitSource,
    ) -> bool {
        let mut inserted = false;
        self.grants
            .entry((beneficiary_id.to_string(), benefit_id.to_string()))
            .or_insert_with(|| {
                inserted = true;
                source.clone()
            });
        inserted
    }
}

#[async_trait]
impl BenefitAssignment for InMemoryBenefitLedger {
    async fn has_benefit(&self, beneficiary_id: &str, benefit_id: &str) -> Result<bool> {
        Ok(self.holds(beneficiary_id, benefit_id))
    }

    async fn assign_benefit(
        &self,
        beneficiary_id: &str,
        benefit_id: &str,
        source: &BenefitSource,
    ) -> Result<()> {
        self.prepare_assign()?;
        self.apply_assign(beneficiary_id, benefit_id, source);
        Ok(())
    }
}
