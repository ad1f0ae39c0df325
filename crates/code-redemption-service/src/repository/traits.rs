//! 仓储 Trait 定义
//!
//! 服务层依赖这些抽象而非具体实现，支持 PostgreSQL、内存实现与 mock 测试

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::benefit::BenefitSource;
use crate::error::Result;
use crate::models::{
    BatchStats, Code, CodeBatch, NewCode, NewMultiUseBatch, NewRedemption, NewSingleUseBatch,
    Redemption,
};

/// 批次仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// 创建一次性批次并写入全部兑换码（同一事务，全部成功或全部失败）
    async fn create_single_use_batch(
        &self,
        batch: &NewSingleUseBatch,
        codes: &[NewCode],
    ) -> Result<CodeBatch>;

    /// 创建多次使用批次
    async fn create_multi_use_batch(&self, batch: &NewMultiUseBatch) -> Result<CodeBatch>;

    async fn get_batch(&self, id: i64) -> Result<Option<CodeBatch>>;

    /// 按创建时间倒序列出批次
    async fn list_batches(&self, limit: i64) -> Result<Vec<CodeBatch>>;

    /// 向一次性批次追加兑换码（全部成功或全部失败），返回写入数量
    async fn insert_codes(&self, batch_id: i64, codes: &[NewCode]) -> Result<u64>;

    async fn list_codes_by_batch(&self, batch_id: i64) -> Result<Vec<Code>>;

    /// 批次内已有的兑换码哈希
    async fn list_code_hashes(&self, batch_id: i64) -> Result<HashSet<String>>;

    /// 全局唯一性探测：返回给定哈希中已被一次性码或多次使用批次占用的部分
    async fn find_existing_hashes(&self, hashes: &[String]) -> Result<HashSet<String>>;

    /// 原子地增加多次使用批次的使用次数，已达上限时返回 false
    async fn increment_use_count(&self, batch_id: i64) -> Result<bool>;

    async fn batch_stats(&self, batch_id: i64) -> Result<Option<BatchStats>>;

    /// 多次使用批次的兑换记录，按时间倒序
    async fn list_redemptions(&self, batch_id: i64, limit: i64) -> Result<Vec<Redemption>>;
}

/// 兑换仓储接口
#[async_trait]
pub trait RedemptionStore: Send + Sync {
    /// 按哈希查找一次性兑换码（任意状态）
    async fn find_code_by_hash(&self, code_hash: &str) -> Result<Option<Code>>;

    /// 按哈希查找多次使用批次
    async fn find_multi_use_batch_by_hash(&self, code_hash: &str) -> Result<Option<CodeBatch>>;

    /// 开启消耗事务
    async fn begin(&self) -> Result<Box<dyn ConsumptionTx>>;
}

/// 兑换码消耗事务
///
/// 所有消耗都是带条件的单语句更新，权益发放与消耗在同一事务内；
/// 未提交即丢弃时自动回滚，回滚后不留下任何消耗或权益
#[async_trait]
pub trait ConsumptionTx: Send {
    /// available -> redeemed，码已被兑换时返回 false
    async fn claim_code(
        &mut self,
        code_hash: &str,
        principal_id: &str,
        beneficiary_id: &str,
        redeemed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// use_count + 1（受 max_uses 约束），已达上限时返回 false
    async fn consume_use(&mut self, batch_id: i64) -> Result<bool>;

    /// 追加多次使用兑换记录，返回记录 ID
    async fn append_redemption(&mut self, redemption: &NewRedemption) -> Result<i64>;

    /// 在同一事务内发放权益，已持有时不覆盖来源，返回是否新写入
    async fn grant_benefit(
        &mut self,
        beneficiary_id: &str,
        benefit_id: &str,
        source: &BenefitSource,
    ) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
