//! 内存存储
//!
//! 使用 DashMap 实现的并发安全存储，适用于测试和单进程嵌入场景。
//! 事务对触及的兑换码或批次加行锁，修改只记录为待提交操作，
//! 提交时一次性写入后释放行锁；回滚或丢弃时直接放弃。
//! 其他事务在行锁上等待，不会看到未提交的消耗。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use super::traits::{BatchStore, ConsumptionTx, RedemptionStore};
use crate::benefit::{BenefitSource, InMemoryBenefitLedger};
use crate::error::{RedemptionError, Result};
use crate::models::{
    BatchStats, Code, CodeBatch, CodeStatus, NewCode, NewMultiUseBatch, NewRedemption,
    NewSingleUseBatch, Redemption, UseType,
};

/// 行锁的粒度：一次性码按哈希，多次使用批次按 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Code(String),
    Batch(i64),
}

#[derive(Debug, Default)]
struct MemoryInner {
    batches: DashMap<i64, CodeBatch>,
    /// code_hash -> 一次性兑换码
    codes: DashMap<String, Code>,
    /// code_hash -> 多次使用批次 ID
    batch_hashes: DashMap<String, i64>,
    redemptions: DashMap<i64, Redemption>,
    next_batch_id: AtomicI64,
    next_code_id: AtomicI64,
    next_redemption_id: AtomicI64,
    /// 写入兑换码时串行化唯一性检查与插入
    issuance: Mutex<()>,
    row_locks: DashMap<RowKey, Arc<tokio::sync::Mutex<()>>>,
    fail_next_commit: AtomicBool,
}

impl MemoryInner {
    fn hash_taken(&self, code_hash: &str) -> bool {
        self.codes.contains_key(code_hash) || self.batch_hashes.contains_key(code_hash)
    }

    /// 调用方需持有 issuance 锁
    fn insert_codes_locked(&self, batch_id: i64, codes: &[NewCode]) -> Result<u64> {
        let mut seen = HashSet::with_capacity(codes.len());
        for code in codes {
            if self.hash_taken(&code.code_hash) || !seen.insert(code.code_hash.as_str()) {
                return Err(RedemptionError::HashConflict);
            }
        }

        let now = Utc::now();
        for code in codes {
            let id = self.next_code_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.codes.insert(
                code.code_hash.clone(),
                Code {
                    id,
                    batch_id,
                    code_hash: code.code_hash.clone(),
                    status: CodeStatus::Available,
                    redeemed_at: None,
                    redeemed_by_principal_id: None,
                    redeemed_for_beneficiary_id: None,
                    created_at: now,
                },
            );
        }
        Ok(codes.len() as u64)
    }

    /// 等待并持有行锁，直到返回的守卫被丢弃
    async fn lock_row(&self, key: RowKey) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(&self.row_locks.entry(key).or_default());
        lock.lock_owned().await
    }

    fn consume_use(&self, batch_id: i64) -> bool {
        match self.batches.get_mut(&batch_id) {
            Some(mut batch) if batch.use_type == UseType::MultiUse && batch.has_remaining_uses() => {
                batch.use_count += 1;
                true
            }
            _ => false,
        }
    }
}

/// 内存兑换码存储
///
/// 同时实现 `BatchStore` 与 `RedemptionStore`，克隆后共享同一份数据。
/// 兑换事务内的权益发放写入自带的权益账本。
#[derive(Debug, Clone, Default)]
pub struct MemoryCodeStore {
    inner: Arc<MemoryInner>,
    benefits: Arc<InMemoryBenefitLedger>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 兑换事务写入的权益账本，也可作为 `BenefitAssignment` 交给引擎
    pub fn benefits(&self) -> Arc<InMemoryBenefitLedger> {
        Arc::clone(&self.benefits)
    }

    /// 让下一次事务提交失败（测试提交失败路径）
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// 按哈希读取兑换码
    pub fn code(&self, code_hash: &str) -> Option<Code> {
        self.inner.codes.get(code_hash).map(|c| c.clone())
    }

    /// 兑换码总数
    pub fn code_count(&self) -> usize {
        self.inner.codes.len()
    }

    /// 兑换记录总数
    pub fn redemption_count(&self) -> usize {
        self.inner.redemptions.len()
    }
}

#[async_trait]
impl BatchStore for MemoryCodeStore {
    async fn create_single_use_batch(
        &self,
        batch: &NewSingleUseBatch,
        codes: &[NewCode],
    ) -> Result<CodeBatch> {
        let _guard = self.inner.issuance.lock();

        let id = self.inner.next_batch_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = CodeBatch {
            id,
            benefit_id: batch.benefit_id.clone(),
            name: batch.name.clone(),
            use_type: UseType::SingleUse,
            num_codes: Some(batch.num_codes),
            code_prefix: Some(batch.code_prefix.clone()),
            code_suffix: Some(batch.code_suffix.clone()),
            random_length: Some(batch.random_length),
            exclude_chars: Some(batch.exclude_chars.clone()),
            code_hash: None,
            code_plain: None,
            max_uses: None,
            use_count: 0,
            expires_at: batch.expires_at,
            created_by: batch.created_by.clone(),
            created_at: Utc::now(),
        };

        // 兑换码冲突时批次也不落库
        self.inner.insert_codes_locked(id, codes)?;
        self.inner.batches.insert(id, created.clone());
        Ok(created)
    }

    async fn create_multi_use_batch(&self, batch: &NewMultiUseBatch) -> Result<CodeBatch> {
        let _guard = self.inner.issuance.lock();

        if self.inner.hash_taken(&batch.code_hash) {
            return Err(RedemptionError::HashConflict);
        }

        let id = self.inner.next_batch_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = CodeBatch {
            id,
            benefit_id: batch.benefit_id.clone(),
            name: batch.name.clone(),
            use_type: UseType::MultiUse,
            num_codes: None,
            code_prefix: None,
            code_suffix: None,
            random_length: None,
            exclude_chars: None,
            code_hash: Some(batch.code_hash.clone()),
            code_plain: Some(batch.code_plain.clone()),
            max_uses: batch.max_uses,
            use_count: 0,
            expires_at: batch.expires_at,
            created_by: batch.created_by.clone(),
            created_at: Utc::now(),
        };

        self.inner.batch_hashes.insert(batch.code_hash.clone(), id);
        self.inner.batches.insert(id, created.clone());
        Ok(created)
    }

    async fn get_batch(&self, id: i64) -> Result<Option<CodeBatch>> {
        Ok(self.inner.batches.get(&id).map(|b| b.clone()))
    }

    async fn list_batches(&self, limit: i64) -> Result<Vec<CodeBatch>> {
        let mut batches: Vec<CodeBatch> = self
            .inner
            .batches
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        batches.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(batches)
    }

    async fn insert_codes(&self, batch_id: i64, codes: &[NewCode]) -> Result<u64> {
        let _guard = self.inner.issuance.lock();

        let use_type = self
            .inner
            .batches
            .get(&batch_id)
            .map(|b| b.use_type)
            .ok_or(RedemptionError::BatchNotFound(batch_id))?;
        if use_type == UseType::MultiUse {
            return Err(RedemptionError::InvalidInput(format!(
                "多次使用批次不能追加兑换码: batch_id={batch_id}"
            )));
        }

        let inserted = self.inner.insert_codes_locked(batch_id, codes)?;
        if let Some(mut batch) = self.inner.batches.get_mut(&batch_id) {
            batch.num_codes = Some(batch.num_codes.unwrap_or(0) + inserted as i32);
        }
        Ok(inserted)
    }

    async fn list_codes_by_batch(&self, batch_id: i64) -> Result<Vec<Code>> {
        let mut codes: Vec<Code> = self
            .inner
            .codes
            .iter()
            .filter(|entry| entry.batch_id == batch_id)
            .map(|entry| entry.value().clone())
            .collect();
        codes.sort_by_key(|c| c.id);
        Ok(codes)
    }

    async fn list_code_hashes(&self, batch_id: i64) -> Result<HashSet<String>> {
        Ok(self
            .inner
            .codes
            .iter()
            .filter(|entry| entry.batch_id == batch_id)
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn find_existing_hashes(&self, hashes: &[String]) -> Result<HashSet<String>> {
        Ok(hashes
            .iter()
            .filter(|h| self.inner.hash_taken(h))
            .cloned()
            .collect())
    }

    async fn increment_use_count(&self, batch_id: i64) -> Result<bool> {
        let _row = self.inner.lock_row(RowKey::Batch(batch_id)).await;
        Ok(self.inner.consume_use(batch_id))
    }

    async fn batch_stats(&self, batch_id: i64) -> Result<Option<BatchStats>> {
        let Some(batch) = self.inner.batches.get(&batch_id).map(|b| b.clone()) else {
            return Ok(None);
        };

        let (mut available, mut redeemed) = (0i64, 0i64);
        for entry in self.inner.codes.iter().filter(|e| e.batch_id == batch_id) {
            match entry.status {
                CodeStatus::Available => available += 1,
                CodeStatus::Redeemed => redeemed += 1,
            }
        }

        Ok(Some(BatchStats {
            batch_id,
            use_type: batch.use_type,
            total_codes: available + redeemed,
            available_codes: available,
            redeemed_codes: redeemed,
            use_count: batch.use_count,
            max_uses: batch.max_uses,
        }))
    }

    async fn list_redemptions(&self, batch_id: i64, limit: i64) -> Result<Vec<Redemption>> {
        let mut redemptions: Vec<Redemption> = self
            .inner
            .redemptions
            .iter()
            .filter(|entry| entry.batch_id == batch_id)
            .map(|entry| entry.value().clone())
            .collect();
        redemptions.sort_by(|a, b| b.redeemed_at.cmp(&a.redeemed_at).then(b.id.cmp(&a.id)));
        redemptions.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(redemptions)
    }
}

#[async_trait]
impl RedemptionStore for MemoryCodeStore {
    async fn find_code_by_hash(&self, code_hash: &str) -> Result<Option<Code>> {
        Ok(self.code(code_hash))
    }

    async fn find_multi_use_batch_by_hash(&self, code_hash: &str) -> Result<Option<CodeBatch>> {
        let Some(batch_id) = self.inner.batch_hashes.get(code_hash).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.inner.batches.get(&batch_id).map(|b| b.clone()))
    }

    async fn begin(&self) -> Result<Box<dyn ConsumptionTx>> {
        Ok(Box::new(MemoryConsumptionTx {
            inner: Arc::clone(&self.inner),
            benefits: Arc::clone(&self.benefits),
            held: HashMap::new(),
            pending: Vec::new(),
        }))
    }
}

/// 提交时才写入的修改
#[derive(Debug)]
enum Pending {
    Claim {
        code_hash: String,
        principal_id: String,
        beneficiary_id: String,
        redeemed_at: DateTime<Utc>,
    },
    Use(i64),
    Redemption(Redemption),
    Grant {
        beneficiary_id: String,
        benefit_id: String,
        source: BenefitSource,
    },
}

/// 内存消耗事务
///
/// 持有的行锁随事务一起释放，丢弃即回滚
pub struct MemoryConsumptionTx {
    inner: Arc<MemoryInner>,
    benefits: Arc<InMemoryBenefitLedger>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    pending: Vec<Pending>,
}

impl MemoryConsumptionTx {
    async fn lock_row(&mut self, key: RowKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let guard = self.inner.lock_row(key.clone()).await;
        self.held.insert(key, guard);
    }

    fn pending_claim(&self, code_hash: &str) -> bool {
        self.pending
            .iter()
            .any(|op| matches!(op, Pending::Claim { code_hash: h, .. } if h == code_hash))
    }

    fn pending_uses(&self, batch_id: i64) -> i32 {
        self.pending
            .iter()
            .filter(|op| matches!(op, Pending::Use(id) if *id == batch_id))
            .count() as i32
    }

    fn apply(&self, op: Pending) {
        match op {
            Pending::Claim {
                code_hash,
                principal_id,
                beneficiary_id,
                redeemed_at,
            } => {
                if let Some(mut code) = self.inner.codes.get_mut(&code_hash) {
                    code.status = CodeStatus::Redeemed;
                    code.redeemed_at = Some(redeemed_at);
                    code.redeemed_by_principal_id = Some(principal_id);
                    code.redeemed_for_beneficiary_id = Some(beneficiary_id);
                }
            }
            Pending::Use(batch_id) => {
                if let Some(mut batch) = self.inner.batches.get_mut(&batch_id) {
                    batch.use_count += 1;
                }
            }
            Pending::Redemption(redemption) => {
                self.inner.redemptions.insert(redemption.id, redemption);
            }
            Pending::Grant {
                beneficiary_id,
                benefit_id,
                source,
            } => {
                self.benefits.apply_assign(&beneficiary_id, &benefit_id, &source);
            }
        }
    }
}

#[async_trait]
impl ConsumptionTx for MemoryConsumptionTx {
    async fn claim_code(
        &mut self,
        code_hash: &str,
        principal_id: &str,
        beneficiary_id: &str,
        redeemed_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.lock_row(RowKey::Code(code_hash.to_string())).await;

        let available = self
            .inner
            .codes
            .get(code_hash)
            .is_some_and(|code| code.status == CodeStatus::Available);
        if !available || self.pending_claim(code_hash) {
            return Ok(false);
        }

        self.pending.push(Pending::Claim {
            code_hash: code_hash.to_string(),
            principal_id: principal_id.to_string(),
            beneficiary_id: beneficiary_id.to_string(),
            redeemed_at,
        });
        Ok(true)
    }

    async fn consume_use(&mut self, batch_id: i64) -> Result<bool> {
        self.lock_row(RowKey::Batch(batch_id)).await;

        let pending = self.pending_uses(batch_id);
        let consumable = self.inner.batches.get(&batch_id).is_some_and(|batch| {
            batch.use_type == UseType::MultiUse
                && batch
                    .max_uses
                    .is_none_or(|max| batch.use_count + pending < max)
        });
        if !consumable {
            return Ok(false);
        }

        self.pending.push(Pending::Use(batch_id));
        Ok(true)
    }

    async fn append_redemption(&mut self, redemption: &NewRedemption) -> Result<i64> {
        let id = self.inner.next_redemption_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.push(Pending::Redemption(Redemption {
            id,
            batch_id: redemption.batch_id,
            principal_id: redemption.principal_id.clone(),
            beneficiary_id: redemption.beneficiary_id.clone(),
            redeemed_at: redemption.redeemed_at,
        }));
        Ok(id)
    }

    async fn grant_benefit(
        &mut self,
        beneficiary_id: &str,
        benefit_id: &str,
        source: &BenefitSource,
    ) -> Result<bool> {
        self.benefits.prepare_assign()?;

        let already_pending = self.pending.iter().any(|op| {
            matches!(op, Pending::Grant { beneficiary_id: b, benefit_id: id, .. }
                if b == beneficiary_id && id == benefit_id)
        });
        if already_pending || self.benefits.holds(beneficiary_id, benefit_id) {
            return Ok(false);
        }

        self.pending.push(Pending::Grant {
            beneficiary_id: beneficiary_id.to_string(),
            benefit_id: benefit_id.to_string(),
            source: source.clone(),
        });
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        if this.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(RedemptionError::Storage("事务提交失败".to_string()));
        }

        // 写入完成前不释放行锁
        for op in std::mem::take(&mut this.pending) {
            this.apply(op);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
