//! 兑换引擎
//!
//! 兑换流程：
//! 1. 校验输入并计算哈希
//! 2. 先查一次性兑换码，再查多次使用批次的共享码
//! 3. 过期检查（到期时刻即视为过期），早于任何写操作
//! 4. 多次使用批次的次数检查
//! 5. 幂等检查：受益人已持有权益时按策略短路
//! 6. 在存储事务内用条件更新消耗兑换码
//! 7. 在同一事务内发放权益，失败则回滚消耗
//! 8. 提交后写审计备注，备注失败不影响兑换结果
//!
//! 并发安全只依赖第 6 步的条件更新，不使用进程内锁。

use std::sync::Arc;
use std::time::Instant;

use access_code_shared::config::AlreadyEntitledPolicy;
use access_code_shared::observability::metrics;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use super::dto::{RedemptionResult, require_id};
use crate::audit::{AuditLog, NoteCategory};
use crate::benefit::{BenefitAssignment, BenefitSource};
use crate::codegen::hash_code;
use crate::error::{RedemptionError, Result};
use crate::models::{Code, CodeBatch, NewRedemption, RedemptionOutcome};
use crate::repository::{BatchStore, ConsumptionTx, RedemptionStore};

const BENEFIT_COLLABORATOR: &str = "benefit_assignment";

/// 兑换码解析结果
enum RedemptionTarget {
    SingleUse { code: Code, batch: CodeBatch },
    MultiUse { batch: CodeBatch },
}

impl RedemptionTarget {
    fn batch(&self) -> &CodeBatch {
        match self {
            Self::SingleUse { batch, .. } | Self::MultiUse { batch } => batch,
        }
    }

    /// 一次性兑换码已被兑换
    fn is_spent(&self) -> bool {
        matches!(self, Self::SingleUse { code, .. } if !code.is_available())
    }
}

/// 兑换引擎
pub struct RedemptionEngine {
    batches: Arc<dyn BatchStore>,
    store: Arc<dyn RedemptionStore>,
    benefits: Arc<dyn BenefitAssignment>,
    audit: Arc<dyn AuditLog>,
    policy: AlreadyEntitledPolicy,
}

impl RedemptionEngine {
    pub fn new(
        batches: Arc<dyn BatchStore>,
        store: Arc<dyn RedemptionStore>,
        benefits: Arc<dyn BenefitAssignment>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            batches,
            store,
            benefits,
            audit,
            policy: AlreadyEntitledPolicy::default(),
        }
    }

    /// 设置受益人已持有权益时的策略
    pub fn with_policy(mut self, policy: AlreadyEntitledPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 兑换
    ///
    /// 成功返回发放的权益；`AlreadyRedeemed` 与 `UseLimitExceeded` 可能是并发竞争的正常结果
    #[instrument(skip(self, plaintext_code), fields(principal_id = %principal_id, beneficiary_id = %beneficiary_id))]
    pub async fn redeem(
        &self,
        plaintext_code: &str,
        principal_id: &str,
        beneficiary_id: &str,
    ) -> Result<RedemptionResult> {
        let started = Instant::now();
        let result = self
            .redeem_inner(plaintext_code, principal_id, beneficiary_id)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(r) => {
                metrics::record_redemption(r.outcome.as_str(), r.use_type.as_str(), elapsed);
            }
            Err(e) => {
                metrics::record_redemption(e.outcome_label(), "unknown", elapsed);
                if e.is_business_error() {
                    info!(error_code = e.error_code(), "兑换未成功: {}", e);
                } else {
                    warn!(error_code = e.error_code(), error = %e, "兑换失败");
                }
            }
        }
        result
    }

    async fn redeem_inner(
        &self,
        plaintext_code: &str,
        principal_id: &str,
        beneficiary_id: &str,
    ) -> Result<RedemptionResult> {
        if plaintext_code.trim().is_empty() {
            return Err(RedemptionError::InvalidInput("兑换码不能为空".to_string()));
        }
        require_id("principal_id", principal_id)?;
        require_id("beneficiary_id", beneficiary_id)?;

        let code_hash = hash_code(plaintext_code);
        let target = self.resolve(&code_hash).await?;
        let batch = target.batch();
        let now = Utc::now();

        if batch.is_expired_at(now) {
            return Err(RedemptionError::Expired { batch_id: batch.id });
        }
        if batch.is_multi_use() && !batch.has_remaining_uses() {
            return Err(RedemptionError::UseLimitExceeded { batch_id: batch.id });
        }

        let entitled = self
            .benefits
            .has_benefit(beneficiary_id, &batch.benefit_id)
            .await
            .map_err(|e| e.into_dependency(BENEFIT_COLLABORATOR))?;

        if entitled && (self.policy == AlreadyEntitledPolicy::Skip || target.is_spent()) {
            debug!(batch_id = batch.id, "受益人已持有权益，不消耗兑换码");
            return Ok(RedemptionResult {
                batch_id: batch.id,
                benefit_id: batch.benefit_id.clone(),
                use_type: batch.use_type,
                outcome: RedemptionOutcome::AlreadyEntitled,
                code_consumed: false,
                redeemed_at: now,
            });
        }

        if target.is_spent() {
            return Err(RedemptionError::AlreadyRedeemed);
        }

        self.consume_and_assign(&target, principal_id, beneficiary_id, now)
            .await?;

        info!(
            batch_id = batch.id,
            benefit_id = %batch.benefit_id,
            use_type = batch.use_type.as_str(),
            "兑换成功"
        );
        self.record_note(batch, beneficiary_id).await;

        Ok(RedemptionResult {
            batch_id: batch.id,
            benefit_id: batch.benefit_id.clone(),
            use_type: batch.use_type,
            outcome: if entitled {
                RedemptionOutcome::AlreadyEntitled
            } else {
                RedemptionOutcome::Granted
            },
            code_consumed: true,
            redeemed_at: now,
        })
    }

    /// 按哈希解析兑换码：一次性码优先，其次多次使用批次
    async fn resolve(&self, code_hash: &str) -> Result<RedemptionTarget> {
        if let Some(code) = self.store.find_code_by_hash(code_hash).await? {
            let batch = self
                .batches
                .get_batch(code.batch_id)
                .await?
                .ok_or_else(|| {
                    RedemptionError::Internal(format!(
                        "兑换码所属批次不存在: batch_id={}",
                        code.batch_id
                    ))
                })?;
            return Ok(RedemptionTarget::SingleUse { code, batch });
        }

        match self.store.find_multi_use_batch_by_hash(code_hash).await? {
            Some(batch) => Ok(RedemptionTarget::MultiUse { batch }),
            None => Err(RedemptionError::InvalidCode),
        }
    }

    /// 在一个事务内消耗兑换码并发放权益
    async fn consume_and_assign(
        &self,
        target: &RedemptionTarget,
        principal_id: &str,
        beneficiary_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;

        match target {
            RedemptionTarget::SingleUse { code, .. } => {
                let claimed = tx
                    .claim_code(&code.code_hash, principal_id, beneficiary_id, now)
                    .await?;
                if !claimed {
                    abort(tx).await;
                    return Err(RedemptionError::AlreadyRedeemed);
                }
            }
            RedemptionTarget::MultiUse { batch } => {
                if !tx.consume_use(batch.id).await? {
                    abort(tx).await;
                    return Err(RedemptionError::UseLimitExceeded { batch_id: batch.id });
                }
                tx.append_redemption(&NewRedemption {
                    batch_id: batch.id,
                    principal_id: principal_id.to_string(),
                    beneficiary_id: beneficiary_id.to_string(),
                    redeemed_at: now,
                })
                .await?;
            }
        }

        let batch = target.batch();
        let source = BenefitSource {
            batch_id: batch.id,
            batch_name: batch.name.clone(),
            use_type: batch.use_type,
        };
        if let Err(e) = tx
            .grant_benefit(beneficiary_id, &batch.benefit_id, &source)
            .await
        {
            warn!(batch_id = batch.id, error = %e, "权益发放失败，回滚兑换码消耗");
            abort(tx).await;
            return Err(e.into_dependency(BENEFIT_COLLABORATOR));
        }

        tx.commit().await.inspect_err(|e| {
            error!(
                batch_id = batch.id,
                benefit_id = %batch.benefit_id,
                error = %e,
                "兑换事务提交失败，兑换码与权益均未写入"
            );
        })
    }

    async fn record_note(&self, batch: &CodeBatch, beneficiary_id: &str) {
        let text = format!(
            "通过兑换码批次「{}」(#{}) 获得权益 {}",
            batch.name, batch.id, batch.benefit_id
        );
        if let Err(e) = self
            .audit
            .record_note(beneficiary_id, &text, NoteCategory::CodeRedemption)
            .await
        {
            metrics::record_audit_failure();
            warn!(batch_id = batch.id, error = %e, "审计备注写入失败");
        }
    }
}

/// 回滚并吞掉回滚错误，事务句柄丢弃时存储层也会回滚
async fn abort(tx: Box<dyn ConsumptionTx>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "事务回滚失败");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{InMemoryAuditLog, MockAuditLog};
    use crate::benefit::MockBenefitAssignment;
    use crate::codegen::hash_code;
    use crate::models::{NewCode, NewMultiUseBatch, NewSingleUseBatch};
    use crate::repository::MemoryCodeStore;

    async fn seed_single_use(store: &MemoryCodeStore, code: &str) -> CodeBatch {
        store
            .create_single_use_batch(
                &NewSingleUseBatch {
                    benefit_id: "gold".to_string(),
                    name: "礼包".to_string(),
                    num_codes: 1,
                    code_prefix: String::new(),
                    code_suffix: String::new(),
                    random_length: 8,
                    exclude_chars: String::new(),
                    expires_at: None,
                    created_by: "ops".to_string(),
                },
                &[NewCode {
                    code_hash: hash_code(code),
                }],
            )
            .await
            .unwrap()
    }

    fn engine_with(
        store: &MemoryCodeStore,
        benefits: Arc<dyn BenefitAssignment>,
        audit: Arc<dyn AuditLog>,
    ) -> RedemptionEngine {
        RedemptionEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            benefits,
            audit,
        )
    }

    #[tokio::test]
    async fn test_empty_inputs_rejected_before_lookup() {
        let store = MemoryCodeStore::new();
        let mut benefits = MockBenefitAssignment::new();
        benefits.expect_has_benefit().never();
        let engine = engine_with(&store, Arc::new(benefits), Arc::new(InMemoryAuditLog::new()));

        for (code, principal, beneficiary) in
            [("  ", "p", "b"), ("CODE", "", "b"), ("CODE", "p", " ")]
        {
            let err = engine.redeem(code, principal, beneficiary).await.unwrap_err();
            assert!(matches!(err, RedemptionError::InvalidInput(_)));
        }
    }

    #[tokio::test]
    async fn test_assign_failure_rolls_back_consumption() {
        let store = MemoryCodeStore::new();
        seed_single_use(&store, "ROLLBACK1").await;
        store.benefits().set_fail_assign(true);

        // 兑换流程只在消耗事务内发放，不走直接发放
        let mut benefits = MockBenefitAssignment::new();
        benefits.expect_has_benefit().returning(|_, _| Ok(false));
        benefits.expect_assign_benefit().never();
        let mut audit = MockAuditLog::new();
        audit.expect_record_note().never();

        let engine = engine_with(&store, Arc::new(benefits), Arc::new(audit));
        let err = engine.redeem("rollback1", "p1", "b1").await.unwrap_err();

        assert!(matches!(
            err,
            RedemptionError::DependencyFailure {
                collaborator: "benefit_assignment",
                ..
            }
        ));
        assert!(err.is_retryable());
        assert!(store.code(&hash_code("ROLLBACK1")).unwrap().is_available());
        assert_eq!(store.benefits().grant_count(), 0);
    }

    #[tokio::test]
    async fn test_assign_failure_releases_multi_use_slot() {
        let store = MemoryCodeStore::new();
        let batch = store
            .create_multi_use_batch(&NewMultiUseBatch {
                benefit_id: "gold".to_string(),
                name: "口令".to_string(),
                code_plain: "SHARED".to_string(),
                code_hash: hash_code("SHARED"),
                max_uses: Some(1),
                expires_at: None,
                created_by: "ops".to_string(),
            })
            .await
            .unwrap();

        let ledger = store.benefits();
        ledger.set_fail_assign(true);
        let engine = engine_with(&store, ledger.clone(), Arc::new(InMemoryAuditLog::new()));

        assert!(engine.redeem("SHARED", "p1", "b1").await.is_err());
        assert_eq!(store.get_batch(batch.id).await.unwrap().unwrap().use_count, 0);
        assert_eq!(store.redemption_count(), 0);

        ledger.set_fail_assign(false);
        let result = engine.redeem("SHARED", "p1", "b1").await.unwrap();
        assert_eq!(result.outcome, RedemptionOutcome::Granted);
        assert_eq!(store.redemption_count(), 1);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_redemption() {
        let store = MemoryCodeStore::new();
        seed_single_use(&store, "AUDITED").await;

        let mut audit = MockAuditLog::new();
        audit
            .expect_record_note()
            .times(1)
            .withf(|beneficiary, text, category| {
                beneficiary == "b1"
                    && text.contains("gold")
                    && *category == NoteCategory::CodeRedemption
            })
            .returning(|_, _, _| {
                Err(RedemptionError::DependencyFailure {
                    collaborator: "audit_log",
                    message: "超时".to_string(),
                })
            });

        let ledger = store.benefits();
        let engine = engine_with(&store, ledger.clone(), Arc::new(audit));
        let result = engine.redeem("AUDITED", "p1", "b1").await.unwrap();

        assert_eq!(result.outcome, RedemptionOutcome::Granted);
        assert!(ledger.holds("b1", "gold"));
    }

    #[tokio::test]
    async fn test_has_benefit_failure_is_dependency_failure() {
        let store = MemoryCodeStore::new();
        seed_single_use(&store, "LOOKUP").await;

        let mut benefits = MockBenefitAssignment::new();
        benefits
            .expect_has_benefit()
            .returning(|_, _| Err(RedemptionError::Internal("down".to_string())));
        benefits.expect_assign_benefit().never();

        let engine = engine_with(&store, Arc::new(benefits), Arc::new(InMemoryAuditLog::new()));
        let err = engine.redeem("LOOKUP", "p1", "b1").await.unwrap_err();
        assert!(matches!(err, RedemptionError::DependencyFailure { .. }));
        assert!(store.code(&hash_code("LOOKUP")).unwrap().is_available());
    }

    #[tokio::test]
    async fn test_commit_failure_is_persistence_failure() {
        let store = MemoryCodeStore::new();
        seed_single_use(&store, "COMMIT").await;
        store.fail_next_commit();

        let ledger = store.benefits();
        let audit = Arc::new(InMemoryAuditLog::new());
        let engine = engine_with(&store, ledger.clone(), audit.clone());

        let err = engine.redeem("COMMIT", "p1", "b1").await.unwrap_err();
        assert!(err.is_persistence_failure());
        assert!(audit.notes().is_empty());
        assert!(store.code(&hash_code("COMMIT")).unwrap().is_available());
        assert!(!ledger.holds("b1", "gold"));

        // 消耗与权益一起回滚，重试完整兑换
        let retry = engine.redeem("COMMIT", "p1", "b1").await.unwrap();
        assert_eq!(retry.outcome, RedemptionOutcome::Granted);
        assert!(retry.code_consumed);

        let err = engine.redeem("COMMIT", "p2", "b2").await.unwrap_err();
        assert!(matches!(err, RedemptionError::AlreadyRedeemed));
        assert_eq!(ledger.grant_count(), 1);
    }
}
