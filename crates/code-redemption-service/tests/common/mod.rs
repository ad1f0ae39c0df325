//! 集成测试公共装配
//!
//! 使用内存存储与内存协作方组装发放、兑换与查询服务

#![allow(dead_code)]

use std::sync::Arc;

use access_code_shared::config::AlreadyEntitledPolicy;
use code_redemption::audit::InMemoryAuditLog;
use code_redemption::benefit::InMemoryBenefitLedger;
use code_redemption::codegen::{CodeGenerator, SeededRandomSource};
use code_redemption::repository::MemoryCodeStore;
use code_redemption::service::{BatchQueryService, CodeIssuer, IssuerSettings, RedemptionEngine};

pub struct Harness {
    pub store: MemoryCodeStore,
    pub ledger: Arc<InMemoryBenefitLedger>,
    pub audit: Arc<InMemoryAuditLog>,
    pub issuer: CodeIssuer,
    pub engine: Arc<RedemptionEngine>,
    pub queries: BatchQueryService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(AlreadyEntitledPolicy::Skip)
    }

    pub fn with_policy(policy: AlreadyEntitledPolicy) -> Self {
        Self::build(policy, IssuerSettings::default(), CodeGenerator::os())
    }

    /// 固定种子的生成器，便于复现
    pub fn seeded(seed: u64, settings: IssuerSettings) -> Self {
        let generator = CodeGenerator::new(Arc::new(SeededRandomSource::from_seed_u64(seed)));
        Self::build(AlreadyEntitledPolicy::Skip, settings, generator)
    }

    fn build(
        policy: AlreadyEntitledPolicy,
        settings: IssuerSettings,
        generator: CodeGenerator,
    ) -> Self {
        let store = MemoryCodeStore::new();
        // 兑换事务写入存储自带的账本，查询与发放共用同一份
        let ledger = store.benefits();
        let audit = Arc::new(InMemoryAuditLog::new());

        let issuer = CodeIssuer::new(Arc::new(store.clone()), generator).with_settings(settings);
        let engine = RedemptionEngine::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            ledger.clone(),
            audit.clone(),
        )
        .with_policy(policy);
        let queries = BatchQueryService::new(Arc::new(store.clone()));

        Self {
            store,
            ledger,
            audit,
            issuer,
            engine: Arc::new(engine),
            queries,
        }
    }
}
