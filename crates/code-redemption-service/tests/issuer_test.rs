//! CodeIssuer 集成测试
//!
//! 使用内存存储验证批量生成的数量、唯一性与字符约束

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use code_redemption::RedemptionError;
use code_redemption::codegen::{BASE_ALPHABET, GenerateOptions, hash_code};
use code_redemption::repository::BatchStore;
use code_redemption::service::{
    CreateMultiUseBatchRequest, CreateSingleUseBatchRequest, IssuerSettings,
};
use common::Harness;

#[tokio::test]
async fn test_hundred_codes_without_exclusions() {
    let harness = Harness::new();

    let issued = harness
        .issuer
        .create_single_use_batch(
            CreateSingleUseBatchRequest::new("membership-gold", "开业活动", 100, "ops")
                .with_random_length(6)
                .with_exclude_chars(""),
        )
        .await
        .unwrap();

    assert_eq!(issued.codes.len(), 100);
    assert!(issued.codes.iter().all(|c| c.len() == 6));
    assert!(
        issued
            .codes
            .iter()
            .all(|c| c.chars().all(|ch| BASE_ALPHABET.contains(ch)))
    );

    let distinct: HashSet<&String> = issued.codes.iter().collect();
    assert_eq!(distinct.len(), 100);

    let stored = harness
        .store
        .list_codes_by_batch(issued.batch.id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 100);
    let hashes: HashSet<&str> = stored.iter().map(|c| c.code_hash.as_str()).collect();
    assert_eq!(hashes.len(), 100);
    for code in &issued.codes {
        assert!(hashes.contains(hash_code(code).as_str()));
    }
    assert_eq!(issued.batch.num_codes, Some(100));
}

#[tokio::test]
async fn test_default_exclusions_and_layout() {
    let harness = Harness::new();

    let issued = harness
        .issuer
        .create_single_use_batch(
            CreateSingleUseBatchRequest::new("membership-gold", "会员礼包", 300, "ops")
                .with_prefix("VIP-")
                .with_suffix("-X"),
        )
        .await
        .unwrap();

    for code in &issued.codes {
        assert_eq!(code.len(), 4 + 8 + 2);
        let random_part = &code[4..12];
        assert!(
            random_part.chars().all(|c| !"oO0iIlL1".contains(c)),
            "{code} 含有默认排除字符"
        );
    }
    assert_eq!(issued.batch.code_prefix.as_deref(), Some("VIP-"));
    assert_eq!(issued.batch.exclude_chars.as_deref(), Some("oO0iIlL1"));
}

#[tokio::test]
async fn test_plaintext_not_stored() {
    let harness = Harness::new();
    let issued = harness
        .issuer
        .create_single_use_batch(CreateSingleUseBatchRequest::new("gold", "礼包", 5, "ops"))
        .await
        .unwrap();

    let stored = harness
        .store
        .list_codes_by_batch(issued.batch.id)
        .await
        .unwrap();
    let serialized = serde_json::to_string(&stored).unwrap();
    for code in &issued.codes {
        assert!(!serialized.contains(code.as_str()));
    }
    assert!(issued.batch.code_plain.is_none());
}

#[tokio::test]
async fn test_exhausted_budget_leaves_no_batch() {
    // 只剩 A、B 两个字符，随机长度 1：最多 2 个不同的码
    let exclude: String = BASE_ALPHABET
        .chars()
        .filter(|c| *c != 'A' && *c != 'B')
        .collect();
    let harness = Harness::seeded(17, IssuerSettings::default());

    let err = harness
        .issuer
        .create_single_use_batch(
            CreateSingleUseBatchRequest::new("gold", "小字符表", 3, "ops")
                .with_random_length(1)
                .with_exclude_chars(exclude),
        )
        .await
        .unwrap_err();

    match err {
        RedemptionError::ExhaustedRetries {
            requested,
            generated,
            attempts,
        } => {
            assert_eq!(requested, 3);
            assert_eq!(generated, 2);
            assert_eq!(attempts, 30);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(harness.store.list_batches(10).await.unwrap().is_empty());
    assert_eq!(harness.store.code_count(), 0);
}

#[tokio::test]
async fn test_case_insensitive_collisions_are_skipped() {
    // 字符表只有 A、a，两者规范化后相同
    let exclude: String = BASE_ALPHABET
        .chars()
        .filter(|c| *c != 'A' && *c != 'a')
        .collect();
    let harness = Harness::seeded(3, IssuerSettings::default());

    let err = harness
        .issuer
        .create_single_use_batch(
            CreateSingleUseBatchRequest::new("gold", "大小写", 2, "ops")
                .with_random_length(1)
                .with_exclude_chars(exclude),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RedemptionError::ExhaustedRetries { generated: 1, .. }
    ));
}

#[tokio::test]
async fn test_issue_for_batch_uses_stored_options_and_stays_unique() {
    let harness = Harness::new();
    let created = harness
        .issuer
        .create_single_use_batch(
            CreateSingleUseBatchRequest::new("gold", "补发", 50, "ops")
                .with_prefix("TOP-")
                .with_random_length(5),
        )
        .await
        .unwrap();

    let topped = harness
        .issuer
        .issue_for_batch(created.batch.id, 25)
        .await
        .unwrap();
    assert_eq!(topped.codes.len(), 25);
    assert!(
        topped
            .codes
            .iter()
            .all(|c| c.starts_with("TOP-") && c.len() == 9)
    );

    let all: HashSet<String> = created
        .codes
        .iter()
        .chain(topped.codes.iter())
        .map(|c| hash_code(c))
        .collect();
    assert_eq!(all.len(), 75);

    let overview = harness.queries.batch_overview(created.batch.id).await.unwrap();
    assert_eq!(overview.stats.total_codes, 75);
    assert_eq!(overview.stats.available_codes, 75);
    assert_eq!(overview.batch.num_codes, Some(75));
}

#[tokio::test]
async fn test_issue_codes_with_explicit_options() {
    let harness = Harness::new();
    let created = harness
        .issuer
        .create_single_use_batch(CreateSingleUseBatchRequest::new("gold", "礼包", 1, "ops"))
        .await
        .unwrap();

    let options = GenerateOptions::default()
        .with_prefix("EXT")
        .with_random_length(10)
        .with_exclude_chars("");
    let issued = harness
        .issuer
        .issue_codes(created.batch.id, 10, &options)
        .await
        .unwrap();
    assert!(issued.codes.iter().all(|c| c.len() == 13 && c.starts_with("EXT")));
}

#[tokio::test]
async fn test_issue_into_unknown_batch() {
    let harness = Harness::new();
    let err = harness.issuer.issue_for_batch(999, 5).await.unwrap_err();
    assert!(matches!(err, RedemptionError::BatchNotFound(999)));
}

#[tokio::test]
async fn test_issue_into_multi_use_batch_rejected() {
    let harness = Harness::new();
    let batch = harness
        .issuer
        .create_multi_use_batch(CreateMultiUseBatchRequest::new("gold", "口令", "ops"))
        .await
        .unwrap();

    let err = harness.issuer.issue_for_batch(batch.id, 5).await.unwrap_err();
    assert!(matches!(err, RedemptionError::InvalidInput(_)));
}

#[tokio::test]
async fn test_multi_use_batch_with_operator_code() {
    let harness = Harness::new();
    let batch = harness
        .issuer
        .create_multi_use_batch(
            CreateMultiUseBatchRequest::new("gold", "直播口令", "ops")
                .with_code(" LIVE2025 ")
                .with_max_uses(500),
        )
        .await
        .unwrap();

    assert_eq!(batch.code_plain.as_deref(), Some("LIVE2025"));
    assert_eq!(batch.code_hash.as_deref(), Some(hash_code("live2025").as_str()));
    assert_eq!(batch.max_uses, Some(500));
    assert_eq!(batch.use_count, 0);

    // 大小写不同也视为同一个码
    let err = harness
        .issuer
        .create_multi_use_batch(
            CreateMultiUseBatchRequest::new("silver", "重复口令", "ops").with_code("live2025"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RedemptionError::InvalidInput(_)));
}

#[tokio::test]
async fn test_generated_multi_use_code() {
    let harness = Harness::new();
    let batch = harness
        .issuer
        .create_multi_use_batch(CreateMultiUseBatchRequest::new("gold", "自动口令", "ops"))
        .await
        .unwrap();

    let plain = batch.code_plain.clone().unwrap();
    assert_eq!(plain.len(), 8);
    assert_eq!(batch.code_hash, Some(hash_code(&plain)));
    assert!(batch.max_uses.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_top_ups_stay_unique() {
    let harness = Harness::new();
    let created = harness
        .issuer
        .create_single_use_batch(
            CreateSingleUseBatchRequest::new("gold", "并发补发", 10, "ops").with_random_length(4),
        )
        .await
        .unwrap();
    let batch_id = created.batch.id;
    let issuer = Arc::new(harness.issuer);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let issuer = issuer.clone();
            tokio::spawn(async move { issuer.issue_for_batch(batch_id, 50).await })
        })
        .collect();

    let mut total = created.codes.len();
    for result in futures::future::join_all(tasks).await {
        total += result.unwrap().unwrap().codes.len();
    }

    let stored = harness.store.list_codes_by_batch(batch_id).await.unwrap();
    assert_eq!(stored.len(), total);
    assert_eq!(total, 410);
}
