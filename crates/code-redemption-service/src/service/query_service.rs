//! 批次查询服务（只读操作）

use std::sync::Arc;

use tracing::instrument;

use super::dto::BatchOverviewDto;
use crate::error::{RedemptionError, Result};
use crate::models::{Code, CodeBatch, Redemption};
use crate::repository::BatchStore;

/// 批次查询服务
pub struct BatchQueryService {
    batches: Arc<dyn BatchStore>,
}

impl BatchQueryService {
    pub fn new(batches: Arc<dyn BatchStore>) -> Self {
        Self { batches }
    }

    pub async fn get_batch(&self, batch_id: i64) -> Result<CodeBatch> {
        self.batches
            .get_batch(batch_id)
            .await?
            .ok_or(RedemptionError::BatchNotFound(batch_id))
    }

    /// 批次详情与兑换统计
    #[instrument(skip(self))]
    pub async fn batch_overview(&self, batch_id: i64) -> Result<BatchOverviewDto> {
        let batch = self.get_batch(batch_id).await?;
        let stats = self
            .batches
            .batch_stats(batch_id)
            .await?
            .ok_or(RedemptionError::BatchNotFound(batch_id))?;
        Ok(BatchOverviewDto { batch, stats })
    }

    pub async fn list_batches(&self, limit: i64) -> Result<Vec<CodeBatch>> {
        self.batches.list_batches(limit.clamp(1, 1_000)).await
    }

    pub async fn list_codes(&self, batch_id: i64) -> Result<Vec<Code>> {
        self.get_batch(batch_id).await?;
        self.batches.list_codes_by_batch(batch_id).await
    }

    /// 多次使用批次的兑换历史
    #[instrument(skip(self))]
    pub async fn redemption_history(&self, batch_id: i64, limit: i64) -> Result<Vec<Redemption>> {
        let batch = self.get_batch(batch_id).await?;
        if batch.is_single_use() {
            return Err(RedemptionError::InvalidInput(format!(
                "一次性批次没有兑换历史，请查看兑换码列表: batch_id={batch_id}"
            )));
        }
        self.batches
            .list_redemptions(batch_id, limit.clamp(1, 10_000))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{multi_use_batch, single_use_batch};
    use crate::repository::MockBatchStore;

    #[tokio::test]
    async fn test_history_for_single_use_batch_rejected() {
        let mut store = MockBatchStore::new();
        store
            .expect_get_batch()
            .returning(|id| Ok(Some(single_use_batch(id))));
        store.expect_list_redemptions().never();

        let err = BatchQueryService::new(Arc::new(store))
            .redemption_history(1, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, RedemptionError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_history_limit_is_clamped() {
        let mut store = MockBatchStore::new();
        store
            .expect_get_batch()
            .returning(|id| Ok(Some(multi_use_batch(id, None, 0))));
        store
            .expect_list_redemptions()
            .withf(|batch_id, limit| *batch_id == 2 && *limit == 1)
            .returning(|_, _| Ok(vec![]));

        let history = BatchQueryService::new(Arc::new(store))
            .redemption_history(2, 0)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_overview_batch_not_found() {
        let mut store = MockBatchStore::new();
        store.expect_get_batch().returning(|_| Ok(None));

        let err = BatchQueryService::new(Arc::new(store))
            .batch_overview(404)
            .await
            .unwrap_err();
        assert!(matches!(err, RedemptionError::BatchNotFound(404)));
    }
}
