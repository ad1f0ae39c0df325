//! 兑换码发放服务
//!
//! 生成 → 哈希 → 跳过重复（批次内、本次生成集合内、全局）→ 直到凑够数量或耗尽尝试预算。
//! 凑够后一次性原子写入，明文只返回这一次。写入时若被并发发放抢先占用了哈希，
//! 整组重新生成，轮数受 `max_persist_attempts` 限制。

use std::collections::HashSet;
use std::sync::Arc;

use access_code_shared::config::RedemptionConfig;
use access_code_shared::observability::metrics;
use tracing::{debug, info, instrument, warn};

use super::dto::{
    CreateMultiUseBatchRequest, CreateSingleUseBatchRequest, IssuedBatchDto, IssuedCodesDto,
    validate_count,
};
use crate::codegen::{CodeAlphabet, CodeGenerator, GenerateOptions, hash_code};
use crate::error::{RedemptionError, Result};
use crate::models::{CodeBatch, NewCode, NewMultiUseBatch, NewSingleUseBatch};
use crate::repository::BatchStore;

/// 发放参数
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    /// 尝试预算倍数：最多尝试 count × retry_multiplier 次
    pub retry_multiplier: usize,
    /// 写入冲突后的最大生成轮数
    pub max_persist_attempts: u32,
    /// 请求未指定时使用的生成参数
    pub defaults: GenerateOptions,
}

impl Default for IssuerSettings {
    fn default() -> Self {
        Self::from(&RedemptionConfig::default())
    }
}

impl From<&RedemptionConfig> for IssuerSettings {
    fn from(config: &RedemptionConfig) -> Self {
        Self {
            retry_multiplier: config.retry_multiplier.max(1) as usize,
            max_persist_attempts: config.max_persist_attempts.max(1),
            defaults: GenerateOptions::default()
                .with_random_length(config.default_random_length)
                .with_exclude_chars(config.default_exclude_chars.clone()),
        }
    }
}

/// 一个通过去重的候选码
struct Candidate {
    plaintext: String,
    code_hash: String,
}

/// 尝试预算，同一次发放的所有轮次共用
struct AttemptBudget {
    requested: usize,
    max: usize,
    used: usize,
}

impl AttemptBudget {
    fn new(requested: usize, multiplier: usize) -> Self {
        Self {
            requested,
            max: requested.saturating_mul(multiplier).max(requested),
            used: 0,
        }
    }

    fn try_consume(&mut self) -> bool {
        if self.used >= self.max {
            return false;
        }
        self.used += 1;
        true
    }

    fn exhausted(&self, generated: usize) -> RedemptionError {
        RedemptionError::ExhaustedRetries {
            requested: self.requested,
            generated,
            attempts: self.used,
        }
    }
}

#[derive(Clone, Copy)]
enum PersistTarget<'a> {
    NewBatch(&'a NewSingleUseBatch),
    Existing(i64),
}

enum Persisted {
    Batch(CodeBatch),
    Appended,
}

/// 兑换码发放服务
pub struct CodeIssuer {
    batches: Arc<dyn BatchStore>,
    generator: CodeGenerator,
    settings: IssuerSettings,
}

impl CodeIssuer {
    pub fn new(batches: Arc<dyn BatchStore>, generator: CodeGenerator) -> Self {
        Self {
            batches,
            generator,
            settings: IssuerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: IssuerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &IssuerSettings {
        &self.settings
    }

    /// 创建一次性批次并生成全部兑换码
    ///
    /// 先生成后写入，预算耗尽时不会留下空批次
    #[instrument(skip(self, request), fields(benefit_id = %request.benefit_id, num_codes = request.num_codes))]
    pub async fn create_single_use_batch(
        &self,
        request: CreateSingleUseBatchRequest,
    ) -> Result<IssuedBatchDto> {
        request.validate()?;

        let defaults = &self.settings.defaults;
        let options = GenerateOptions {
            prefix: request.prefix.clone().unwrap_or_default(),
            suffix: request.suffix.clone().unwrap_or_default(),
            random_length: request.random_length.unwrap_or(defaults.random_length),
            exclude_chars: request
                .exclude_chars
                .clone()
                .unwrap_or_else(|| defaults.exclude_chars.clone()),
        };
        options.alphabet()?;

        let new_batch = NewSingleUseBatch {
            benefit_id: request.benefit_id.clone(),
            name: request.name.clone(),
            num_codes: to_i32("num_codes", request.num_codes)?,
            code_prefix: options.prefix.clone(),
            code_suffix: options.suffix.clone(),
            random_length: to_i32("random_length", options.random_length)?,
            exclude_chars: options.exclude_chars.clone(),
            expires_at: request.expires_at,
            created_by: request.created_by.clone(),
        };

        let (persisted, codes) = self
            .generate_and_persist(PersistTarget::NewBatch(&new_batch), request.num_codes, &options)
            .await?;
        let Persisted::Batch(batch) = persisted else {
            return Err(RedemptionError::Internal("批次写入结果缺失".to_string()));
        };

        info!(batch_id = batch.id, count = codes.len(), "一次性批次创建成功");
        Ok(IssuedBatchDto { batch, codes })
    }

    /// 向已有一次性批次发放指定数量的兑换码
    #[instrument(skip(self, options))]
    pub async fn issue_codes(
        &self,
        batch_id: i64,
        count: usize,
        options: &GenerateOptions,
    ) -> Result<IssuedCodesDto> {
        validate_count(count)?;
        let batch = self.require_single_use_batch(batch_id).await?;

        let (_, codes) = self
            .generate_and_persist(PersistTarget::Existing(batch.id), count, options)
            .await?;

        info!(batch_id, count = codes.len(), "兑换码发放成功");
        Ok(IssuedCodesDto { batch_id, codes })
    }

    /// 按批次保存的生成参数追加发放
    #[instrument(skip(self))]
    pub async fn issue_for_batch(&self, batch_id: i64, count: usize) -> Result<IssuedCodesDto> {
        let batch = self.require_single_use_batch(batch_id).await?;
        let options = self.stored_options(&batch);
        self.issue_codes(batch_id, count, &options).await
    }

    /// 创建多次使用批次
    ///
    /// 指定了共享码时直接使用（已存在则拒绝），否则按默认参数生成
    #[instrument(skip(self, request), fields(benefit_id = %request.benefit_id))]
    pub async fn create_multi_use_batch(
        &self,
        request: CreateMultiUseBatchRequest,
    ) -> Result<CodeBatch> {
        request.validate()?;

        let to_new_batch = |code_plain: String, code_hash: String| NewMultiUseBatch {
            benefit_id: request.benefit_id.clone(),
            name: request.name.clone(),
            code_plain,
            code_hash,
            max_uses: request.max_uses,
            expires_at: request.expires_at,
            created_by: request.created_by.clone(),
        };

        let batch = match request.code.as_deref().map(str::trim) {
            Some(code) => {
                let code_hash = hash_code(code);
                let taken = self
                    .batches
                    .find_existing_hashes(std::slice::from_ref(&code_hash))
                    .await?;
                if !taken.is_empty() {
                    return Err(RedemptionError::InvalidInput(format!(
                        "兑换码已存在: {code}"
                    )));
                }

                match self
                    .batches
                    .create_multi_use_batch(&to_new_batch(code.to_string(), code_hash))
                    .await
                {
                    Err(RedemptionError::HashConflict) => {
                        return Err(RedemptionError::InvalidInput(format!(
                            "兑换码已存在: {code}"
                        )));
                    }
                    other => other?,
                }
            }
            None => {
                let options = self.settings.defaults.clone();
                let alphabet = options.alphabet()?;
                let mut budget = AttemptBudget::new(1, self.settings.retry_multiplier);

                loop {
                    let candidate = self
                        .generate_unique(1, &alphabet, &options, &HashSet::new(), &mut budget)
                        .await?
                        .pop()
                        .ok_or_else(|| RedemptionError::Internal("共享码生成结果为空".to_string()))?;

                    match self
                        .batches
                        .create_multi_use_batch(&to_new_batch(candidate.plaintext, candidate.code_hash))
                        .await
                    {
                        Err(RedemptionError::HashConflict) => {
                            warn!("共享码写入时发生哈希冲突，重新生成");
                            metrics::record_collisions(1);
                        }
                        other => break other?,
                    }
                }
            }
        };

        info!(batch_id = batch.id, max_uses = ?batch.max_uses, "多次使用批次创建成功");
        Ok(batch)
    }

    async fn require_single_use_batch(&self, batch_id: i64) -> Result<CodeBatch> {
        let batch = self
            .batches
            .get_batch(batch_id)
            .await?
            .ok_or(RedemptionError::BatchNotFound(batch_id))?;

        if batch.is_multi_use() {
            return Err(RedemptionError::InvalidInput(format!(
                "多次使用批次不能发放一次性兑换码: batch_id={batch_id}"
            )));
        }
        Ok(batch)
    }

    fn stored_options(&self, batch: &CodeBatch) -> GenerateOptions {
        let defaults = &self.settings.defaults;
        GenerateOptions {
            prefix: batch.code_prefix.clone().unwrap_or_default(),
            suffix: batch.code_suffix.clone().unwrap_or_default(),
            random_length: batch
                .random_length
                .and_then(|len| usize::try_from(len).ok())
                .unwrap_or(defaults.random_length),
            exclude_chars: batch
                .exclude_chars
                .clone()
                .unwrap_or_else(|| defaults.exclude_chars.clone()),
        }
    }

    async fn generate_and_persist(
        &self,
        target: PersistTarget<'_>,
        count: usize,
        options: &GenerateOptions,
    ) -> Result<(Persisted, Vec<String>)> {
        let alphabet = options.alphabet()?;
        let mut budget = AttemptBudget::new(count, self.settings.retry_multiplier);
        let max_rounds = self.settings.max_persist_attempts.max(1);

        for round in 1..=max_rounds {
            let batch_hashes = match target {
                PersistTarget::Existing(batch_id) => self.batches.list_code_hashes(batch_id).await?,
                PersistTarget::NewBatch(_) => HashSet::new(),
            };

            let candidates = self
                .generate_unique(count, &alphabet, options, &batch_hashes, &mut budget)
                .await?;
            let new_codes: Vec<NewCode> = candidates
                .iter()
                .map(|c| NewCode {
                    code_hash: c.code_hash.clone(),
                })
                .collect();

            let persisted = match target {
                PersistTarget::NewBatch(batch) => self
                    .batches
                    .create_single_use_batch(batch, &new_codes)
                    .await
                    .map(Persisted::Batch),
                PersistTarget::Existing(batch_id) => self
                    .batches
                    .insert_codes(batch_id, &new_codes)
                    .await
                    .map(|_| Persisted::Appended),
            };

            match persisted {
                Ok(persisted) => {
                    metrics::record_codes_issued(count as u64);
                    let codes = candidates.into_iter().map(|c| c.plaintext).collect();
                    return Ok((persisted, codes));
                }
                Err(RedemptionError::HashConflict) => {
                    warn!(round, max_rounds, "写入时发生哈希冲突，整组重新生成");
                    metrics::record_collisions(1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(budget.exhausted(0))
    }

    /// 生成 `count` 个互不重复且全局未占用的候选码
    async fn generate_unique(
        &self,
        count: usize,
        alphabet: &CodeAlphabet,
        options: &GenerateOptions,
        batch_hashes: &HashSet<String>,
        budget: &mut AttemptBudget,
    ) -> Result<Vec<Candidate>> {
        let mut accepted: Vec<Candidate> = Vec::with_capacity(count);
        let mut seen: HashSet<String> = HashSet::with_capacity(count);
        let mut verified = 0;
        let mut collisions: u64 = 0;

        while accepted.len() < count {
            while accepted.len() < count {
                if !budget.try_consume() {
                    metrics::record_collisions(collisions);
                    warn!(
                        requested = count,
                        generated = accepted.len(),
                        attempts = budget.used,
                        "兑换码生成预算耗尽"
                    );
                    return Err(budget.exhausted(accepted.len()));
                }

                let plaintext = self.generator.generate_with(alphabet, options)?;
                let code_hash = hash_code(&plaintext);
                if batch_hashes.contains(&code_hash) || !seen.insert(code_hash.clone()) {
                    collisions += 1;
                    continue;
                }
                accepted.push(Candidate {
                    plaintext,
                    code_hash,
                });
            }

            // 只探测本轮新增的候选
            let pending: Vec<String> = accepted[verified..]
                .iter()
                .map(|c| c.code_hash.clone())
                .collect();
            let taken = self.batches.find_existing_hashes(&pending).await?;
            if !taken.is_empty() {
                debug!(taken = taken.len(), "候选码与已有兑换码冲突");
                collisions += taken.len() as u64;
                accepted.retain(|c| !taken.contains(&c.code_hash));
            }
            verified = accepted.len();
        }

        metrics::record_collisions(collisions);
        Ok(accepted)
    }
}

fn to_i32(field: &str, value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| RedemptionError::InvalidInput(format!("{field} 超出范围: {value}")))
}
