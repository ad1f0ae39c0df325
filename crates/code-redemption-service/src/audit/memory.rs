//! 内存审计备注

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{AuditLog, NoteCategory};
use crate::error::{RedemptionError, Result};

/// 一条审计备注
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditNote {
    pub beneficiary_id: String,
    pub text: String,
    pub category: NoteCategory,
    pub created_at: DateTime<Utc>,
}

/// 内存审计备注
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    notes: Mutex<Vec<AuditNote>>,
    fail: AtomicBool,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> Vec<AuditNote> {
        self.notes.lock().clone()
    }

    pub fn notes_for(&self, beneficiary_id: &str) -> Vec<AuditNote> {
        self.notes
            .lock()
            .iter()
            .filter(|n| n.beneficiary_id == beneficiary_id)
            .cloned()
            .collect()
    }

    /// 设置后续写入是否失败
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record_note(
        &self,
        beneficiary_id: &str,
        text: &str,
        category: NoteCategory,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RedemptionError::DependencyFailure {
                collaborator: "audit_log",
                message: "备注服务不可用".to_string(),
            });
        }

        self.notes.lock().push(AuditNote {
            beneficiary_id: beneficiary_id.to_string(),
            text: text.to_string(),
            category,
            created_at: Utc::now(),
        });
        Ok(())
    }
}
