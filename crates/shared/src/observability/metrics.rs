//! 指标模块
//!
//! 基于 metrics facade 描述并记录业务指标。
//! 未安装 recorder 时所有记录均为空操作，嵌入方可自行安装导出器。

/// 兑换结果计数
pub const REDEMPTIONS_TOTAL: &str = "code_redemptions_total";
/// 兑换耗时
pub const REDEMPTION_DURATION: &str = "code_redemption_duration_seconds";
/// 已生成兑换码数量
pub const CODES_ISSUED_TOTAL: &str = "codes_issued_total";
/// 生成过程中的哈希碰撞次数
pub const CODE_COLLISIONS_TOTAL: &str = "code_generation_collisions_total";
/// 审计备注写入失败次数
pub const AUDIT_FAILURES_TOTAL: &str = "audit_note_failures_total";

/// 注册指标描述
///
/// 这些描述会出现在导出端点的 HELP 注释中
pub fn describe_metrics() {
    ::metrics::describe_counter!(REDEMPTIONS_TOTAL, "Total number of code redemption attempts by outcome");
    ::metrics::describe_histogram!(
        REDEMPTION_DURATION,
        "Code redemption duration in seconds"
    );
    ::metrics::describe_counter!(CODES_ISSUED_TOTAL, "Total number of single-use codes issued");
    ::metrics::describe_counter!(
        CODE_COLLISIONS_TOTAL,
        "Total number of hash collisions skipped during code generation"
    );
    ::metrics::describe_counter!(
        AUDIT_FAILURES_TOTAL,
        "Total number of audit notes that failed to record"
    );
}

/// 记录一次兑换
#[inline]
pub fn record_redemption(outcome: &'static str, use_type: &'static str, duration_secs: f64) {
    ::metrics::counter!(REDEMPTIONS_TOTAL, "outcome" => outcome, "use_type" => use_type)
        .increment(1);
    ::metrics::histogram!(REDEMPTION_DURATION, "outcome" => outcome).record(duration_secs);
}

/// 记录生成的兑换码数量
#[inline]
pub fn record_codes_issued(count: u64) {
    ::metrics::counter!(CODES_ISSUED_TOTAL).increment(count);
}

/// 记录生成阶段跳过的碰撞
#[inline]
pub fn record_collisions(count: u64) {
    if count > 0 {
        ::metrics::counter!(CODE_COLLISIONS_TOTAL).increment(count);
    }
}

/// 记录审计备注写入失败
#[inline]
pub fn record_audit_failure() {
    ::metrics::counter!(AUDIT_FAILURES_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        record_redemption("granted", "single_use", 0.01);
        record_codes_issued(10);
        record_collisions(0);
        record_audit_failure();
    }
}
