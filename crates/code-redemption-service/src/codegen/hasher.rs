//! 兑换码哈希
//!
//! 存储与查找使用同一套规范化：去除首尾空白、转小写，再做 SHA-256，
//! 输出 64 位小写十六进制。
//!
//! 哈希不加盐：兑换码本身是高熵随机串，且必须能按哈希直接定位记录，
//! 加盐会让按码查找退化为全表比对。

use sha2::{Digest, Sha256};

/// 规范化用户输入的兑换码
pub fn normalize_code(code: &str) -> String {
    code.trim().to_lowercase()
}

/// 计算兑换码哈希
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_code(code).as_bytes());
    format!("{:x}", hasher.finalize())
}
