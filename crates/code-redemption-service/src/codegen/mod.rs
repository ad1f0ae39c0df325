//! 兑换码生成
//!
//! - `alphabet`: 字符表与排除规则
//! - `random`: 安全随机源抽象
//! - `generator`: 按生成参数拼出明文兑换码
//! - `hasher`: 规范化与 SHA-256 哈希

mod alphabet;
mod generator;
mod hasher;
mod random;

pub use alphabet::{
    BASE_ALPHABET, CodeAlphabet, DEFAULT_EXCLUDE_CHARS, DEFAULT_RANDOM_LENGTH, MAX_AFFIX_LENGTH,
    MAX_EXCLUDE_LENGTH, MAX_RANDOM_LENGTH,
};
pub use generator::{CodeGenerator, GenerateOptions};
pub use hasher::{hash_code, normalize_code};
pub use random::{OsRandomSource, SecureRandomSource, SeededRandomSource};
