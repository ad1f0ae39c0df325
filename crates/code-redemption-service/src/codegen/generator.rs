//! 兑换码生成器
//!
//! 明文 = 前缀 + 随机部分 + 后缀。随机部分的每个字符独立、均匀地取自字符表，
//! 使用拒绝采样消除取模偏差。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::alphabet::{
    CodeAlphabet, DEFAULT_EXCLUDE_CHARS, DEFAULT_RANDOM_LENGTH, MAX_AFFIX_LENGTH,
    MAX_EXCLUDE_LENGTH, MAX_RANDOM_LENGTH,
};
use super::random::{OsRandomSource, SecureRandomSource};
use crate::error::{RedemptionError, Result};

/// 生成参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateOptions {
    pub prefix: String,
    pub suffix: String,
    pub random_length: usize,
    pub exclude_chars: String,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            random_length: DEFAULT_RANDOM_LENGTH,
            exclude_chars: DEFAULT_EXCLUDE_CHARS.to_string(),
        }
    }
}

impl GenerateOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_random_length(mut self, random_length: usize) -> Self {
        self.random_length = random_length;
        self
    }

    pub fn with_exclude_chars(mut self, exclude_chars: impl Into<String>) -> Self {
        self.exclude_chars = exclude_chars.into();
        self
    }

    /// 生成的明文长度（按字符计）
    pub fn code_length(&self) -> usize {
        self.prefix.chars().count() + self.random_length + self.suffix.chars().count()
    }

    /// 校验参数并构造字符表
    pub fn alphabet(&self) -> Result<CodeAlphabet> {
        if self.random_length == 0 || self.random_length > MAX_RANDOM_LENGTH {
            return Err(RedemptionError::InvalidInput(format!(
                "随机部分长度必须在 1..={MAX_RANDOM_LENGTH} 之间: {}",
                self.random_length
            )));
        }
        for (label, affix) in [("前缀", &self.prefix), ("后缀", &self.suffix)] {
            if affix.chars().count() > MAX_AFFIX_LENGTH {
                return Err(RedemptionError::InvalidInput(format!(
                    "{label}长度不能超过 {MAX_AFFIX_LENGTH}"
                )));
            }
            // 哈希前会去除首尾空白，带空白的前后缀会让明文与哈希对不上
            if affix.chars().any(char::is_whitespace) {
                return Err(RedemptionError::InvalidInput(format!(
                    "{label}不能包含空白字符"
                )));
            }
        }
        if self.exclude_chars.chars().count() > MAX_EXCLUDE_LENGTH {
            return Err(RedemptionError::InvalidInput(format!(
                "排除字符集长度不能超过 {MAX_EXCLUDE_LENGTH}"
            )));
        }
        CodeAlphabet::new(&self.exclude_chars)
    }
}

/// 兑换码生成器
#[derive(Clone)]
pub struct CodeGenerator {
    source: Arc<dyn SecureRandomSource>,
}

impl CodeGenerator {
    pub fn new(source: Arc<dyn SecureRandomSource>) -> Self {
        Self { source }
    }

    /// 使用操作系统熵源
    pub fn os() -> Self {
        Self::new(Arc::new(OsRandomSource))
    }

    /// 按参数生成一个明文兑换码
    pub fn generate(&self, options: &GenerateOptions) -> Result<String> {
        let alphabet = options.alphabet()?;
        self.generate_with(&alphabet, options)
    }

    /// 使用已校验的字符表生成，批量生成时避免重复构造字符表
    pub fn generate_with(&self, alphabet: &CodeAlphabet, options: &GenerateOptions) -> Result<String> {
        let mut code = String::with_capacity(options.code_length());
        code.push_str(&options.prefix);
        self.push_random(&mut code, alphabet, options.random_length)?;
        code.push_str(&options.suffix);
        Ok(code)
    }

    fn push_random(&self, out: &mut String, alphabet: &CodeAlphabet, length: usize) -> Result<()> {
        let n = alphabet.len();
        if n == 0 {
            return Err(RedemptionError::InvalidInput("字符表为空".to_string()));
        }
        // 只接受 [0, zone) 内的字节，zone 是 n 的整数倍
        let zone = (256 / n) * n;

        let mut buf = [0u8; 64];
        let mut remaining = length;
        while remaining > 0 {
            self.source.fill_bytes(&mut buf)?;
            for &byte in buf.iter() {
                let value = usize::from(byte);
                if value >= zone {
                    continue;
                }
                out.push(alphabet.symbol(value % n));
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::os()
    }
}

impl std::fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGenerator").finish_non_exhaustive()
    }
}
