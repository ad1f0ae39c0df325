//! 兑换码字符表
//!
//! 基础字符表为 base62，按固定顺序排列；排除字符后剩余字符保持原顺序，
//! 同样的排除参数总是得到同样的字符表。

use crate::error::{RedemptionError, Result};

/// 基础字符表
pub const BASE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// 默认排除的易混淆字符
pub const DEFAULT_EXCLUDE_CHARS: &str = "oO0iIlL1";

/// 随机部分默认长度
pub const DEFAULT_RANDOM_LENGTH: usize = 8;

/// 随机部分最大长度
pub const MAX_RANDOM_LENGTH: usize = 64;

/// 前缀/后缀最大长度，与表结构 VARCHAR(32) 对齐
pub const MAX_AFFIX_LENGTH: usize = 32;

/// 排除字符集最大长度，与表结构 VARCHAR(64) 对齐
pub const MAX_EXCLUDE_LENGTH: usize = 64;

/// 排除指定字符后的字符表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAlphabet {
    symbols: Vec<u8>,
}

impl CodeAlphabet {
    /// 从基础字符表中移除 `exclude_chars` 出现的字符
    ///
    /// 排除后为空时返回 `InvalidInput`
    pub fn new(exclude_chars: &str) -> Result<Self> {
        let symbols: Vec<u8> = BASE_ALPHABET
            .bytes()
            .filter(|b| !exclude_chars.contains(char::from(*b)))
            .collect();

        if symbols.is_empty() {
            return Err(RedemptionError::InvalidInput(format!(
                "排除字符 {exclude_chars:?} 后字符表为空"
            )));
        }

        Ok(Self { symbols })
    }

    /// 不排除任何字符的完整字符表
    pub fn full() -> Self {
        Self {
            symbols: BASE_ALPHABET.bytes().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, c: char) -> bool {
        c.is_ascii() && self.symbols.contains(&(c as u8))
    }

    /// 按下标取字符，调用方保证 `index < len()`
    pub(crate) fn symbol(&self, index: usize) -> char {
        char::from(self.symbols[index])
    }

    pub fn as_str(&self) -> &str {
        // 基础字符表全为 ASCII
        std::str::from_utf8(&self.symbols).unwrap_or_default()
    }
}

impl Default for CodeAlphabet {
    fn default() -> Self {
        Self::full()
    }
}
