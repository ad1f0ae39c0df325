//! 安全随机源
//!
//! 兑换码的不可猜测性依赖密码学安全的随机数。生产使用操作系统熵源，
//! 测试使用可复现种子的 CSPRNG。取不到随机数时直接报错，不做降级。

use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{CryptoRng, RngCore, SeedableRng, TryRngCore};

use crate::error::{RedemptionError, Result};

/// 安全随机源
pub trait SecureRandomSource: Send + Sync {
    /// 用随机字节填满 `dest`
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()>;
}

/// 操作系统熵源
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandomSource;

impl SecureRandomSource for OsRandomSource {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| RedemptionError::RandomSource(e.to_string()))
    }
}

/// 基于种子的 CSPRNG，用于可复现的测试
pub struct SeededRandomSource<R = StdRng> {
    rng: Mutex<R>,
}

impl SeededRandomSource<StdRng> {
    pub fn from_seed_u64(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: CryptoRng + Send> SeededRandomSource<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl<R: CryptoRng + Send> SecureRandomSource for SeededRandomSource<R> {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        RngCore::fill_bytes(&mut *self.rng.lock(), dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_source_fills_buffer() {
        let source = OsRandomSource;
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        source.fill_bytes(&mut a).unwrap();
        source.fill_bytes(&mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_seeded_source_is_reproducible() {
        let first = SeededRandomSource::from_seed_u64(42);
        let second = SeededRandomSource::from_seed_u64(42);
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        first.fill_bytes(&mut a).unwrap();
        second.fill_bytes(&mut b).unwrap();
        assert_eq!(a, b);
    }
}
