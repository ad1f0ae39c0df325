//! 数据模型
//!
//! 兑换码批次、一次性兑换码、多次使用兑换记录及其写入参数

mod batch;
mod code;
mod enums;

pub use batch::*;
pub use code::*;
pub use enums::*;

#[cfg(test)]
pub(crate) use batch::fixtures;
