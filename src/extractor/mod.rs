mod pool;

use anyhow::Result;
use ndarray::{Array2, ArrayView4};
pub use pool::GridPoolExtractor;

/// 特征提取器，将一批归一化的图片映射为固定长度的向量
///
/// 实现必须满足以下约定：
/// - 每张输入图片输出一行，顺序与输入一致，不能丢弃或增加
/// - 对相同的输入和模型状态，输出是确定的
/// - 所有输出向量的维数相同
pub trait Extractor: Send + Sync {
    /// 提取器名称，用于日志
    fn name(&self) -> &str;

    /// 对非空的一批图片（n x 3 x h x w）提取特征，返回 n x d 的矩阵
    ///
    /// 返回错误时整个构建过程都会中止
    fn extract(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>>;
}
