mod topk;

use std::ops::Range;

use log::debug;
use ndarray::ArrayView2;
use rayon::prelude::*;
pub use topk::*;

use crate::error::{Error, Result};

/// 向量数量超过该值时使用 rayon 并行计算距离
pub const PARALLEL_THRESHOLD: usize = 4096;
/// 并行计算时每个任务处理的向量数量
const PARALLEL_CHUNK_SIZE: usize = 1024;

/// 暴力搜索的扁平 L2 索引
///
/// 向量按插入顺序连续存储，第 i 个插入的向量 ID 为 i。
/// 维数在第一次插入时确定，之后所有向量的维数必须与之一致
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatL2Index {
    /// 向量维数，0 表示尚未确定
    dim: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从连续存储的向量数据创建索引
    pub fn from_raw(dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 {
            if !data.is_empty() {
                return Err(Error::DimensionMismatch { expected: 0, actual: data.len() });
            }
            return Ok(Self::new());
        }
        if data.len() % dim != 0 {
            return Err(Error::DimensionMismatch { expected: dim, actual: data.len() % dim });
        }
        Ok(Self { dim, data })
    }

    /// 向量维数，空索引返回 `None`
    pub fn dimension(&self) -> Option<usize> {
        (self.dim != 0).then_some(self.dim)
    }

    /// 索引中的向量数量
    pub fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有向量按插入顺序连续存储的数据
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// 以 n x d 矩阵的形式查看所有向量
    pub fn as_matrix(&self) -> ArrayView2<'_, f32> {
        ArrayView2::from_shape((self.len(), self.dim), &self.data)
            .expect("data length is always a multiple of dim")
    }

    /// 获取指定 ID 的向量
    pub fn vector(&self, id: u64) -> Option<&[f32]> {
        let id = usize::try_from(id).ok()?;
        if id >= self.len() {
            return None;
        }
        Some(&self.data[id * self.dim..(id + 1) * self.dim])
    }

    /// 按顺序添加一组向量，返回分配的 ID 范围
    ///
    /// 任意一个向量维数不匹配时返回 `DimensionMismatch`，且索引保持不变
    pub fn add<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<Range<u64>> {
        let start = self.len() as u64;
        let Some(first) = vectors.first() else {
            return Ok(start..start);
        };
        let dim = if self.dim == 0 { first.as_ref().len() } else { self.dim };
        for v in vectors {
            let v = v.as_ref();
            if v.is_empty() || v.len() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: v.len() });
            }
        }

        self.dim = dim;
        self.data.reserve(vectors.len() * dim);
        for v in vectors {
            self.data.extend_from_slice(v.as_ref());
        }
        Ok(start..start + vectors.len() as u64)
    }

    /// 按行添加一个 n x d 矩阵
    pub fn add_matrix(&mut self, vectors: ArrayView2<'_, f32>) -> Result<Range<u64>> {
        let rows = vectors.outer_iter().map(|row| row.to_vec()).collect::<Vec<_>>();
        self.add(&rows)
    }

    /// 搜索与查询向量距离最近的 k 个向量，按距离升序返回，距离相同时按 ID 升序
    ///
    /// 索引为空时返回空结果，向量数量少于 k 时返回全部向量
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search_with_threshold(query, k, PARALLEL_THRESHOLD)
    }

    /// 批量搜索多个查询向量
    pub fn batch_search(
        &self,
        queries: ArrayView2<'_, f32>,
        k: usize,
    ) -> Result<Vec<Vec<Neighbor>>> {
        queries
            .outer_iter()
            .map(|query| match query.as_slice() {
                Some(query) => self.search(query, k),
                None => self.search(&query.to_vec(), k),
            })
            .collect()
    }

    fn search_with_threshold(
        &self,
        query: &[f32],
        k: usize,
        parallel_threshold: usize,
    ) -> Result<Vec<Neighbor>> {
        if self.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.len() });
        }

        let topk = if self.len() >= parallel_threshold {
            debug!("并行搜索 {} 个向量", self.len());
            self.data
                .par_chunks(PARALLEL_CHUNK_SIZE * self.dim)
                .enumerate()
                .map(|(chunk_no, chunk)| {
                    self.scan(query, chunk, (chunk_no * PARALLEL_CHUNK_SIZE) as u64, k)
                })
                .reduce(|| TopKNeighbors::new(k), TopKNeighbors::merge)
        } else {
            self.scan(query, &self.data, 0, k)
        };

        Ok(topk.into_sorted_vec())
    }

    // 扫描一段连续的向量，offset 为这段向量中第一个向量的 ID
    fn scan(&self, query: &[f32], data: &[f32], offset: u64, k: usize) -> TopKNeighbors {
        let mut topk = TopKNeighbors::new(k);
        for (i, v) in data.chunks_exact(self.dim).enumerate() {
            topk.push(Neighbor { id: offset + i as u64, distance: l2_sqr(query, v) });
        }
        topk
    }
}

/// 计算欧氏距离的平方
#[inline]
pub fn l2_sqr(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
