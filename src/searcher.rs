use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use ndarray::{Array2, Array4, Axis, stack};
use serde::Serialize;

use crate::config::ConfDir;
use crate::error::{Error, Result};
use crate::extractor::Extractor;
use crate::index::Neighbor;
use crate::metadata::ImageRecord;
use crate::preprocess::Preprocessor;
use crate::storage::SimilarityIndex;

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub id: u64,
    /// 欧氏距离的平方
    pub distance: f32,
    pub record: ImageRecord,
}

/// 查询句柄
///
/// 加载后只读，可以通过 `Arc` 在多个线程间共享
pub struct Searcher {
    index: SimilarityIndex,
    preprocessor: Preprocessor,
    extractor: Arc<dyn Extractor>,
    max_distance: Option<f32>,
}

impl Searcher {
    /// 预处理参数与特征提取器必须与构建索引时一致，否则返回 `InvalidOptions`
    pub fn new(
        index: SimilarityIndex,
        preprocessor: Preprocessor,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self> {
        index.profile().check(preprocessor.options(), extractor.name())?;
        Ok(Self { index, preprocessor, extractor, max_distance: None })
    }

    /// 从索引目录加载，索引不存在或不完整时返回 `IndexNotFound`
    pub fn open(
        conf_dir: &ConfDir,
        preprocessor: Preprocessor,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self> {
        let index = SimilarityIndex::load(conf_dir)?;
        debug!("已加载索引: {} 个向量", index.len());
        Self::new(index, preprocessor, extractor)
    }

    /// 设置允许的最大距离，超过该距离的结果会被过滤
    pub fn with_max_distance(mut self, max_distance: Option<f32>) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.index.vectors().dimension()
    }

    /// 搜索与图片最相似的 k 张图片，按距离升序返回
    ///
    /// # Arguments
    ///
    /// * `image` - 编码后的图片数据
    /// * `k` - 返回的最近邻数量
    pub fn query(&self, image: &[u8], k: usize) -> Result<Vec<Match>> {
        let tensor = self.preprocessor.decode_bytes(image)?;
        let embeddings = self.embed(tensor.insert_axis(Axis(0)))?;
        let query = embeddings.row(0).to_vec();
        self.query_vector(&query, k)
    }

    /// 读取图片文件并搜索
    pub fn query_path(&self, path: impl AsRef<Path>, k: usize) -> Result<Vec<Match>> {
        let bytes = fs::read(path.as_ref())?;
        self.query(&bytes, k)
    }

    /// 批量搜索多张图片，特征提取只调用一次
    pub fn query_batch<B: AsRef<[u8]>>(&self, images: &[B], k: usize) -> Result<Vec<Vec<Match>>> {
        if images.is_empty() {
            return Ok(vec![]);
        }
        let tensors = images
            .iter()
            .map(|image| self.preprocessor.decode_bytes(image.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let views = tensors.iter().map(|t| t.view()).collect::<Vec<_>>();
        let batch = stack(Axis(0), &views).expect("tensors share the same shape");

        let embeddings = self.embed(batch)?;
        let neighbors = self.index.vectors().batch_search(embeddings.view(), k)?;
        Ok(neighbors.into_iter().map(|n| self.resolve(n)).collect())
    }

    /// 使用已经提取好的特征向量搜索
    pub fn query_vector(&self, query: &[f32], k: usize) -> Result<Vec<Match>> {
        let neighbors = self.index.vectors().search(query, k)?;
        Ok(self.resolve(neighbors))
    }

    fn embed(&self, batch: Array4<f32>) -> Result<Array2<f32>> {
        let embeddings = self.extractor.extract(batch.view()).map_err(Error::extraction)?;
        if embeddings.nrows() != batch.len_of(Axis(0)) {
            return Err(Error::extraction(format!(
                "输入 {} 张图片，特征提取器返回 {} 个向量",
                batch.len_of(Axis(0)),
                embeddings.nrows()
            )));
        }
        Ok(embeddings)
    }

    fn resolve(&self, neighbors: Vec<Neighbor>) -> Vec<Match> {
        neighbors
            .into_iter()
            .filter(|n| self.max_distance.is_none_or(|max| n.distance <= max))
            .filter_map(|n| {
                let record = self.index.metadata().get(n.id)?.clone();
                Some(Match { id: n.id, distance: n.distance, record })
            })
            .collect()
    }
}
