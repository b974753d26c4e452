use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::ProgressBar;
use log::{debug, info, warn};
use rayon::prelude::*;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::task::{JoinHandle, spawn_blocking};

use crate::batch::collate;
use crate::config::ConfDir;
use crate::error::{Error, Result};
use crate::extractor::Extractor;
use crate::index::FlatL2Index;
use crate::metadata::{DEFAULT_PUBLIC_URL, MetadataStore, RecordFactory, StagedCopies};
use crate::preprocess::{LoadedImage, Preprocessor};
use crate::scan::CorpusScanner;
use crate::storage::{IndexProfile, SimilarityIndex};

/// 构建流程的参数
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// 每次送入特征提取器的图片数量
    pub batch_size: usize,
    /// 解码与特征提取之间最多缓存的批次数量
    pub queue_depth: usize,
    /// 整个构建过程的超时时间
    pub timeout: Option<Duration>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { batch_size: 32, queue_depth: 2, timeout: None }
    }
}

impl BuildOptions {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.queue_depth == 0 {
            let reason = "batch_size 和 queue_depth 必须大于 0".to_string();
            return Err(Error::InvalidOptions(reason));
        }
        Ok(())
    }
}

/// 一次构建的结果，只有 `Built` 会写入索引文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built { count: usize, dimension: usize, skipped: usize },
    /// 目录中没有任何候选图片
    EmptyCorpus,
    /// 所有候选图片均解码失败
    NoValidImages { skipped: usize },
}

// 特征提取阶段的产出
struct Embedded {
    index: FlatL2Index,
    metadata: MetadataStore,
    skipped: usize,
}

/// 索引构建器
///
/// 扫描目录、解码图片、批量提取特征，成功后用新索引整体替换旧索引
pub struct IndexBuilder {
    conf_dir: ConfDir,
    scanner: CorpusScanner,
    preprocessor: Preprocessor,
    extractor: Arc<dyn Extractor>,
    records: RecordFactory,
    opts: BuildOptions,
    pb: ProgressBar,
}

impl IndexBuilder {
    pub fn new(
        conf_dir: ConfDir,
        preprocessor: Preprocessor,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            conf_dir,
            scanner: CorpusScanner::default(),
            preprocessor,
            extractor,
            records: RecordFactory::new(None, DEFAULT_PUBLIC_URL, None),
            opts: BuildOptions::default(),
            pb: ProgressBar::hidden(),
        }
    }

    pub fn scanner(mut self, scanner: CorpusScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn records(mut self, records: RecordFactory) -> Self {
        self.records = records;
        self
    }

    pub fn options(mut self, opts: BuildOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// 构建索引并保存
    ///
    /// 特征提取失败、维数不一致或超时都会中止构建，此时不会写入任何文件，
    /// 图片副本也只在索引保存成功后才出现在上传目录中
    pub async fn build(self, root: &Path) -> Result<BuildOutcome> {
        self.opts.validate()?;
        let Self { conf_dir, scanner, preprocessor, extractor, records, opts, pb } = self;
        info!("开始构建索引: {}，特征提取器: {}", root.display(), extractor.name());
        let profile = IndexProfile::new(preprocessor.options().clone(), extractor.name());

        let stages = Stages { scanner, preprocessor, extractor, records, pb };
        let cancelled = Arc::new(AtomicBool::new(false));
        let run = stages.run(root.to_path_buf(), &opts, cancelled.clone());
        let (candidates, embedded) = match opts.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, run).await {
                Ok(result) => result?,
                Err(_) => {
                    // 后台线程在处理完当前批次后退出
                    cancelled.store(true, Ordering::Relaxed);
                    return Err(Error::Timeout(timeout));
                }
            },
            None => run.await?,
        };

        if candidates == 0 {
            warn!("目录中没有找到图片: {}", root.display());
            return Ok(BuildOutcome::EmptyCorpus);
        }
        let Embedded { index, mut metadata, skipped } = embedded;
        if index.is_empty() {
            warn!("{} 张图片全部解码失败，索引保持不变", skipped);
            return Ok(BuildOutcome::NoValidImages { skipped });
        }

        let count = index.len();
        let dimension = index.dimension().unwrap_or(0);
        spawn_blocking(move || {
            let copies = StagedCopies::stage(&mut metadata);
            let saved = SimilarityIndex::new(index, metadata, profile)
                .and_then(|index| index.save(&conf_dir));
            match saved {
                Ok(()) => {
                    debug!("提交 {} 个图片副本", copies.len());
                    copies.commit();
                    Ok(())
                }
                Err(e) => {
                    copies.discard();
                    Err(e)
                }
            }
        })
        .await??;
        info!("索引构建完成：{} 张图片，维数 {}，跳过 {} 张", count, dimension, skipped);
        Ok(BuildOutcome::Built { count, dimension, skipped })
    }
}

struct Stages {
    scanner: CorpusScanner,
    preprocessor: Preprocessor,
    extractor: Arc<dyn Extractor>,
    records: RecordFactory,
    pb: ProgressBar,
}

impl Stages {
    /// 返回候选图片总数与特征提取的结果
    async fn run(
        self,
        root: PathBuf,
        opts: &BuildOptions,
        cancelled: Arc<AtomicBool>,
    ) -> Result<(usize, Embedded)> {
        let Self { scanner, preprocessor, extractor, records, pb } = self;
        let (tx, rx) = channel(opts.queue_depth);
        let (batch_size, stop) = (opts.batch_size, cancelled.clone());
        let t1 =
            task_load(root.clone(), scanner, preprocessor, batch_size, tx, stop, pb.clone());
        let t2 = task_embed(root, rx, extractor, records, cancelled, pb);

        let (loaded, embedded) = tokio::join!(t1, t2);
        // 特征提取阶段的错误是导致解码阶段提前结束的原因，优先返回
        let embedded = embedded??;
        Ok((loaded?, embedded))
    }
}

/// 按批次解码图片，返回候选图片总数
///
/// 每个批次内部使用 rayon 并行解码，`collect` 保证批次内的顺序与扫描顺序一致
fn task_load(
    root: PathBuf,
    scanner: CorpusScanner,
    preprocessor: Preprocessor,
    batch_size: usize,
    tx: Sender<Vec<LoadedImage>>,
    cancelled: Arc<AtomicBool>,
    pb: ProgressBar,
) -> JoinHandle<usize> {
    spawn_blocking(move || {
        let mut candidates = scanner.scan(&root);
        let mut total = 0;
        // 没有长度的进度条不会累加 inc_length
        pb.set_length(0);
        while !cancelled.load(Ordering::Relaxed) {
            let window = candidates.by_ref().take(batch_size).collect::<Vec<_>>();
            if window.is_empty() {
                break;
            }
            total += window.len();
            pb.inc_length(window.len() as u64);

            let loaded =
                window.into_par_iter().map(|path| preprocessor.load(path)).collect::<Vec<_>>();
            // NOTE: 接收端关闭说明特征提取已经失败，没有必要继续解码
            if tx.blocking_send(loaded).is_err() {
                debug!("特征提取阶段已退出，停止解码");
                break;
            }
        }
        debug!("扫描完成，共 {} 张候选图片", total);
        total
    })
}

/// 逐批提取特征，写入索引与元数据
fn task_embed(
    root: PathBuf,
    mut rx: Receiver<Vec<LoadedImage>>,
    extractor: Arc<dyn Extractor>,
    mut records: RecordFactory,
    cancelled: Arc<AtomicBool>,
    pb: ProgressBar,
) -> JoinHandle<Result<Embedded>> {
    spawn_blocking(move || {
        let mut index = FlatL2Index::new();
        let mut metadata = MetadataStore::new();
        let mut skipped = 0;

        while let Some(window) = rx.blocking_recv() {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            let window_len = window.len() as u64;
            for item in &window {
                if let Some(e) = item.error() {
                    warn!("{}", e);
                    pb.set_message(format!("跳过: {}", item.path.display()));
                    skipped += 1;
                }
            }
            let Some(batch) = collate(window) else {
                pb.inc(window_len);
                continue;
            };

            let embeddings = extractor.extract(batch.view()).map_err(Error::extraction)?;
            if embeddings.nrows() != batch.len() {
                return Err(Error::extraction(format!(
                    "输入 {} 张图片，特征提取器返回 {} 个向量",
                    batch.len(),
                    embeddings.nrows()
                )));
            }
            let ids = index.add_matrix(embeddings.view())?;
            debug!("已添加向量 {:?}", ids);

            for path in &batch.paths {
                let record = records.create(metadata.len() as u64, &root, path)?;
                metadata.push(record)?;
            }
            if let Some(path) = batch.paths.last() {
                pb.set_message(path.display().to_string());
            }
            pb.inc(window_len);
        }

        Ok(Embedded { index, metadata, skipped })
    })
}
