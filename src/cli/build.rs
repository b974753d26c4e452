use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, NormalizeOptions, Opts};
use crate::extractor::GridPoolExtractor;
use crate::metadata::{DEFAULT_PUBLIC_URL, RecordFactory};
use crate::pipeline::{BuildOptions, BuildOutcome, IndexBuilder};
use crate::preprocess::Preprocessor;
use crate::scan::{CorpusScanner, DEFAULT_SUFFIX};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub normalize: NormalizeOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    /// 图片所在目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 同时扫描子目录
    #[arg(short, long)]
    pub recursive: bool,
    /// 每次送入特征提取器的图片数量
    #[arg(long, value_name = "SIZE", default_value_t = 32)]
    pub batch_size: usize,
    /// 等待特征提取的批次上限
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub queue_depth: usize,
    /// 图片副本的保存目录
    #[arg(long, value_name = "DIR", default_value = "uploads/local_dataset")]
    pub upload_dir: PathBuf,
    /// 不复制图片，记录中的 storedPath 为空
    #[arg(long)]
    pub no_copy: bool,
    /// 图片访问地址前缀
    #[arg(long, value_name = "URL", default_value = DEFAULT_PUBLIC_URL)]
    pub public_url: String,
    /// 价格随机数种子，指定后构建结果可以复现
    #[arg(long, value_name = "SEED")]
    pub price_seed: Option<u64>,
    /// 构建超时时间（秒）
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let preprocessor = Preprocessor::new(self.normalize.clone())?;
        let extractor = Arc::new(GridPoolExtractor::new(self.extractor.grid));
        let upload_dir = (!self.no_copy).then(|| self.upload_dir.clone());
        let records = RecordFactory::new(upload_dir, &self.public_url, self.price_seed);
        let build_opts = BuildOptions {
            batch_size: self.batch_size,
            queue_depth: self.queue_depth,
            timeout: self.timeout.map(Duration::from_secs),
        };

        let pb = ProgressBar::no_length().with_style(pb_style());
        let outcome = IndexBuilder::new(opts.conf_dir.clone(), preprocessor, extractor)
            .scanner(CorpusScanner::new(&self.suffix, self.recursive))
            .records(records)
            .options(build_opts)
            .progress(pb.clone())
            .build(&self.path)
            .await;

        match outcome? {
            BuildOutcome::Built { count, dimension, skipped } => {
                pb.finish_with_message("索引构建完成");
                info!("共 {} 张图片，向量维数 {}，跳过 {} 张", count, dimension, skipped);
                info!("索引目录: {}", opts.conf_dir.path().display());
            }
            BuildOutcome::EmptyCorpus => {
                pb.finish_and_clear();
                warn!("没有可索引的图片，已有索引保持不变");
            }
            BuildOutcome::NoValidImages { skipped } => {
                pb.finish_and_clear();
                warn!("{} 张图片均无法解码，已有索引保持不变", skipped);
            }
        }
        Ok(())
    }
}
