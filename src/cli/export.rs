use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::storage::SimilarityIndex;

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// 输出文件路径
    #[arg(default_value = "embeddings.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        block_in_place(|| -> Result<()> {
            let index = SimilarityIndex::load(&opts.conf_dir)?;
            write_npy(&self.output, &index.vectors().as_matrix())?;
            info!("已导出 {} 个向量到 {}", index.len(), self.output.display());
            Ok(())
        })
    }
}
