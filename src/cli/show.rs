use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::storage::SimilarityIndex;

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 同时列出所有图片记录
    #[arg(long)]
    pub records: bool,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let conf_dir = &opts.conf_dir;
        let index = block_in_place(|| SimilarityIndex::load(conf_dir))?;

        println!("向量文件: {}", conf_dir.vectors().display());
        println!("元数据  : {}", conf_dir.metadata().display());
        println!("图片数量: {}", index.len());
        match index.vectors().dimension() {
            Some(dim) => println!("向量维数: {}", dim),
            None => println!("向量维数: -"),
        }

        let profile = index.profile();
        let normalize = &profile.normalize;
        println!("特征提取: {}", profile.extractor);
        println!("预处理  : resize {} / crop {}", normalize.resize, normalize.crop);
        println!("          mean {:?} / std {:?}", normalize.mean, normalize.std);

        if self.records {
            for record in index.metadata().records() {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.id(),
                    record.display_name(),
                    record.price(),
                    record.image_url()
                );
            }
        }
        Ok(())
    }
}
