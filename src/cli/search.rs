use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, NormalizeOptions, Opts, SearchOptions};
use crate::extractor::GridPoolExtractor;
use crate::preprocess::Preprocessor;
use crate::searcher::{Match, Searcher};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub normalize: NormalizeOptions,
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let preprocessor = Preprocessor::new(self.normalize.clone())?;
        let extractor = Arc::new(GridPoolExtractor::new(self.extractor.grid));

        let result = block_in_place(|| -> crate::Result<_> {
            let searcher = Searcher::open(&opts.conf_dir, preprocessor, extractor)?
                .with_max_distance(self.search.max_distance);
            let start = Instant::now();
            let result = searcher.query_path(&self.image, self.search.k)?;
            debug!("搜索耗时: {:.2}ms", start.elapsed().as_secs_f32() * 1000.);
            Ok(result)
        })?;

        print_result(&result, self.output_format)
    }
}

fn print_result(result: &[Match], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for m in result {
                println!(
                    "{:.4}\t{}\t{}",
                    m.distance,
                    m.record.display_name(),
                    m.record.source_path().display()
                );
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
