use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::error::{Error, Result};

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "visearch", "visearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or("index")
}

/// 图片预处理参数，必须与特征提取模型训练时使用的参数一致
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    /// 缩放后图片短边的长度
    #[arg(long, value_name = "SIZE", default_value_t = 256)]
    pub resize: u32,
    /// 中心裁剪的正方形边长
    #[arg(long, value_name = "SIZE", default_value_t = 224)]
    pub crop: u32,
    /// RGB 三个通道的均值
    #[arg(long, value_name = "R,G,B", value_parser = parse_triplet, default_value = "0.485,0.456,0.406")]
    pub mean: [f32; 3],
    /// RGB 三个通道的标准差
    #[arg(long, value_name = "R,G,B", value_parser = parse_triplet, default_value = "0.229,0.224,0.225")]
    pub std: [f32; 3],
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self { resize: 256, crop: 224, mean: [0.485, 0.456, 0.406], std: [0.229, 0.224, 0.225] }
    }
}

impl NormalizeOptions {
    /// 检查参数是否合法
    pub fn validate(&self) -> Result<()> {
        if self.crop == 0 || self.resize == 0 {
            return Err(Error::InvalidOptions("resize 和 crop 必须大于 0".to_string()));
        }
        if self.crop > self.resize {
            return Err(Error::InvalidOptions(format!(
                "crop ({}) 不能大于 resize ({})",
                self.crop, self.resize
            )));
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.) {
            return Err(Error::InvalidOptions("std 必须为正数".to_string()));
        }
        Ok(())
    }
}

/// 内置特征提取器参数
#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// 网格池化的边长，向量维数为 3 * grid * grid
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub grid: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的最近邻数量
    #[arg(short, value_name = "K", default_value_t = 10)]
    pub k: usize,
    /// 允许的最大距离（欧氏距离的平方），超过该距离的结果会被过滤
    #[arg(long, value_name = "DISTANCE", env = "VISEARCH_MAX_DISTANCE")]
    pub max_distance: Option<f32>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "visearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 索引文件所在目录
    #[arg(short, long, env = "VISEARCH_CONF_DIR", default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描图片目录并构建索引，会替换已有的索引
    Build(BuildCommand),
    /// 从索引中搜索相似图片
    Search(SearchCommand),
    /// 显示索引信息
    Show(ShowCommand),
    /// 导出所有特征向量为 npy 文件
    Export(ExportCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回向量文件的路径
    pub fn vectors(&self) -> PathBuf {
        self.path.join("index.flat")
    }

    /// 返回向量文件的临时路径
    pub fn vectors_tmp(&self) -> PathBuf {
        self.path.join("index.flat.tmp")
    }

    /// 返回元数据文件的路径
    pub fn metadata(&self) -> PathBuf {
        self.path.join("metadata.json")
    }

    /// 返回元数据文件的临时路径
    pub fn metadata_tmp(&self) -> PathBuf {
        self.path.join("metadata.json.tmp")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_triplet(s: &str) -> anyhow::Result<[f32; 3]> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [r, g, b] => Ok([*r, *g, *b]),
        _ => Err(anyhow::anyhow!("需要三个以逗号分隔的数值: {}", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_triplet_values() {
        assert_eq!(parse_triplet("0.5, 0.25,1").unwrap(), [0.5, 0.25, 1.0]);
        assert!(parse_triplet("0.5,0.25").is_err());
        assert!(parse_triplet("a,b,c").is_err());
    }

    #[test]
    fn reject_crop_larger_than_resize() {
        let opts = NormalizeOptions { resize: 100, crop: 128, ..Default::default() };
        assert!(matches!(opts.validate(), Err(Error::InvalidOptions(_))));
        assert!(NormalizeOptions::default().validate().is_ok());
    }

    #[test]
    fn conf_dir_paths() {
        let dir = ConfDir::new("/tmp/idx");
        assert_eq!(dir.vectors(), PathBuf::from("/tmp/idx/index.flat"));
        assert_eq!(dir.metadata(), PathBuf::from("/tmp/idx/metadata.json"));
    }
}
