use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use walkdir::WalkDir;

/// 默认扫描的图片后缀名
pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png,webp";

/// 图片目录扫描器
#[derive(Debug, Clone)]
pub struct CorpusScanner {
    re_suf: Regex,
    recursive: bool,
}

impl CorpusScanner {
    /// 创建扫描器
    ///
    /// # Arguments
    ///
    /// * `suffix` - 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    /// * `recursive` - 是否扫描子目录
    pub fn new(suffix: &str, recursive: bool) -> Self {
        let alternatives =
            suffix.split(',').map(|s| regex::escape(s.trim())).collect::<Vec<_>>().join("|");
        let re_suf = format!("(?i)^({})$", alternatives);
        let re_suf = Regex::new(&re_suf).expect("failed to build regex");
        Self { re_suf, recursive }
    }

    /// 判断文件后缀名是否在允许列表中
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| self.re_suf.is_match(&ext.to_string_lossy()))
    }

    /// 按文件名顺序惰性地遍历目录下的候选图片
    ///
    /// 目录不存在或为空时返回空序列，不视为错误
    pub fn scan(&self, root: &Path) -> impl Iterator<Item = PathBuf> + Send + use<> {
        debug!("开始扫描目录: {}", root.display());
        let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name();
        if !self.recursive {
            walker = walker.max_depth(1);
        }
        let scanner = self.clone();
        walker.into_iter().filter_map(move |entry| {
            let entry = entry.ok()?;
            if !entry.file_type().is_file() {
                return None;
            }
            let path = entry.into_path();
            scanner.accepts(&path).then_some(path)
        })
    }
}

impl Default for CorpusScanner {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX, false)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn filter_by_suffix() {
        let dir = TempDir::new().unwrap();
        for name in ["b.JPG", "a.png", "c.txt", "d.webp", "e.jpeg", "noext", "f.png.bak"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let names = CorpusScanner::default()
            .scan(dir.path())
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["a.png", "b.JPG", "d.webp", "e.jpeg"]);
    }

    #[test]
    fn recursive_scan() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.jpg"), b"").unwrap();
        fs::write(dir.path().join("sub").join("b.jpg"), b"").unwrap();

        assert_eq!(CorpusScanner::new("jpg", false).scan(dir.path()).count(), 1);
        assert_eq!(CorpusScanner::new("jpg", true).scan(dir.path()).count(), 2);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert_eq!(CorpusScanner::default().scan(&missing).count(), 0);
        assert_eq!(CorpusScanner::default().scan(dir.path()).count(), 0);
    }
}
