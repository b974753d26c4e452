use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 默认的图片访问地址前缀
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:8001/uploads/local_dataset";

/// 一张已索引图片的元数据，`id` 与其向量在索引中的位置一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    id: u64,
    source_path: PathBuf,
    stored_path: Option<PathBuf>,
    display_name: String,
    price: String,
    #[serde(rename = "imageURL")]
    image_url: String,
}

impl ImageRecord {
    pub fn new(
        id: u64,
        source_path: PathBuf,
        stored_path: Option<PathBuf>,
        display_name: String,
        price: String,
        image_url: String,
    ) -> Result<Self> {
        let record = Self { id, source_path, stored_path, display_name, price, image_url };
        record.validate()?;
        Ok(record)
    }

    /// 检查记录字段是否合法，反序列化得到的记录也需要调用
    pub fn validate(&self) -> Result<()> {
        if self.source_path.as_os_str().is_empty() {
            return Err(Error::InvalidRecord(format!("记录 {} 的原始路径为空", self.id)));
        }
        if self.display_name.trim().is_empty() {
            return Err(Error::InvalidRecord(format!("记录 {} 的名称为空", self.id)));
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn stored_path(&self) -> Option<&Path> {
        self.stored_path.as_deref()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn price(&self) -> &str {
        &self.price
    }

    pub fn image_url(&self) -> &str {
        &self.image_url
    }
}

/// 与向量索引按位置对齐的元数据列表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    records: Vec<ImageRecord>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从记录列表创建，要求记录 ID 从 0 开始连续递增
    pub fn from_records(records: Vec<ImageRecord>) -> Result<Self> {
        let mut store = Self { records: Vec::with_capacity(records.len()) };
        for record in records {
            store.push(record)?;
        }
        Ok(store)
    }

    /// 追加一条记录，其 ID 必须等于当前记录数量
    pub fn push(&mut self, record: ImageRecord) -> Result<()> {
        record.validate()?;
        if record.id != self.records.len() as u64 {
            return Err(Error::InvalidRecord(format!(
                "记录 ID 不连续：期望 {}，实际 {}",
                self.records.len(),
                record.id
            )));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&ImageRecord> {
        usize::try_from(id).ok().and_then(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }
}

/// 构建索引时为每张图片生成元数据
///
/// 只确定副本的保存位置，实际复制由 [`StagedCopies`] 在索引保存前后完成
pub struct RecordFactory {
    /// 图片副本的保存目录，为 `None` 时不复制
    upload_dir: Option<PathBuf>,
    public_url: String,
    rng: StdRng,
}

impl RecordFactory {
    /// # Arguments
    ///
    /// * `upload_dir` - 图片副本的保存目录
    /// * `public_url` - 图片访问地址前缀
    /// * `price_seed` - 价格随机数种子，为 `None` 时使用系统随机源
    pub fn new(upload_dir: Option<PathBuf>, public_url: &str, price_seed: Option<u64>) -> Self {
        let rng = match price_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { upload_dir, public_url: public_url.trim_end_matches('/').to_string(), rng }
    }

    /// 为扫描目录 `root` 下的图片创建记录
    ///
    /// 副本路径与访问地址保留图片相对于 `root` 的路径，不同子目录中的同名图片互不覆盖
    pub fn create(&mut self, id: u64, root: &Path, source: &Path) -> Result<ImageRecord> {
        let file_name = source
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| Error::InvalidRecord(format!("无效的图片路径: {}", source.display())))?;
        let stem = source.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let mut name = display_name(&stem);
        if name.trim().is_empty() {
            name = file_name.clone();
        }

        let relative = source
            .strip_prefix(root)
            .ok()
            .filter(|rel| rel.file_name().is_some())
            .unwrap_or(Path::new(&file_name));
        let stored_path = self.upload_dir.as_ref().map(|dir| dir.join(relative));

        // 价格只是占位值，与图片内容无关
        let price = format!("${}", self.rng.random_range(20..200));
        let url_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let image_url = format!("{}/{}", self.public_url, url_path);

        ImageRecord::new(id, source.to_path_buf(), stored_path, name, price, image_url)
    }
}

/// 已复制到临时位置、等待提交的图片副本
#[derive(Debug, Default)]
pub struct StagedCopies {
    /// (临时路径, 最终路径)
    files: Vec<(PathBuf, PathBuf)>,
}

impl StagedCopies {
    /// 将记录中的图片复制到临时位置，复制失败的记录会清空 `storedPath`
    pub fn stage(store: &mut MetadataStore) -> Self {
        let mut files = vec![];
        for record in &mut store.records {
            let Some(target) = record.stored_path.clone() else {
                continue;
            };
            let staging = staging_path(&target);
            let copied = target
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::copy(&record.source_path, &staging));
            match copied {
                Ok(_) => files.push((staging, target)),
                Err(e) => {
                    warn!("复制图片失败 {}: {}", record.source_path.display(), e);
                    record.stored_path = None;
                }
            }
        }
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 将副本移动到最终位置
    pub fn commit(self) {
        for (staging, target) in self.files {
            if let Err(e) = fs::rename(&staging, &target) {
                warn!("移动图片副本失败 {}: {}", target.display(), e);
            }
        }
    }

    /// 删除所有临时副本
    pub fn discard(self) {
        for (staging, _) in self.files {
            if let Err(e) = fs::remove_file(&staging) {
                warn!("删除临时副本失败 {}: {}", staging.display(), e);
            }
        }
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target.file_name().map(|s| s.to_string_lossy()).unwrap_or_default();
    target.with_file_name(format!(".{name}.staged"))
}

/// 由文件名生成展示名称：下划线替换为空格，每个单词首字母大写
pub fn display_name(stem: &str) -> String {
    let mut name = String::with_capacity(stem.len());
    let mut in_word = false;
    for ch in stem.chars().map(|c| if c == '_' { ' ' } else { c }) {
        if ch.is_alphabetic() {
            if in_word {
                name.extend(ch.to_lowercase());
            } else {
                name.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            name.push(ch);
            in_word = false;
        }
    }
    name
}
