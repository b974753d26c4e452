use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytemuck::cast_slice;
use log::{debug, info, warn};

use crate::config::{ConfDir, NormalizeOptions};
use crate::error::{Error, Result};
use crate::index::FlatL2Index;
use crate::metadata::{ImageRecord, MetadataStore};

const MAGIC: &[u8; 4] = b"VSFL";
const VERSION: u32 = 2;
/// magic + version + dimension + count + 元数据摘要 + resize + crop + mean + std + 名称长度
const FIXED_HEADER_SIZE: u64 = 4 + 4 + 8 + 8 + 32 + 4 + 4 + 12 + 12 + 2;

/// 构建索引时使用的预处理参数和特征提取器
///
/// 查询图片必须经过相同的处理，否则得到的向量与索引不可比较
#[derive(Debug, Clone, PartialEq)]
pub struct IndexProfile {
    pub normalize: NormalizeOptions,
    pub extractor: String,
}

impl IndexProfile {
    pub fn new(normalize: NormalizeOptions, extractor: impl Into<String>) -> Self {
        Self { normalize, extractor: extractor.into() }
    }

    /// 检查查询参数是否与构建时一致
    pub fn check(&self, normalize: &NormalizeOptions, extractor: &str) -> Result<()> {
        if self.extractor != extractor {
            return Err(Error::InvalidOptions(format!(
                "特征提取器 {} 与构建索引时使用的 {} 不一致",
                extractor, self.extractor
            )));
        }
        if &self.normalize != normalize {
            return Err(Error::InvalidOptions(format!(
                "预处理参数 {:?} 与构建索引时使用的 {:?} 不一致",
                normalize, self.normalize
            )));
        }
        Ok(())
    }
}

/// 向量文件头
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHeader {
    pub dimension: u64,
    pub count: u64,
    /// 元数据文件的 BLAKE3 摘要，用于确认两个文件属于同一次构建
    pub metadata_digest: [u8; 32],
    pub profile: IndexProfile,
}

impl VectorHeader {
    /// 文件头的字节数
    pub fn size(&self) -> u64 {
        FIXED_HEADER_SIZE + self.profile.extractor.len() as u64
    }
}

/// 向量索引与元数据，两者总是成对保存和加载
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityIndex {
    vectors: FlatL2Index,
    metadata: MetadataStore,
    profile: IndexProfile,
}

impl SimilarityIndex {
    pub fn new(
        vectors: FlatL2Index,
        metadata: MetadataStore,
        profile: IndexProfile,
    ) -> Result<Self> {
        if vectors.len() != metadata.len() {
            return Err(Error::InvalidRecord(format!(
                "向量数量 ({}) 与记录数量 ({}) 不一致",
                vectors.len(),
                metadata.len()
            )));
        }
        if profile.extractor.len() > u16::MAX as usize {
            return Err(Error::InvalidOptions("特征提取器名称过长".to_string()));
        }
        Ok(Self { vectors, metadata, profile })
    }

    pub fn vectors(&self) -> &FlatL2Index {
        &self.vectors
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn profile(&self) -> &IndexProfile {
        &self.profile
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// 保存索引，先写入临时文件再替换旧文件
    ///
    /// 写入失败时旧文件保持不变
    pub fn save(&self, conf_dir: &ConfDir) -> Result<()> {
        fs::create_dir_all(conf_dir.path())?;

        let metadata = serde_json::to_vec_pretty(self.metadata.records())?;
        let header = VectorHeader {
            dimension: self.vectors.dimension().unwrap_or(0) as u64,
            count: self.vectors.len() as u64,
            metadata_digest: *blake3::hash(&metadata).as_bytes(),
            profile: self.profile.clone(),
        };

        let result = write_vectors(&conf_dir.vectors_tmp(), &header, self.vectors.as_slice())
            .and_then(|_| write_synced(&conf_dir.metadata_tmp(), &metadata));
        if let Err(e) = result {
            remove_tmp(conf_dir);
            return Err(e);
        }

        // NOTE: 元数据最后替换，中途失败时两个文件的摘要不一致，加载时会被拒绝
        fs::rename(conf_dir.vectors_tmp(), conf_dir.vectors())?;
        fs::rename(conf_dir.metadata_tmp(), conf_dir.metadata())?;
        info!("索引已保存到 {}", conf_dir.path().display());
        Ok(())
    }

    /// 加载索引，任意一个文件缺失、损坏或不匹配时返回 `IndexNotFound`
    pub fn load(conf_dir: &ConfDir) -> Result<Self> {
        let (vectors_path, metadata_path) = (conf_dir.vectors(), conf_dir.metadata());
        for path in [&vectors_path, &metadata_path] {
            if !path.is_file() {
                return Err(Error::index_not_found(format!("文件不存在: {}", path.display())));
            }
        }

        let (header, vectors) = read_vectors(&vectors_path)?;
        debug!("读取向量 {} x {}", header.count, header.dimension);

        let metadata = fs::read(&metadata_path).map_err(|e| {
            Error::index_not_found(format!("无法读取 {}: {e}", metadata_path.display()))
        })?;
        if *blake3::hash(&metadata).as_bytes() != header.metadata_digest {
            return Err(Error::index_not_found("元数据与向量文件不属于同一次构建"));
        }
        let records: Vec<ImageRecord> = serde_json::from_slice(&metadata)
            .map_err(|e| Error::index_not_found(format!("元数据格式错误: {e}")))?;
        if records.len() as u64 != header.count {
            return Err(Error::index_not_found(format!(
                "记录数量 ({}) 与向量数量 ({}) 不一致",
                records.len(),
                header.count
            )));
        }
        let metadata = MetadataStore::from_records(records)
            .map_err(|e| Error::index_not_found(format!("元数据无效: {e}")))?;

        Self::new(vectors, metadata, header.profile)
            .map_err(|e| Error::index_not_found(e.to_string()))
    }
}

/// 只读取向量文件头
pub fn read_header(path: &Path) -> Result<VectorHeader> {
    let file = File::open(path)
        .map_err(|e| Error::index_not_found(format!("无法打开 {}: {e}", path.display())))?;
    read_header_from(&mut BufReader::new(file))
}

fn read_header_from<R: Read>(reader: &mut R) -> Result<VectorHeader> {
    let corrupted = |e: std::io::Error| Error::index_not_found(format!("向量文件头损坏: {e}"));

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(corrupted)?;
    if &magic != MAGIC {
        return Err(Error::index_not_found("不是有效的向量文件"));
    }
    let version = reader.read_u32::<LittleEndian>().map_err(corrupted)?;
    if version != VERSION {
        return Err(Error::index_not_found(format!("不支持的向量文件版本: {version}")));
    }
    let dimension = reader.read_u64::<LittleEndian>().map_err(corrupted)?;
    let count = reader.read_u64::<LittleEndian>().map_err(corrupted)?;
    let mut metadata_digest = [0u8; 32];
    reader.read_exact(&mut metadata_digest).map_err(corrupted)?;

    let resize = reader.read_u32::<LittleEndian>().map_err(corrupted)?;
    let crop = reader.read_u32::<LittleEndian>().map_err(corrupted)?;
    let mut mean = [0f32; 3];
    reader.read_f32_into::<LittleEndian>(&mut mean).map_err(corrupted)?;
    let mut std = [0f32; 3];
    reader.read_f32_into::<LittleEndian>(&mut std).map_err(corrupted)?;
    let name_len = reader.read_u16::<LittleEndian>().map_err(corrupted)?;
    let mut name = vec![0u8; name_len as usize];
    reader.read_exact(&mut name).map_err(corrupted)?;
    let extractor = String::from_utf8(name)
        .map_err(|_| Error::index_not_found("特征提取器名称不是有效的 UTF-8"))?;

    let profile = IndexProfile::new(NormalizeOptions { resize, crop, mean, std }, extractor);
    Ok(VectorHeader { dimension, count, metadata_digest, profile })
}

fn read_vectors(path: &Path) -> Result<(VectorHeader, FlatL2Index)> {
    let file = File::open(path)
        .map_err(|e| Error::index_not_found(format!("无法打开 {}: {e}", path.display())))?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let header = read_header_from(&mut reader)?;

    let header_size = header.size();
    let values = header
        .dimension
        .checked_mul(header.count)
        .filter(|n| n.checked_mul(4).and_then(|n| n.checked_add(header_size)) == Some(file_len))
        .ok_or_else(|| Error::index_not_found("向量文件长度与文件头不一致"))?;

    let mut data = vec![0f32; values as usize];
    reader
        .read_f32_into::<LittleEndian>(&mut data)
        .map_err(|e| Error::index_not_found(format!("读取向量失败: {e}")))?;

    let index = FlatL2Index::from_raw(header.dimension as usize, data)
        .map_err(|e| Error::index_not_found(e.to_string()))?;
    Ok((header, index))
}

fn write_vectors(path: &Path, header: &VectorHeader, data: &[f32]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(MAGIC)?;
    writer.write_u32::<LittleEndian>(VERSION)?;
    writer.write_u64::<LittleEndian>(header.dimension)?;
    writer.write_u64::<LittleEndian>(header.count)?;
    writer.write_all(&header.metadata_digest)?;

    let IndexProfile { normalize, extractor } = &header.profile;
    writer.write_u32::<LittleEndian>(normalize.resize)?;
    writer.write_u32::<LittleEndian>(normalize.crop)?;
    for &v in normalize.mean.iter().chain(&normalize.std) {
        writer.write_f32::<LittleEndian>(v)?;
    }
    writer.write_u16::<LittleEndian>(extractor.len() as u16)?;
    writer.write_all(extractor.as_bytes())?;

    if cfg!(target_endian = "little") {
        writer.write_all(cast_slice(data))?;
    } else {
        for &v in data {
            writer.write_f32::<LittleEndian>(v)?;
        }
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn remove_tmp(conf_dir: &ConfDir) {
    for path in [conf_dir.vectors_tmp(), conf_dir.metadata_tmp()] {
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("删除临时文件失败 {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;

    fn sample(n: usize) -> SimilarityIndex {
        let mut vectors = FlatL2Index::new();
        let mut metadata = MetadataStore::new();
        for i in 0..n {
            vectors.add(&[vec![i as f32, -(i as f32), 0.5]]).unwrap();
            let record = ImageRecord::new(
                i as u64,
                PathBuf::from(format!("dataset/{i}.jpg")),
                None,
                format!("Item {i}"),
                "$42".to_string(),
                format!("http://localhost/{i}.jpg"),
            )
            .unwrap();
            metadata.push(record).unwrap();
        }
        SimilarityIndex::new(vectors, metadata, profile()).unwrap()
    }

    fn profile() -> IndexProfile {
        let normalize = NormalizeOptions { resize: 64, crop: 48, ..Default::default() };
        IndexProfile::new(normalize, "grid-pool-2")
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let conf_dir = ConfDir::new(dir.path().join("index"));
        let index = sample(4);
        index.save(&conf_dir).unwrap();

        assert!(!conf_dir.vectors_tmp().exists());
        assert!(!conf_dir.metadata_tmp().exists());
        assert_eq!(SimilarityIndex::load(&conf_dir).unwrap(), index);

        let header = read_header(&conf_dir.vectors()).unwrap();
        assert_eq!((header.dimension, header.count), (3, 4));
        assert_eq!(header.profile, profile());
    }

    #[test]
    fn profile_mismatch() {
        let profile = profile();
        assert!(profile.check(&profile.normalize, "grid-pool-2").is_ok());
        assert!(matches!(
            profile.check(&profile.normalize, "grid-pool-4"),
            Err(Error::InvalidOptions(_))
        ));

        let other = NormalizeOptions { crop: 32, ..profile.normalize.clone() };
        assert!(matches!(profile.check(&other, "grid-pool-2"), Err(Error::InvalidOptions(_))));
    }

    #[test]
    fn missing_artifacts() {
        let dir = TempDir::new().unwrap();
        let conf_dir = ConfDir::new(dir.path());
        assert!(matches!(SimilarityIndex::load(&conf_dir), Err(Error::IndexNotFound(_))));

        sample(2).save(&conf_dir).unwrap();
        fs::remove_file(conf_dir.metadata()).unwrap();
        assert!(matches!(SimilarityIndex::load(&conf_dir), Err(Error::IndexNotFound(_))));
    }

    #[test]
    fn mismatched_pair_is_rejected() {
        let dir = TempDir::new().unwrap();
        let first = ConfDir::new(dir.path().join("first"));
        let second = ConfDir::new(dir.path().join("second"));
        sample(2).save(&first).unwrap();
        sample(3).save(&second).unwrap();

        // 用另一次构建的元数据替换
        fs::copy(second.metadata(), first.metadata()).unwrap();
        assert!(matches!(SimilarityIndex::load(&first), Err(Error::IndexNotFound(_))));
    }

    #[test]
    fn truncated_vectors_are_rejected() {
        let dir = TempDir::new().unwrap();
        let conf_dir = ConfDir::new(dir.path());
        sample(3).save(&conf_dir).unwrap();

        let bytes = fs::read(conf_dir.vectors()).unwrap();
        fs::write(conf_dir.vectors(), &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(SimilarityIndex::load(&conf_dir), Err(Error::IndexNotFound(_))));

        fs::write(conf_dir.vectors(), b"garbage").unwrap();
        assert!(matches!(SimilarityIndex::load(&conf_dir), Err(Error::IndexNotFound(_))));
    }

    #[test]
    fn count_mismatch_on_construction() {
        let mut vectors = FlatL2Index::new();
        vectors.add(&[vec![1f32]]).unwrap();
        assert!(SimilarityIndex::new(vectors, MetadataStore::new(), profile()).is_err());
    }
}
