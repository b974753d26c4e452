use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::{GenericImageView, RgbImage};
use ndarray::Array3;

use crate::config::NormalizeOptions;
use crate::error::{Error, Result};

/// 长边与短边之比的上限，超过时缩放后的图片会占用过多内存
const MAX_ASPECT_RATIO: u64 = 64;

/// 单张图片的解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// 归一化后的图片，形状为 3 x crop x crop
    Image(Array3<f32>),
    /// 解码或归一化失败的原因
    Failed(String),
}

/// 与原始路径绑定的解码结果
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub path: PathBuf,
    pub decoded: Decoded,
}

impl LoadedImage {
    /// 解码失败时返回对应的错误
    pub fn error(&self) -> Option<Error> {
        match &self.decoded {
            Decoded::Image(_) => None,
            Decoded::Failed(reason) => {
                Some(Error::ItemDecode { path: self.path.clone(), reason: reason.clone() })
            }
        }
    }
}

/// 图片预处理器：缩放短边、中心裁剪、缩放到 [0, 1] 并按通道标准化
#[derive(Debug, Clone)]
pub struct Preprocessor {
    opts: NormalizeOptions,
}

impl Preprocessor {
    pub fn new(opts: NormalizeOptions) -> Result<Self> {
        opts.validate()?;
        Ok(Self { opts })
    }

    pub fn options(&self) -> &NormalizeOptions {
        &self.opts
    }

    /// 读取并处理一张图片，不会因为单张图片损坏而返回错误
    pub fn load(&self, path: PathBuf) -> LoadedImage {
        let decoded = match std::fs::read(&path) {
            Ok(bytes) => match self.decode_bytes(&bytes) {
                Ok(image) => Decoded::Image(image),
                Err(e) => Decoded::Failed(e.to_string()),
            },
            Err(e) => Decoded::Failed(format!("读取文件失败: {e}")),
        };
        LoadedImage { path, decoded }
    }

    /// 解码内存中的图片并归一化
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Array3<f32>> {
        let image =
            image::load_from_memory(bytes).map_err(|e| Error::InvalidImage(e.to_string()))?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::InvalidImage("图片尺寸为 0".to_string()));
        }
        self.normalize(&image.to_rgb8())
    }

    /// 对 RGB 图片执行固定的归一化变换
    pub fn normalize(&self, image: &RgbImage) -> Result<Array3<f32>> {
        let resized = self.resize_shorter_side(image)?;
        let crop = self.opts.crop;
        let (width, height) = resized.dimensions();
        // 与 torchvision 的 CenterCrop 一致，偏移量四舍五入
        let left = ((width - crop) as f32 / 2.).round() as u32;
        let top = ((height - crop) as f32 / 2.).round() as u32;
        let cropped = imageops::crop_imm(&resized, left, top, crop, crop).to_image();

        let NormalizeOptions { mean, std, .. } = self.opts;
        Ok(Array3::from_shape_fn((3, crop as usize, crop as usize), |(c, y, x)| {
            let value = cropped.get_pixel(x as u32, y as u32)[c] as f32 / 255.;
            (value - mean[c]) / std[c]
        }))
    }

    fn resize_shorter_side(&self, image: &RgbImage) -> Result<RgbImage> {
        let size = self.opts.resize as u64;
        let (width, height) = (image.width() as u64, image.height() as u64);
        let (short, long) = (width.min(height), width.max(height));
        if short == 0 || long > short * MAX_ASPECT_RATIO {
            return Err(Error::InvalidImage(format!("宽高比过大: {}x{}", width, height)));
        }

        let scaled = u32::try_from((size * long / short).max(size))
            .map_err(|_| Error::InvalidImage(format!("缩放后的尺寸溢出: {}x{}", width, height)))?;
        let (new_width, new_height) =
            if width <= height { (size as u32, scaled) } else { (scaled, size as u32) };
        Ok(imageops::resize(image, new_width, new_height, FilterType::Triangle))
    }
}
