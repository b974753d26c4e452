use std::path::PathBuf;

use ndarray::{Array4, ArrayView4, Axis, stack};

use crate::preprocess::{Decoded, LoadedImage};

/// 一批已归一化的图片，形状为 n x 3 x crop x crop
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub paths: Vec<PathBuf>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.images.view()
    }
}

/// 将一组解码结果合并为一个批次，丢弃解码失败的图片并保持其余图片的相对顺序
///
/// 所有图片均解码失败时返回 `None`，此时不应调用特征提取器
pub fn collate(items: Vec<LoadedImage>) -> Option<Batch> {
    let (paths, images): (Vec<_>, Vec<_>) = items
        .into_iter()
        .filter_map(|item| match item.decoded {
            Decoded::Image(image) => Some((item.path, image)),
            Decoded::Failed(_) => None,
        })
        .unzip();
    if images.is_empty() {
        return None;
    }
    let views = images.iter().map(|image| image.view()).collect::<Vec<_>>();
    // 同一个预处理器的输出形状总是一致的
    let images = stack(Axis(0), &views).expect("images in one batch must share the same shape");
    Some(Batch { images, paths })
}
