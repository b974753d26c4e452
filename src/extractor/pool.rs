use anyhow::{Result, ensure};
use ndarray::{Array2, ArrayView4, Axis, s};
use rayon::prelude::*;

use crate::extractor::Extractor;

/// 网格平均池化提取器
///
/// 将每个通道划分为 grid x grid 个区域并取平均值，输出维数为 3 * grid * grid。
/// 它只表达图片的颜色布局，用于在没有外部模型时建立可复现的索引
#[derive(Debug, Clone)]
pub struct GridPoolExtractor {
    grid: usize,
    name: String,
}

impl GridPoolExtractor {
    pub fn new(grid: usize) -> Self {
        Self { grid, name: format!("grid-pool-{grid}") }
    }

    pub fn dimension(&self, channels: usize) -> usize {
        channels * self.grid * self.grid
    }

    // 计算第 i 个区域在长度为 len 的轴上的范围
    fn cell(&self, i: usize, len: usize) -> (usize, usize) {
        (i * len / self.grid, (i + 1) * len / self.grid)
    }
}

impl Extractor for GridPoolExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let (n, channels, height, width) = batch.dim();
        ensure!(self.grid > 0, "grid 必须大于 0");
        ensure!(
            self.grid <= height && self.grid <= width,
            "grid ({}) 不能大于图片尺寸 ({}x{})",
            self.grid,
            height,
            width
        );

        let dim = self.dimension(channels);
        let rows = batch
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|image| {
                let mut row = Vec::with_capacity(dim);
                for c in 0..channels {
                    for gy in 0..self.grid {
                        let (y0, y1) = self.cell(gy, height);
                        for gx in 0..self.grid {
                            let (x0, x1) = self.cell(gx, width);
                            let region = image.slice(s![c, y0..y1, x0..x1]);
                            let sum = region.iter().map(|&v| v as f64).sum::<f64>();
                            row.push((sum / region.len() as f64) as f32);
                        }
                    }
                }
                row
            })
            .collect::<Vec<_>>();

        Ok(Array2::from_shape_vec((n, dim), rows.concat())?)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;

    use super::*;

    #[test]
    fn one_row_per_image() {
        let mut batch = Array4::<f32>::zeros((3, 3, 8, 8));
        batch.slice_mut(s![1, .., .., ..]).fill(1.);
        batch.slice_mut(s![2, 0, 0..4, 0..4]).fill(4.);

        let out = GridPoolExtractor::new(2).extract(batch.view()).unwrap();
        assert_eq!(out.dim(), (3, 12));
        assert!(out.row(0).iter().all(|&v| v == 0.));
        assert!(out.row(1).iter().all(|&v| v == 1.));
        // 第 3 张图片只有 R 通道左上角区域非零
        assert_eq!(out[[2, 0]], 4.);
        assert!(out.row(2).iter().skip(1).all(|&v| v == 0.));
    }

    #[test]
    fn reject_grid_larger_than_image() {
        let batch = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(GridPoolExtractor::new(5).extract(batch.view()).is_err());
        assert!(GridPoolExtractor::new(0).extract(batch.view()).is_err());
    }
}
