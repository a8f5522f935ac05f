//! 平面图像的持久化存储.

use super::DisplayWindow;
use crate::consts::gray::{BLACK, DARK_GRAY, WHITE};
use crate::consts::NO_STRUCTURE;
use image::ImageResult;
use ndarray::{Array2, ArrayView2};
use std::path::Path;

/// 表明一个可以通过 **可视化友好** 模式持久化存储的平面对象.
///
/// 对于强度平面, 保存时用覆盖其全部有限值的 [`DisplayWindow`] 规范化;
/// 对于结构 id 平面, 保存时只画出结构边界.
pub trait ImgWriteVis {
    /// 按照一定的可视化规则将图片保存到 `path` 路径.
    fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 结构 id 平面的边界: 与任一 4-邻居取值不同的像素.
pub fn boundaries(labels: ArrayView2<'_, u32>) -> Array2<bool> {
    let (h, w) = labels.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let cur = labels[(y, x)];
        [
            (y.wrapping_sub(1), x),
            (y + 1, x),
            (y, x.wrapping_sub(1)),
            (y, x + 1),
        ]
        .into_iter()
        .filter_map(|p| labels.get(p))
        .any(|&n| n != cur)
    })
}

/// 结构内部为暗灰色, 边界为白色, 无结构处为黑色.
#[inline]
fn pretty(label: u32, edge: bool) -> u8 {
    match (label, edge) {
        (_, true) => WHITE,
        (NO_STRUCTURE, false) => BLACK,
        _ => DARK_GRAY,
    }
}

fn save_intensity<P: AsRef<Path>>(data: ArrayView2<'_, f32>, path: P) -> ImageResult<()> {
    let (height, width) = data.dim();
    let mut buf = image::GrayImage::new(width as u32, height as u32);
    // 全常数平面没有可用窗口, 此时整幅保存为黑色.
    if let Some(window) = DisplayWindow::fit(data.iter()) {
        for ((h, w), &v) in data.indexed_iter() {
            let gray = window.eval(v).unwrap_or(BLACK);
            buf.put_pixel(w as u32, h as u32, image::Luma([gray]));
        }
    }
    buf.save(path)
}

fn save_labels<P: AsRef<Path>>(data: ArrayView2<'_, u32>, path: P) -> ImageResult<()> {
    let (height, width) = data.dim();
    let edges = boundaries(data);
    let mut buf = image::GrayImage::new(width as u32, height as u32);
    for ((h, w), &id) in data.indexed_iter() {
        buf.put_pixel(w as u32, h as u32, image::Luma([pretty(id, edges[(h, w)])]));
    }
    buf.save(path)
}

macro_rules! impl_intensity_vis {
    ($($plane: ty),+) => {
        $(
            /// 按平面自身的强度范围开窗.
            impl ImgWriteVis for $plane {
                fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
                    save_intensity(self.view(), path)
                }
            }
        )+
    };
}

macro_rules! impl_label_vis {
    ($($plane: ty),+) => {
        $(
            /// 只画出结构边界.
            impl ImgWriteVis for $plane {
                fn save<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
                    save_labels(self.view(), path)
                }
            }
        )+
    };
}

impl_intensity_vis!(Array2<f32>, ArrayView2<'_, f32>);
impl_label_vis!(Array2<u32>, ArrayView2<'_, u32>);

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_boundaries() {
        let labels = array![[0_u32, 0, 0, 0], [0, 5, 5, 0], [0, 5, 5, 0], [0, 0, 0, 0]];
        let b = boundaries(labels.view());
        // 四个角只与背景相邻.
        assert!(!b[(0, 0)] && !b[(3, 3)]);
        assert!(b[(0, 1)] && b[(1, 0)]);
        assert!(b[(1, 1)] && b[(2, 2)]);

        let uniform = Array2::<u32>::from_elem((3, 3), 7);
        assert!(boundaries(uniform.view()).iter().all(|e| !e));
    }

    #[test]
    fn test_save_planes() {
        let dir = tempfile::tempdir().unwrap();
        let intensity = Array2::from_shape_fn((4, 6), |(h, w)| (h * 6 + w) as f32);
        let p = dir.path().join("intensity.png");
        intensity.save(&p).unwrap();
        let img = image::open(&p).unwrap().to_luma8();
        assert_eq!(img.dimensions(), (6, 4));
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(5, 3).0[0], 255);

        let labels = Array2::from_shape_fn((4, 6), |(_, w)| if w < 3 { 0_u32 } else { 9 });
        let p = dir.path().join("labels.png");
        labels.view().save(&p).unwrap();
        let img = image::open(&p).unwrap().to_luma8();
        assert_eq!(img.get_pixel(0, 0).0[0], BLACK);
        assert_eq!(img.get_pixel(3, 0).0[0], WHITE);
        assert_eq!(img.get_pixel(5, 0).0[0], DARK_GRAY);
    }
}
