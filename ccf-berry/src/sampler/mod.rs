//! 平面采样器.
//!
//! 对每个输出像素 `(u, v)`, 采样点为
//! `origin + (u - W/2) * px * basis_u + (v - H/2) * px * basis_v`.
//! 强度使用三线性插值, 结构 id 使用最近邻 (插值结构 id 毫无意义, 不能凭空造出 id).
//! 图谱范围之外的点取背景值: 强度 `0`, 结构 id `0`.
//!
//! 同一套逐像素渲染流程也用于组织切片: 以仿射变换的逆, 将切片重采样到同一输出网格.
//! 切片与图谱平面上的点都以各自图像中心为原点, 即 `(x - W/2, y - H/2)`.

mod contour;

pub use contour::structure_contour;

use crate::atlas::{AtlasGeometry, AtlasVolume, Orientation};
use crate::consts::{BACKGROUND_INTENSITY, NO_STRUCTURE};
use crate::transform::{apply_matrix, AffineTransform2D, PlaneBasis, PlanePose};
use crate::Idx2dF;
use nalgebra::Vector3;
use ndarray::{Array2, ArrayView2, ArrayView3, Axis};

/// 逐像素渲染 `(height, width)` 网格. `f(u, v)` 给出像素值.
pub(crate) fn render<T, F>(width: usize, height: usize, f: F) -> Array2<T>
where
    T: Clone + Default + Send + Sync,
    F: Fn(usize, usize) -> T + Sync + Send,
{
    let mut out = Array2::<T>::default((height, width));
    fill_rows(&mut out, f);
    out
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

        /// 借助 `rayon`, 按行并行填充.
        fn fill_rows<T, F>(out: &mut Array2<T>, f: F)
        where
            T: Send + Sync,
            F: Fn(usize, usize) -> T + Sync + Send,
        {
            out.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(v, mut row)| {
                    row.iter_mut().enumerate().for_each(|(u, px)| *px = f(u, v));
                });
        }
    } else {
        /// 逐行填充.
        fn fill_rows<T, F>(out: &mut Array2<T>, f: F)
        where
            F: Fn(usize, usize) -> T,
        {
            for (v, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
                row.iter_mut().enumerate().for_each(|(u, px)| *px = f(u, v));
            }
        }
    }
}

/// 以图像中心为原点的像素坐标.
#[inline]
pub fn centred((x, y): Idx2dF, width: usize, height: usize) -> Idx2dF {
    (x - width as f64 / 2.0, y - height as f64 / 2.0)
}

/// [`centred`] 的逆.
#[inline]
pub fn uncentred((x, y): Idx2dF, width: usize, height: usize) -> Idx2dF {
    (x + width as f64 / 2.0, y + height as f64 / 2.0)
}

/// 采样点是否落在 `[0, n - 1]^3` 内, 若是, 返回三个分量.
#[inline]
fn inside(shape: &[usize], p: &Vector3<f64>) -> Option<[f64; 3]> {
    let c = [p.x, p.y, p.z];
    c.iter()
        .zip(shape)
        .all(|(&x, &n)| n > 0 && x >= 0.0 && x <= (n - 1) as f64)
        .then_some(c)
}

/// 三线性插值. 范围外返回背景值.
pub fn trilinear(grid: ArrayView3<'_, f32>, p: &Vector3<f64>) -> f32 {
    let Some(c) = inside(grid.shape(), p) else {
        return BACKGROUND_INTENSITY;
    };
    let shape = grid.shape();
    let mut lo = [0_usize; 3];
    let mut hi = [0_usize; 3];
    let mut t = [0.0_f64; 3];
    for k in 0..3 {
        let f = c[k].floor();
        lo[k] = f as usize;
        hi[k] = (lo[k] + 1).min(shape[k] - 1);
        t[k] = c[k] - f;
    }

    let mut acc = 0.0_f64;
    for corner in 0..8_usize {
        let mut idx = [0_usize; 3];
        let mut w = 1.0_f64;
        for k in 0..3 {
            if (corner >> k) & 1 == 1 {
                idx[k] = hi[k];
                w *= t[k];
            } else {
                idx[k] = lo[k];
                w *= 1.0 - t[k];
            }
        }
        if w != 0.0 {
            acc += w * grid[idx] as f64;
        }
    }
    acc as f32
}

/// 最近邻取值. 范围外返回 "无结构".
pub fn nearest(grid: ArrayView3<'_, u32>, p: &Vector3<f64>) -> u32 {
    match inside(grid.shape(), p) {
        Some(c) => grid[[
            c[0].round() as usize,
            c[1].round() as usize,
            c[2].round() as usize,
        ]],
        None => NO_STRUCTURE,
    }
}

/// 二维双线性插值, 坐标为 `(x, y)` = `(列, 行)`. 范围外返回背景值.
pub fn bilinear(img: ArrayView2<'_, f32>, (x, y): Idx2dF) -> f32 {
    let (h, w) = img.dim();
    if h == 0 || w == 0 || !(0.0..=(w - 1) as f64).contains(&x) || !(0.0..=(h - 1) as f64).contains(&y)
    {
        return BACKGROUND_INTENSITY;
    }
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (tx, ty) = (x - x0 as f64, y - y0 as f64);
    let top = img[(y0, x0)] as f64 * (1.0 - tx) + img[(y0, x1)] as f64 * tx;
    let bottom = img[(y1, x0)] as f64 * (1.0 - tx) + img[(y1, x1)] as f64 * tx;
    (top * (1.0 - ty) + bottom * ty) as f32
}

/// 一次平面采样的参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlaneGrid {
    /// 输出宽度.
    pub width: usize,

    /// 输出高度.
    pub height: usize,

    /// 每个输出像素对应的体素数.
    pub pixel_size: f64,
}

impl PlaneGrid {
    /// 新建.
    #[inline]
    pub fn new(width: usize, height: usize, pixel_size: f64) -> Self {
        Self {
            width,
            height,
            pixel_size,
        }
    }

    /// 与图谱在该方向的平面同尺寸, 每像素一个体素.
    #[inline]
    pub fn native<G: AtlasGeometry>(geometry: &G, orientation: Orientation) -> Self {
        let (width, height) = geometry.plane_size(orientation);
        Self::new(width, height, 1.0)
    }

    /// 输出像素 `(u, v)` 的三维采样点.
    #[inline]
    fn point(&self, basis: &PlaneBasis, u: usize, v: usize) -> Vector3<f64> {
        let (du, dv) = centred((u as f64, v as f64), self.width, self.height);
        basis.point(du * self.pixel_size, dv * self.pixel_size)
    }
}

/// 沿斜切平面采样图谱强度, 输出形状 `(height, width)`.
pub fn sample_intensity(
    atlas: &AtlasVolume,
    orientation: Orientation,
    pose: &PlanePose,
    grid: PlaneGrid,
) -> Array2<f32> {
    let basis = PlaneBasis::new(atlas, orientation, pose);
    let data = atlas.intensity();
    render(grid.width, grid.height, |u, v| {
        trilinear(data, &grid.point(&basis, u, v))
    })
}

/// 沿斜切平面采样结构 id, 输出形状 `(height, width)`.
pub fn sample_labels(
    atlas: &AtlasVolume,
    orientation: Orientation,
    pose: &PlanePose,
    grid: PlaneGrid,
) -> Array2<u32> {
    let basis = PlaneBasis::new(atlas, orientation, pose);
    let data = atlas.labels();
    render(grid.width, grid.height, |u, v| {
        nearest(data, &grid.point(&basis, u, v))
    })
}

/// 将组织切片经 `transform` 重采样到 `(height, width)` 的输出网格.
///
/// 对每个输出像素, 用变换的逆找到切片上的对应点, 再双线性插值.
pub fn warp_histology(
    image: ArrayView2<'_, f32>,
    transform: &AffineTransform2D,
    width: usize,
    height: usize,
) -> Array2<f32> {
    let inv = transform.inverse_matrix();
    let (src_h, src_w) = image.dim();
    render(width, height, |u, v| {
        let c = centred((u as f64, v as f64), width, height);
        let s = apply_matrix(&inv, c);
        bilinear(image, uncentred(s, src_w, src_h))
    })
}
