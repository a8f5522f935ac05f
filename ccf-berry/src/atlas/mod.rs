//! 三维参考图谱.
//!
//! 图谱数组的三个轴依次为 (AP, DV, LR), 索引原点位于前-上-左 (ASL) 角.
//! 图谱一经加载即为只读, 通过 `Arc` 在平面采样器、体重建器之间共享.

mod save;
mod window;

pub use save::{boundaries, ImgWriteVis};
pub use window::DisplayWindow;

use crate::{Idx3d, Idx3dF};
use ndarray::{Array3, ArrayView3, ArrayViewMut2, Axis};
use ndarray_npy::ReadNpyError;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 切片方向. 决定图谱的哪一个轴是 "深度" (平面法向) 轴.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Orientation {
    /// 冠状面, 深度轴为 AP.
    Coronal,

    /// 水平面, 深度轴为 DV.
    Horizontal,

    /// 矢状面, 深度轴为 LR.
    Sagittal,
}

impl Orientation {
    /// 全部方向.
    pub const ALL: [Orientation; 3] = [Self::Coronal, Self::Horizontal, Self::Sagittal];

    /// 深度轴在图谱数组中的轴号.
    #[inline]
    pub const fn depth_axis(&self) -> usize {
        match self {
            Self::Coronal => 0,
            Self::Horizontal => 1,
            Self::Sagittal => 2,
        }
    }

    /// 平面内 `(u, v)` 两个轴 (水平, 竖直) 在图谱数组中的轴号.
    #[inline]
    pub const fn in_plane_axes(&self) -> (usize, usize) {
        match self {
            Self::Coronal => (2, 1),
            Self::Horizontal => (2, 0),
            Self::Sagittal => (0, 1),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Coronal => "coronal",
            Self::Horizontal => "horizontal",
            Self::Sagittal => "sagittal",
        };
        f.write_str(s)
    }
}

impl FromStr for Orientation {
    type Err = ParseAtlasParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coronal" => Ok(Self::Coronal),
            "horizontal" => Ok(Self::Horizontal),
            "sagittal" => Ok(Self::Sagittal),
            _ => Err(ParseAtlasParamError::UnknownOrientation(s.to_string())),
        }
    }
}

/// 图谱分辨率 (微米每体素).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u32", into = "u32"))]
pub enum Resolution {
    /// 100 微米.
    Um100,

    /// 50 微米.
    Um50,

    /// 25 微米.
    Um25,

    /// 10 微米.
    Um10,
}

impl Resolution {
    /// 全部分辨率, 从粗到细.
    pub const ALL: [Resolution; 4] = [Self::Um100, Self::Um50, Self::Um25, Self::Um10];

    /// 每体素微米数.
    #[inline]
    pub const fn microns(&self) -> u32 {
        match self {
            Self::Um100 => 100,
            Self::Um50 => 50,
            Self::Um25 => 25,
            Self::Um10 => 10,
        }
    }

    /// 由微米数构造. 非法值返回 `None`.
    pub const fn from_microns(um: u32) -> Option<Self> {
        match um {
            100 => Some(Self::Um100),
            50 => Some(Self::Um50),
            25 => Some(Self::Um25),
            10 => Some(Self::Um10),
            _ => None,
        }
    }

    /// 该分辨率下 CCF 图谱的形状 `(AP, DV, LR)`.
    #[inline]
    pub const fn atlas_shape(&self) -> Idx3d {
        match self {
            Self::Um100 => (132, 80, 114),
            Self::Um50 => (264, 160, 228),
            Self::Um25 => (528, 320, 456),
            Self::Um10 => (1320, 800, 1140),
        }
    }
}

impl From<Resolution> for u32 {
    fn from(r: Resolution) -> Self {
        r.microns()
    }
}

impl TryFrom<u32> for Resolution {
    type Error = ParseAtlasParamError;

    fn try_from(um: u32) -> Result<Self, Self::Error> {
        Self::from_microns(um).ok_or_else(|| ParseAtlasParamError::UnknownResolution(um.to_string()))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}um", self.microns())
    }
}

impl FromStr for Resolution {
    type Err = ParseAtlasParamError;

    /// 接受 `25` 或 `25um` 两种写法.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let t = t.strip_suffix("um").unwrap_or(t);
        t.parse::<u32>()
            .ok()
            .and_then(Self::from_microns)
            .ok_or_else(|| ParseAtlasParamError::UnknownResolution(s.to_string()))
    }
}

/// 解析方向或分辨率错误.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseAtlasParamError {
    /// 未知切片方向.
    UnknownOrientation(String),

    /// 未知分辨率.
    UnknownResolution(String),
}

impl fmt::Display for ParseAtlasParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOrientation(s) => write!(f, "unknown orientation `{s}`"),
            Self::UnknownResolution(s) => write!(f, "unknown resolution `{s}`"),
        }
    }
}

impl std::error::Error for ParseAtlasParamError {}

/// 图谱网格的几何属性.
///
/// 平面位姿的边界检查、体重建的层定位都只依赖这些属性, 而不需要真正的图谱数据.
pub trait AtlasGeometry {
    /// 网格形状 `(AP, DV, LR)`.
    fn shape(&self) -> Idx3d;

    /// 分辨率.
    fn resolution(&self) -> Resolution;

    /// 每体素微米数.
    #[inline]
    fn voxel_um(&self) -> f64 {
        self.resolution().microns() as f64
    }

    /// 网格中心 (逐轴 `(n - 1) / 2`, 向下取整).
    #[inline]
    fn centre(&self) -> Idx3d {
        let (a, b, c) = self.shape();
        (
            a.saturating_sub(1) / 2,
            b.saturating_sub(1) / 2,
            c.saturating_sub(1) / 2,
        )
    }

    /// 给定方向下深度轴长度.
    #[inline]
    fn depth_len(&self, orientation: Orientation) -> usize {
        axis_len(self.shape(), orientation.depth_axis())
    }

    /// 给定方向下深度轴的中心索引.
    #[inline]
    fn centre_depth(&self, orientation: Orientation) -> usize {
        axis_len(self.centre(), orientation.depth_axis())
    }

    /// 给定方向下平面网格的 `(宽, 高)`, 即 `(u 轴长度, v 轴长度)`.
    #[inline]
    fn plane_size(&self, orientation: Orientation) -> (usize, usize) {
        let (u, v) = orientation.in_plane_axes();
        (axis_len(self.shape(), u), axis_len(self.shape(), v))
    }

    /// 索引是否在网格内.
    #[inline]
    fn check(&self, (a, b, c): &Idx3d) -> bool {
        let (sa, sb, sc) = self.shape();
        *a < sa && *b < sb && *c < sc
    }

    /// ASL 原点下, 索引对应的物理坐标 (微米), 即 `index * resolution`.
    #[inline]
    fn physical_um(&self, (a, b, c): Idx3d) -> Idx3dF {
        let r = self.voxel_um();
        (a as f64 * r, b as f64 * r, c as f64 * r)
    }
}

#[inline]
pub(crate) fn axis_len((a, b, c): Idx3d, axis: usize) -> usize {
    match axis {
        0 => a,
        1 => b,
        _ => c,
    }
}

/// 取出 `grid` 在深度 `depth` 处的平面层, 形状为 `(v, u)`, 即 `(高, 宽)`.
///
/// 矢状面的原始轴序为 `(AP, DV)` = `(u, v)`, 需要转置.
pub(crate) fn layer_mut<T>(
    grid: &mut Array3<T>,
    orientation: Orientation,
    depth: usize,
) -> ArrayViewMut2<'_, T> {
    let layer = grid.index_axis_mut(Axis(orientation.depth_axis()), depth);
    match orientation {
        Orientation::Sagittal => layer.reversed_axes(),
        _ => layer,
    }
}

/// 与 [`layer_mut`] 相同, 但只读.
pub(crate) fn layer<T>(
    grid: ArrayView3<'_, T>,
    orientation: Orientation,
    depth: usize,
) -> ndarray::ArrayView2<'_, T> {
    let layer = grid.index_axis_move(Axis(orientation.depth_axis()), depth);
    match orientation {
        Orientation::Sagittal => layer.reversed_axes(),
        _ => layer,
    }
}

/// 只有几何信息的图谱框架. 用于不需要图谱数据本身的场合.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AtlasFrame {
    resolution: Resolution,
    shape: Idx3d,
}

impl AtlasFrame {
    /// 标准 CCF 图谱框架.
    #[inline]
    pub const fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            shape: resolution.atlas_shape(),
        }
    }

    /// 任意形状的框架. 仅用于实验.
    #[inline]
    pub const fn fake(resolution: Resolution, shape: Idx3d) -> Self {
        Self { resolution, shape }
    }
}

impl AtlasGeometry for AtlasFrame {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.shape
    }

    #[inline]
    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// 图谱初始化错误.
#[derive(Debug, Clone, PartialEq)]
pub enum InitAtlasError {
    /// 数据形状与分辨率要求的 CCF 形状不符.
    ShapeMismatch {
        /// 该分辨率下要求的形状.
        expected: Idx3d,
        /// 实际形状.
        found: Idx3d,
    },

    /// 强度网格与结构 id 网格形状不一致.
    GridMismatch {
        /// 强度网格形状.
        intensity: Idx3d,
        /// 结构 id 网格形状.
        labels: Idx3d,
    },

    /// 空网格.
    Empty,
}

impl fmt::Display for InitAtlasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { expected, found } => {
                write!(f, "atlas shape {found:?} does not match expected {expected:?}")
            }
            Self::GridMismatch { intensity, labels } => write!(
                f,
                "intensity grid {intensity:?} and label grid {labels:?} differ in shape"
            ),
            Self::Empty => f.write_str("atlas grid is empty"),
        }
    }
}

impl std::error::Error for InitAtlasError {}

/// 从 npy 文件加载图谱错误.
#[derive(Debug)]
pub enum LoadAtlasError {
    /// 读取 npy 文件错误.
    ReadNpyError(ReadNpyError),

    /// 数据不满足图谱要求.
    Init(InitAtlasError),
}

impl fmt::Display for LoadAtlasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadNpyError(e) => write!(f, "failed to read atlas array: {e}"),
            Self::Init(e) => write!(f, "invalid atlas: {e}"),
        }
    }
}

impl std::error::Error for LoadAtlasError {}

/// 三维参考图谱: 平行的强度网格与结构 id 网格.
#[derive(Debug, Clone)]
pub struct AtlasVolume {
    resolution: Resolution,
    intensity: Array3<f32>,
    labels: Array3<u32>,
}

#[inline]
fn shape3<T>(a: &Array3<T>) -> Idx3d {
    a.dim()
}

impl AtlasVolume {
    /// 构建标准 CCF 图谱. 两个网格的形状必须都等于 `resolution.atlas_shape()`.
    pub fn new(
        resolution: Resolution,
        intensity: Array3<f32>,
        labels: Array3<u32>,
    ) -> Result<Self, InitAtlasError> {
        let expected = resolution.atlas_shape();
        let found = shape3(&intensity);
        if found != expected {
            return Err(InitAtlasError::ShapeMismatch { expected, found });
        }
        Self::fake(resolution, intensity, labels)
    }

    /// 构建任意形状的图谱. 仅检查两个网格一致且非空.
    ///
    /// 仅用于实验 (以及测试). 标准图谱请使用 [`AtlasVolume::new`].
    pub fn fake(
        resolution: Resolution,
        intensity: Array3<f32>,
        labels: Array3<u32>,
    ) -> Result<Self, InitAtlasError> {
        let (si, sl) = (shape3(&intensity), shape3(&labels));
        if si != sl {
            return Err(InitAtlasError::GridMismatch {
                intensity: si,
                labels: sl,
            });
        }
        if intensity.is_empty() {
            return Err(InitAtlasError::Empty);
        }
        Ok(Self {
            resolution,
            intensity,
            labels,
        })
    }

    /// 从两个 npy 文件 (强度为 `f32`, 结构 id 为 `u32`) 加载标准图谱.
    pub fn from_npy<P: AsRef<Path>, Q: AsRef<Path>>(
        resolution: Resolution,
        intensity: P,
        labels: Q,
    ) -> Result<Self, LoadAtlasError> {
        let intensity: Array3<f32> =
            ndarray_npy::read_npy(intensity).map_err(LoadAtlasError::ReadNpyError)?;
        let labels: Array3<u32> =
            ndarray_npy::read_npy(labels).map_err(LoadAtlasError::ReadNpyError)?;
        let atlas = Self::new(resolution, intensity, labels).map_err(LoadAtlasError::Init)?;
        log::info!(
            "Loaded {} atlas of shape {:?}",
            resolution,
            atlas.shape()
        );
        Ok(atlas)
    }

    /// 强度网格.
    #[inline]
    pub fn intensity(&self) -> ArrayView3<'_, f32> {
        self.intensity.view()
    }

    /// 结构 id 网格.
    #[inline]
    pub fn labels(&self) -> ArrayView3<'_, u32> {
        self.labels.view()
    }

    /// 几何框架.
    #[inline]
    pub fn frame(&self) -> AtlasFrame {
        AtlasFrame::fake(self.resolution, self.shape())
    }

    /// 转为共享只读资源.
    #[inline]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl AtlasGeometry for AtlasVolume {
    #[inline]
    fn shape(&self) -> Idx3d {
        shape3(&self.intensity)
    }

    #[inline]
    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

/// 测试用的合成图谱.
///
/// 强度为索引的线性函数 `100a + 10b + c`, 便于验证三线性插值的精确性;
/// 结构 id 按 AP 方向分为两块: 前半 `1`, 后半 `2`, 外加 `LR == 0` 的一列为 `0`.
#[cfg(test)]
pub(crate) fn ramp_atlas(shape: Idx3d) -> AtlasVolume {
    let intensity = Array3::from_shape_fn(shape, |(a, b, c)| (100 * a + 10 * b + c) as f32);
    let labels = Array3::from_shape_fn(shape, |(a, _, c)| match (a, c) {
        (_, 0) => 0,
        (a, _) if a < shape.0 / 2 => 1,
        _ => 2,
    });
    AtlasVolume::fake(Resolution::Um100, intensity, labels).unwrap()
}
