//! 稀疏切片到稠密三维体的重建.
//!
//! 重建结果携带与数据网格同形状的来源 (provenance) 网格, 记录每个体素是
//! 直接插入、z-stack 复制、插值得到, 还是空. 是否在下游统计中区分这些来源,
//! 由调用方决定.

mod build;
mod export;
mod spec;
mod store;

pub use build::{build, AlignedSlice, BuildReport, Collision};
pub use export::{read_npz, CompactVolume, ExportError, ExportKind};
pub use spec::VolumeBuildSpec;
pub use store::VolumeStore;

use crate::atlas::{layer, layer_mut, AtlasGeometry, Orientation, Resolution};
use crate::{Idx3d, Idx3dF};
use ndarray::{Array3, ArrayView2, ArrayView3, ArrayViewMut2, Zip};
use std::fmt;
use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 体素数据的来源.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Provenance {
    /// 无数据.
    #[default]
    Empty,

    /// 切片直接插入.
    Direct,

    /// z-stack 模式下复制到相邻层.
    StackFilled,

    /// 由相邻的有数据层插值 (或边界保持) 得到.
    Interpolated,
}

impl Provenance {
    /// 是否为源数据 (直接插入或 z-stack 复制). 只有源数据层可以作为插值的邻居.
    #[inline]
    pub const fn is_source(&self) -> bool {
        matches!(self, Self::Direct | Self::StackFilled)
    }

    /// 紧凑存储用的编码.
    #[inline]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Direct => 1,
            Self::StackFilled => 2,
            Self::Interpolated => 3,
        }
    }

    /// [`Provenance::code`] 的逆. 非法编码返回 `None`.
    #[inline]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Empty),
            1 => Some(Self::Direct),
            2 => Some(Self::StackFilled),
            3 => Some(Self::Interpolated),
            _ => None,
        }
    }
}

/// 体重建错误. 都是单幅图像级别的, 只导致跳过该图像.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// 找不到通道替换或 z-stack 对应的伴随文件.
    UnresolvedCompanionFile(PathBuf),

    /// 文件名替换规则不是合法的正则表达式.
    InvalidPattern(String),

    /// 强度网格与来源网格 (或紧凑记录中的形状) 不一致.
    ShapeMismatch {
        /// 期望的形状.
        expected: Idx3d,
        /// 实际的形状.
        found: Idx3d,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedCompanionFile(p) => {
                write!(f, "companion file `{}` could not be resolved", p.display())
            }
            Self::InvalidPattern(e) => write!(f, "invalid file name pattern: {e}"),
            Self::ShapeMismatch { expected, found } => {
                write!(f, "shape mismatch: expected {expected:?}, found {found:?}")
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// 体重建相关操作的结果.
pub type BuildResult<T> = Result<T, BuildError>;

/// 重建后的稠密体: 强度网格, 以及同形状的来源网格.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedVolume {
    resolution: Resolution,
    orientation: Orientation,
    intensity: Array3<f32>,
    provenance: Array3<Provenance>,
}

impl ReconstructedVolume {
    /// 由两张网格构建. 形状不一致时返回 `Err(BuildError::ShapeMismatch)`.
    pub fn new(
        resolution: Resolution,
        orientation: Orientation,
        intensity: Array3<f32>,
        provenance: Array3<Provenance>,
    ) -> BuildResult<Self> {
        if intensity.dim() != provenance.dim() {
            return Err(BuildError::ShapeMismatch {
                expected: intensity.dim(),
                found: provenance.dim(),
            });
        }
        Ok(Self {
            resolution,
            orientation,
            intensity,
            provenance,
        })
    }

    /// 全空的体.
    pub(crate) fn empty<G: AtlasGeometry>(geometry: &G, orientation: Orientation) -> Self {
        let shape = geometry.shape();
        Self {
            resolution: geometry.resolution(),
            orientation,
            intensity: Array3::zeros(shape),
            provenance: Array3::default(shape),
        }
    }

    /// 深度 `depth` 处两张网格的可写层.
    pub(crate) fn layers_mut(
        &mut self,
        depth: usize,
    ) -> (ArrayViewMut2<'_, f32>, ArrayViewMut2<'_, Provenance>) {
        (
            layer_mut(&mut self.intensity, self.orientation, depth),
            layer_mut(&mut self.provenance, self.orientation, depth),
        )
    }

    /// 切片方向.
    #[inline]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// 强度网格 (已填充).
    #[inline]
    pub fn intensity(&self) -> ArrayView3<'_, f32> {
        self.intensity.view()
    }

    /// 来源网格.
    #[inline]
    pub fn provenance(&self) -> ArrayView3<'_, Provenance> {
        self.provenance.view()
    }

    /// 未填充的原始网格: 只保留源数据体素, 其余为 0.
    pub fn raw_intensity(&self) -> Array3<f32> {
        let mut raw = self.intensity.clone();
        Zip::from(&mut raw)
            .and(&self.provenance)
            .for_each(|v, p| {
                if !p.is_source() {
                    *v = 0.0;
                }
            });
        raw
    }

    /// 深度 `depth` 处的强度层, 形状 `(v, u)`.
    #[inline]
    pub fn layer(&self, depth: usize) -> ArrayView2<'_, f32> {
        layer(self.intensity.view(), self.orientation, depth)
    }

    /// 深度 `depth` 处整层的来源. 同一层内来源一致.
    #[inline]
    pub fn layer_provenance(&self, depth: usize) -> Provenance {
        layer(self.provenance.view(), self.orientation, depth)
            .iter()
            .next()
            .copied()
            .unwrap_or_default()
    }

    /// 深度轴长度.
    #[inline]
    pub fn depth_len(&self) -> usize {
        AtlasGeometry::depth_len(self, self.orientation)
    }

    /// 各层来源, 按深度递增.
    pub fn layer_provenances(&self) -> Vec<Provenance> {
        (0..self.depth_len())
            .map(|d| self.layer_provenance(d))
            .collect()
    }

    /// ASL 原点下索引对应的物理坐标 (微米).
    #[inline]
    pub fn physical_coordinate(&self, index: Idx3d) -> Idx3dF {
        self.physical_um(index)
    }

    /// 各来源的体素计数, 顺序为 `[Empty, Direct, StackFilled, Interpolated]`.
    pub fn provenance_counts(&self) -> [usize; 4] {
        let mut counts = [0; 4];
        self.provenance
            .iter()
            .for_each(|p| counts[p.code() as usize] += 1);
        counts
    }
}

impl AtlasGeometry for ReconstructedVolume {
    #[inline]
    fn shape(&self) -> Idx3d {
        self.intensity.dim()
    }

    #[inline]
    fn resolution(&self) -> Resolution {
        self.resolution
    }
}
