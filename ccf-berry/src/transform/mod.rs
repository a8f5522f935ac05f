//! 变换模型: 二维仿射变换, 以及三维斜切平面的位姿.
//!
//! 两者的编辑都是显式的状态转移: 每个编辑操作接收当前状态, 返回一个新的、
//! 已校验的状态或具体错误, 不修改输入.

mod affine;
mod pose;

pub use affine::{AffineParams, AffineTransform2D, Axis2d, TransformEdit};
pub(crate) use affine::apply_matrix;
pub use pose::{PlaneBasis, PlanePose, PoseEdit};

use std::fmt;

/// 变换编辑或构造错误.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    /// 仿射参数不可逆 (缩放为 0, 剪切使线性部分奇异, 或出现非有限值).
    DegenerateTransform,

    /// 平面偏移超出图谱深度范围.
    ///
    /// 参数依次为偏移 (体素) 与允许范围 `[lower, upper]` (体素).
    OffsetOutOfBounds(f64, f64, f64),

    /// 角度不是有限值.
    NonFiniteAngle,
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateTransform => f.write_str("affine parameters are not invertible"),
            Self::OffsetOutOfBounds(off, lo, hi) => write!(
                f,
                "plane offset {off:.3} voxels is outside [{lo:.3}, {hi:.3}]"
            ),
            Self::NonFiniteAngle => f.write_str("plane angle is not finite"),
        }
    }
}

impl std::error::Error for TransformError {}

/// 变换相关操作的结果.
pub type TransformResult<T> = Result<T, TransformError>;
