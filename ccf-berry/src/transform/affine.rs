//! 二维仿射变换.
//!
//! 组合顺序固定为 缩放 → 剪切 → 旋转 → 平移, 即
//! `M = T · R(θ) · Sh · S`, 其中 `S = diag(sx, sy)`, `Sh = [[1, shx], [shy, 1]]`,
//! `R(θ) = [[cos θ, -sin θ], [sin θ, cos θ]]`.
//! 地标求解的分解过程严格按这一顺序求逆.

use super::{TransformError, TransformResult};
use crate::consts::DEGENERATE_DETERMINANT;
use crate::Idx2dF;
use nalgebra::{Matrix2, Matrix3, Vector2};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 平面内的两个轴.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Axis2d {
    /// 水平轴.
    #[default]
    X,

    /// 竖直轴.
    Y,
}

/// 仿射变换的全部参数. 不做任何校验, 用于持久化与分解结果的中转.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AffineParams {
    /// 旋转角度 (度), 数学正方向 (逆时针).
    pub rotation_deg: f64,

    /// 水平平移.
    pub translate_x: f64,

    /// 竖直平移.
    pub translate_y: f64,

    /// 水平缩放.
    pub scale_x: f64,

    /// 竖直缩放.
    pub scale_y: f64,

    /// 水平剪切.
    pub shear_x: f64,

    /// 竖直剪切.
    pub shear_y: f64,

    /// 两个缩放轴是否联动.
    pub scale_linked: bool,
}

impl Default for AffineParams {
    fn default() -> Self {
        Self {
            rotation_deg: 0.0,
            translate_x: 0.0,
            translate_y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            shear_x: 0.0,
            shear_y: 0.0,
            scale_linked: false,
        }
    }
}

impl AffineParams {
    /// 线性部分的行列式 `sx * sy * (1 - shx * shy)`.
    #[inline]
    pub fn determinant(&self) -> f64 {
        self.scale_x * self.scale_y * (1.0 - self.shear_x * self.shear_y)
    }

    /// 参数是否全部有限, 且线性部分可逆.
    pub fn is_invertible(&self) -> bool {
        let finite = [
            self.rotation_deg,
            self.translate_x,
            self.translate_y,
            self.scale_x,
            self.scale_y,
            self.shear_x,
            self.shear_y,
        ]
        .iter()
        .all(|v| v.is_finite());
        finite && self.determinant().abs() > DEGENERATE_DETERMINANT
    }
}

/// 可逆的二维仿射变换.
///
/// 该结构只能通过校验构造, 因此任何实例都可逆; 不可逆的参数在构造或编辑时即被拒绝
/// (`TransformError::DegenerateTransform`), 输入状态保持不变.
///
/// 相等性只比较参数, 不比较编辑记录.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "AffineRecord", into = "AffineRecord"))]
pub struct AffineTransform2D {
    params: AffineParams,

    /// 最近一次被编辑的缩放轴. 开启联动时以它为准.
    last_scaled: Axis2d,
}

impl PartialEq for AffineTransform2D {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params
    }
}

impl TryFrom<AffineParams> for AffineTransform2D {
    type Error = TransformError;

    fn try_from(params: AffineParams) -> TransformResult<Self> {
        Self::new(params)
    }
}

impl From<AffineTransform2D> for AffineParams {
    fn from(t: AffineTransform2D) -> Self {
        t.params
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        /// 持久化形式: 参数平铺, 另记最近一次被编辑的缩放轴 (旧记录缺省为 `X`).
        #[derive(Serialize, Deserialize)]
        struct AffineRecord {
            #[serde(flatten)]
            params: AffineParams,

            #[serde(default)]
            last_scaled: Axis2d,
        }

        impl TryFrom<AffineRecord> for AffineTransform2D {
            type Error = TransformError;

            fn try_from(r: AffineRecord) -> TransformResult<Self> {
                let mut t = Self::new(r.params)?;
                t.last_scaled = r.last_scaled;
                Ok(t)
            }
        }

        impl From<AffineTransform2D> for AffineRecord {
            fn from(t: AffineTransform2D) -> Self {
                Self {
                    params: t.params,
                    last_scaled: t.last_scaled,
                }
            }
        }
    }
}

impl Default for AffineTransform2D {
    fn default() -> Self {
        Self::identity()
    }
}

/// 对仿射变换的一次编辑.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TransformEdit {
    /// 旋转角增量 (度).
    Rotate(f64),

    /// 设置旋转角 (度).
    SetRotation(f64),

    /// 平移增量.
    Translate(f64, f64),

    /// 设置平移.
    SetTranslation(f64, f64),

    /// 某轴缩放增量. 联动时两轴同时取新值.
    Scale(Axis2d, f64),

    /// 设置某轴缩放. 联动时两轴同时取新值.
    SetScale(Axis2d, f64),

    /// 某轴剪切增量.
    Shear(Axis2d, f64),

    /// 设置某轴剪切.
    SetShear(Axis2d, f64),

    /// 开关缩放联动.
    ///
    /// 从不联动切换为联动时, 两轴都取最近一次被编辑的轴的值;
    /// 从联动切换为不联动时不改变数值.
    LinkScale(bool),

    /// 恢复为恒等变换. 保留联动开关.
    Reset,
}

impl AffineTransform2D {
    /// 校验并构造.
    pub fn new(params: AffineParams) -> TransformResult<Self> {
        if !params.is_invertible() {
            return Err(TransformError::DegenerateTransform);
        }
        Ok(Self {
            params,
            last_scaled: Axis2d::X,
        })
    }

    /// 恒等变换.
    #[inline]
    pub fn identity() -> Self {
        Self {
            params: AffineParams::default(),
            last_scaled: Axis2d::X,
        }
    }

    /// 全部参数.
    #[inline]
    pub fn params(&self) -> AffineParams {
        self.params
    }

    /// 旋转角 (度).
    #[inline]
    pub fn rotation_deg(&self) -> f64 {
        self.params.rotation_deg
    }

    /// 平移 `(x, y)`.
    #[inline]
    pub fn translation(&self) -> Idx2dF {
        (self.params.translate_x, self.params.translate_y)
    }

    /// 缩放 `(x, y)`.
    #[inline]
    pub fn scale(&self) -> Idx2dF {
        (self.params.scale_x, self.params.scale_y)
    }

    /// 剪切 `(x, y)`.
    #[inline]
    pub fn shear(&self) -> Idx2dF {
        (self.params.shear_x, self.params.shear_y)
    }

    /// 缩放是否联动.
    #[inline]
    pub fn scale_linked(&self) -> bool {
        self.params.scale_linked
    }

    /// 最近一次被编辑的缩放轴.
    #[inline]
    pub fn last_scaled(&self) -> Axis2d {
        self.last_scaled
    }

    /// 是否可逆. 由构造保证, 恒为 `true`; 供界面显示使用.
    #[inline]
    pub fn is_invertible(&self) -> bool {
        self.params.is_invertible()
    }

    /// 线性部分 `R · Sh · S`.
    pub fn linear(&self) -> Matrix2<f64> {
        let p = &self.params;
        let (sin, cos) = p.rotation_deg.to_radians().sin_cos();
        let r = Matrix2::new(cos, -sin, sin, cos);
        let sh = Matrix2::new(1.0, p.shear_x, p.shear_y, 1.0);
        let s = Matrix2::new(p.scale_x, 0.0, 0.0, p.scale_y);
        r * sh * s
    }

    /// 齐次矩阵 `T · R · Sh · S`.
    pub fn matrix(&self) -> Matrix3<f64> {
        let l = self.linear();
        Matrix3::new(
            l[(0, 0)],
            l[(0, 1)],
            self.params.translate_x,
            l[(1, 0)],
            l[(1, 1)],
            self.params.translate_y,
            0.0,
            0.0,
            1.0,
        )
    }

    /// 逆变换的齐次矩阵.
    pub fn inverse_matrix(&self) -> Matrix3<f64> {
        let l = self.linear();
        let det = l[(0, 0)] * l[(1, 1)] - l[(0, 1)] * l[(1, 0)];
        let inv = Matrix2::new(l[(1, 1)], -l[(0, 1)], -l[(1, 0)], l[(0, 0)]) / det;
        let t = inv * Vector2::new(self.params.translate_x, self.params.translate_y);
        Matrix3::new(
            inv[(0, 0)],
            inv[(0, 1)],
            -t.x,
            inv[(1, 0)],
            inv[(1, 1)],
            -t.y,
            0.0,
            0.0,
            1.0,
        )
    }

    /// 正变换.
    #[inline]
    pub fn apply(&self, p: Idx2dF) -> Idx2dF {
        apply_matrix(&self.matrix(), p)
    }

    /// 逆变换.
    #[inline]
    pub fn apply_inverse(&self, p: Idx2dF) -> Idx2dF {
        apply_matrix(&self.inverse_matrix(), p)
    }

    /// 执行一次编辑, 返回新的变换. 若结果不可逆, 返回 `DegenerateTransform`.
    pub fn edit(&self, edit: TransformEdit) -> TransformResult<Self> {
        let mut p = self.params;
        let mut last_scaled = self.last_scaled;

        let set_scale = |p: &mut AffineParams, axis: Axis2d, v: f64| {
            if p.scale_linked {
                p.scale_x = v;
                p.scale_y = v;
            } else {
                match axis {
                    Axis2d::X => p.scale_x = v,
                    Axis2d::Y => p.scale_y = v,
                }
            }
        };

        match edit {
            TransformEdit::Rotate(d) => p.rotation_deg += d,
            TransformEdit::SetRotation(v) => p.rotation_deg = v,
            TransformEdit::Translate(dx, dy) => {
                p.translate_x += dx;
                p.translate_y += dy;
            }
            TransformEdit::SetTranslation(x, y) => {
                p.translate_x = x;
                p.translate_y = y;
            }
            TransformEdit::Scale(axis, d) => {
                let cur = match axis {
                    Axis2d::X => p.scale_x,
                    Axis2d::Y => p.scale_y,
                };
                set_scale(&mut p, axis, cur + d);
                last_scaled = axis;
            }
            TransformEdit::SetScale(axis, v) => {
                set_scale(&mut p, axis, v);
                last_scaled = axis;
            }
            TransformEdit::Shear(Axis2d::X, d) => p.shear_x += d,
            TransformEdit::Shear(Axis2d::Y, d) => p.shear_y += d,
            TransformEdit::SetShear(Axis2d::X, v) => p.shear_x = v,
            TransformEdit::SetShear(Axis2d::Y, v) => p.shear_y = v,
            TransformEdit::LinkScale(link) => {
                if link && !p.scale_linked {
                    let v = match last_scaled {
                        Axis2d::X => p.scale_x,
                        Axis2d::Y => p.scale_y,
                    };
                    p.scale_x = v;
                    p.scale_y = v;
                }
                p.scale_linked = link;
            }
            TransformEdit::Reset => {
                p = AffineParams {
                    scale_linked: p.scale_linked,
                    ..AffineParams::default()
                }
            }
        }

        let mut next = Self::new(p)?;
        next.last_scaled = last_scaled;
        Ok(next)
    }
}

/// 用齐次矩阵变换一个二维点.
#[inline]
pub(crate) fn apply_matrix(m: &Matrix3<f64>, (x, y): Idx2dF) -> Idx2dF {
    (
        m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)],
        m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)],
    )
}
