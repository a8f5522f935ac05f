use super::{LandmarkError, LandmarkResult};
use crate::transform::{AffineParams, AffineTransform2D};
use nalgebra::{Matrix2, Matrix3};

/// 将一般仿射矩阵分解为 [`AffineTransform2D`] 的参数, 严格按 `T · R · Sh · S` 求逆.
///
/// 分解路线固定:
///
/// 1. 平移取矩阵的平移列;
/// 2. 旋转角取线性部分第一列的方向 `θ = atan2(L10, L00)`, `sx` 取第一列的模;
/// 3. `U = Rᵀ · L = Sh · S`, 取 `sy = U11`, `shx = U01 / sy`, `shy = 0`.
///
/// 重新组合分解后的参数可在数值误差内还原 `m`. 若线性部分奇异, 返回
/// `LandmarkError::Transform(DegenerateTransform)`.
pub fn decompose(m: &Matrix3<f64>) -> LandmarkResult<AffineTransform2D> {
    let l = Matrix2::new(m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]);

    let theta = l[(1, 0)].atan2(l[(0, 0)]);
    let scale_x = l[(0, 0)].hypot(l[(1, 0)]);
    let (sin, cos) = theta.sin_cos();
    let rt = Matrix2::new(cos, sin, -sin, cos);
    let u = rt * l;

    let scale_y = u[(1, 1)];
    let shear_x = if scale_y != 0.0 { u[(0, 1)] / scale_y } else { 0.0 };

    let params = AffineParams {
        rotation_deg: theta.to_degrees(),
        translate_x: m[(0, 2)],
        translate_y: m[(1, 2)],
        scale_x,
        scale_y,
        shear_x,
        shear_y: 0.0,
        scale_linked: false,
    };
    AffineTransform2D::new(params).map_err(LandmarkError::from)
}
