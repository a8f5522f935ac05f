//! 最小二乘仿射拟合.
//!
//! 对 6 个自由参数解正规方程. 组织切片一侧的点先做 Hartley 归一化
//! (质心移到原点, 平均距离缩放为 `sqrt(2)`), 再以归一化正规矩阵的条件数判定病态.

use super::{decompose, LandmarkError, LandmarkPair, LandmarkResult};
use crate::atlas::{AtlasVolume, Orientation};
use crate::consts::{CONDITION_NUMBER_LIMIT, MIN_LANDMARKS};
use crate::sampler::{sample_intensity, warp_histology, PlaneGrid};
use crate::transform::{apply_matrix, AffineTransform2D, PlanePose};
use crate::Idx2dF;
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, ArrayView2};

/// 一次最小二乘拟合的结果.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AffineFit {
    /// 齐次矩阵, 最后一行为 `[0, 0, 1]`.
    pub matrix: Matrix3<f64>,

    /// 残差平方和 `Σ ‖M·p - q‖²`.
    pub rss: f64,

    /// 归一化正规矩阵的条件数.
    pub condition: f64,

    /// 参与拟合的点对个数.
    pub n: usize,
}

impl AffineFit {
    /// 均方根残差.
    #[inline]
    pub fn rms(&self) -> f64 {
        (self.rss / self.n as f64).sqrt()
    }
}

/// Hartley 归一化. 返回归一化矩阵与归一化后的点.
fn normalize(pts: &[Idx2dF]) -> (Matrix3<f64>, Vec<Idx2dF>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| (p.0 - cx).hypot(p.1 - cy))
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| (s * (p.0 - cx), s * (p.1 - cy))).collect();
    (t, normalized)
}

/// 对称半正定矩阵的条件数. 奇异时为无穷大.
fn condition_number(m: &Matrix3<f64>) -> f64 {
    let sv = m.svd(false, false).singular_values;
    let max = sv.iter().copied().fold(0.0_f64, f64::max);
    let min = sv.iter().copied().fold(f64::INFINITY, f64::min);
    if min > 0.0 {
        max / min
    } else {
        f64::INFINITY
    }
}

/// 最小二乘拟合 `M`, 使 `Σ ‖M·histology_i - atlas_i‖²` 最小.
///
/// # 返回值
///
/// - 点对少于 3 个时, 返回 `Err(LandmarkError::InsufficientLandmarks)`;
/// - 正规矩阵奇异或条件数超过阈值时, 返回 `Err(LandmarkError::DegenerateLandmarkSet)`.
pub fn fit(pairs: &[LandmarkPair]) -> LandmarkResult<AffineFit> {
    if pairs.len() < MIN_LANDMARKS {
        return Err(LandmarkError::InsufficientLandmarks(
            pairs.len(),
            MIN_LANDMARKS,
        ));
    }

    let src: Vec<Idx2dF> = pairs.iter().map(|p| p.histology).collect();
    let (t, src_n) = normalize(&src);

    let mut normal = Matrix3::<f64>::zeros();
    let mut rhs_x = Vector3::<f64>::zeros();
    let mut rhs_y = Vector3::<f64>::zeros();
    for (&(x, y), pair) in src_n.iter().zip(pairs) {
        let row = Vector3::new(x, y, 1.0);
        normal += row * row.transpose();
        rhs_x += row * pair.atlas.0;
        rhs_y += row * pair.atlas.1;
    }

    let condition = condition_number(&normal);
    if !condition.is_finite() || condition > CONDITION_NUMBER_LIMIT {
        return Err(LandmarkError::DegenerateLandmarkSet(condition));
    }
    let lu = normal.lu();
    let a = lu
        .solve(&rhs_x)
        .ok_or(LandmarkError::DegenerateLandmarkSet(condition))?;
    let b = lu
        .solve(&rhs_y)
        .ok_or(LandmarkError::DegenerateLandmarkSet(condition))?;

    let m_norm = Matrix3::new(a[0], a[1], a[2], b[0], b[1], b[2], 0.0, 0.0, 1.0);
    let matrix = m_norm * t;
    let rss = residual_sum_of_squares(&matrix, pairs);

    Ok(AffineFit {
        matrix,
        rss,
        condition,
        n: pairs.len(),
    })
}

/// 残差平方和.
pub(crate) fn residual_sum_of_squares(m: &Matrix3<f64>, pairs: &[LandmarkPair]) -> f64 {
    pairs
        .iter()
        .map(|p| {
            let (x, y) = apply_matrix(m, p.histology);
            (x - p.atlas.0).powi(2) + (y - p.atlas.1).powi(2)
        })
        .sum()
}

/// 拟合并分解为仿射参数.
pub fn solve(pairs: &[LandmarkPair]) -> LandmarkResult<AffineTransform2D> {
    let fit = fit(pairs)?;
    let transform = decompose(&fit.matrix)?;
    log::debug!(
        "Solved affine from {} landmarks: rms = {:.4}, cond = {:.3e}",
        fit.n,
        fit.rms(),
        fit.condition
    );
    Ok(transform)
}

/// 预览: 同一输出网格上的图谱平面与变换后的组织切片.
#[derive(Clone, Debug)]
pub struct Preview {
    /// 图谱强度平面.
    pub atlas: Array2<f32>,

    /// 经候选变换重采样的组织切片.
    pub histology: Array2<f32>,
}

/// 用候选变换渲染预览. 不修改任何已保存的对齐.
pub fn preview(
    atlas: &AtlasVolume,
    orientation: Orientation,
    pose: &PlanePose,
    candidate: &AffineTransform2D,
    histology: ArrayView2<'_, f32>,
    grid: PlaneGrid,
) -> Preview {
    Preview {
        atlas: sample_intensity(atlas, orientation, pose, grid),
        histology: warp_histology(histology, candidate, grid.width, grid.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::AffineParams;

    fn synthetic(t: &AffineTransform2D, pts: &[Idx2dF]) -> Vec<LandmarkPair> {
        pts.iter().map(|&p| LandmarkPair::new(p, t.apply(p))).collect()
    }

    fn truth() -> AffineTransform2D {
        AffineTransform2D::new(AffineParams {
            rotation_deg: -21.0,
            translate_x: 14.0,
            translate_y: -3.5,
            scale_x: 0.8,
            scale_y: 1.3,
            shear_x: 0.15,
            shear_y: 0.0,
            scale_linked: false,
        })
        .unwrap()
    }

    #[test]
    fn test_exact_recovery() {
        let t = truth();
        let pairs = synthetic(&t, &[(0.0, 0.0), (120.0, 5.0), (-40.0, 90.0), (60.0, -70.0)]);
        let fit = fit(&pairs).unwrap();
        assert!(fit.rss < 1e-12);
        assert!((fit.matrix - t.matrix()).abs().max() < 1e-9);

        let solved = solve(&pairs).unwrap();
        let (p, q) = (solved.params(), t.params());
        assert!((p.rotation_deg - q.rotation_deg).abs() < 1e-9);
        assert!((p.scale_x - q.scale_x).abs() < 1e-9);
        assert!((p.scale_y - q.scale_y).abs() < 1e-9);
        assert!((p.shear_x - q.shear_x).abs() < 1e-9);
        assert!((p.translate_x - q.translate_x).abs() < 1e-9);
    }

    #[test]
    fn test_least_squares_beats_grid_search() {
        let t = truth();
        let mut pairs = synthetic(&t, &[(0.0, 0.0), (10.0, 1.0), (-4.0, 9.0), (6.0, -7.0), (3.0, 3.0)]);
        // 加入噪声, 使残差不为零.
        let noise = [(0.3, -0.2), (-0.1, 0.4), (0.2, 0.1), (-0.4, -0.3), (0.1, 0.2)];
        for (p, n) in pairs.iter_mut().zip(noise) {
            p.atlas = (p.atlas.0 + n.0, p.atlas.1 + n.1);
        }

        let best = fit(&pairs).unwrap();
        assert!(best.rss > 1e-6);

        // 在最优解附近的 3^6 网格上逐一扰动, 残差不应更小.
        let deltas = [-0.01, 0.0, 0.01];
        let mut checked = 0;
        for i in 0..729_usize {
            let mut m = best.matrix;
            let mut k = i;
            for (r, c) in [(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)] {
                m[(r, c)] += deltas[k % 3];
                k /= 3;
            }
            assert!(residual_sum_of_squares(&m, &pairs) >= best.rss - 1e-9);
            checked += 1;
        }
        assert_eq!(checked, 729);
    }

    #[test]
    fn test_collinear_is_degenerate() {
        let pairs = [
            LandmarkPair::new((0.0, 0.0), (1.0, 2.0)),
            LandmarkPair::new((1.0, 1.0), (3.0, 1.0)),
            LandmarkPair::new((2.0, 2.0), (5.0, 7.0)),
        ];
        assert!(matches!(
            fit(&pairs),
            Err(LandmarkError::DegenerateLandmarkSet(_))
        ));

        let dup = [
            LandmarkPair::new((4.0, 4.0), (1.0, 2.0)),
            LandmarkPair::new((4.0, 4.0), (3.0, 1.0)),
            LandmarkPair::new((4.0, 4.0), (5.0, 7.0)),
        ];
        assert!(matches!(
            solve(&dup),
            Err(LandmarkError::DegenerateLandmarkSet(_))
        ));
    }

    #[test]
    fn test_near_collinear_is_degenerate() {
        let pairs = [
            LandmarkPair::new((0.0, 0.0), (0.0, 0.0)),
            LandmarkPair::new((100.0, 100.0), (1.0, 0.0)),
            LandmarkPair::new((200.0, 200.0 + 1e-7), (2.0, 1.0)),
        ];
        assert!(matches!(
            fit(&pairs),
            Err(LandmarkError::DegenerateLandmarkSet(_))
        ));
    }

    #[test]
    fn test_preview_does_not_need_commit() {
        let atlas = crate::atlas::ramp_atlas((6, 6, 6));
        let img = Array2::from_elem((4, 4), 1.0_f32);
        let grid = PlaneGrid::new(4, 4, 1.0);
        let p = preview(
            &atlas,
            Orientation::Coronal,
            &PlanePose::default(),
            &AffineTransform2D::identity(),
            img.view(),
            grid,
        );
        assert_eq!(p.atlas.dim(), (4, 4));
        assert_eq!(p.histology, img);
    }
}
