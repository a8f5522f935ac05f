//! 斜切平面的位姿与平面基.

use super::{TransformError, TransformResult};
use crate::atlas::{AtlasGeometry, Orientation};
use nalgebra::{Rotation3, Unit, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 斜切平面的位姿, 相对于方向的基准平面.
///
/// `offset` 以微米为单位, 沿基准法向, 以图谱中心为零点.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlanePose {
    offset_um: f64,
    pitch_deg: f64,
    yaw_deg: f64,
}

/// 对平面位姿的一次编辑.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PoseEdit {
    /// 偏移增量 (微米).
    Offset(f64),

    /// 设置偏移 (微米).
    SetOffset(f64),

    /// 俯仰角增量 (度).
    Pitch(f64),

    /// 设置俯仰角 (度).
    SetPitch(f64),

    /// 偏航角增量 (度).
    Yaw(f64),

    /// 设置偏航角 (度).
    SetYaw(f64),

    /// 回到基准平面.
    Reset,
}

impl PlanePose {
    /// 构造位姿, 并检查偏移是否在 `geometry` 的深度范围内.
    pub fn new<G: AtlasGeometry>(
        offset_um: f64,
        pitch_deg: f64,
        yaw_deg: f64,
        geometry: &G,
        orientation: Orientation,
    ) -> TransformResult<Self> {
        let pose = Self {
            offset_um,
            pitch_deg,
            yaw_deg,
        };
        pose.check(geometry, orientation)?;
        Ok(pose)
    }

    /// 偏移 (微米).
    #[inline]
    pub fn offset_um(&self) -> f64 {
        self.offset_um
    }

    /// 俯仰角 (度).
    #[inline]
    pub fn pitch_deg(&self) -> f64 {
        self.pitch_deg
    }

    /// 偏航角 (度).
    #[inline]
    pub fn yaw_deg(&self) -> f64 {
        self.yaw_deg
    }

    /// 以体素为单位的偏移.
    #[inline]
    pub fn offset_voxels<G: AtlasGeometry>(&self, geometry: &G) -> f64 {
        self.offset_um / geometry.voxel_um()
    }

    /// 允许的偏移范围 (体素): 平面原点必须落在深度轴 `[0, n - 1]` 内.
    pub fn offset_bounds<G: AtlasGeometry>(geometry: &G, orientation: Orientation) -> (f64, f64) {
        let n = geometry.depth_len(orientation) as f64;
        let c = geometry.centre_depth(orientation) as f64;
        (-c, (n - 1.0) - c)
    }

    /// 校验角度有限, 且偏移在深度范围内.
    pub fn check<G: AtlasGeometry>(
        &self,
        geometry: &G,
        orientation: Orientation,
    ) -> TransformResult<()> {
        if !self.pitch_deg.is_finite() || !self.yaw_deg.is_finite() {
            return Err(TransformError::NonFiniteAngle);
        }
        let off = self.offset_voxels(geometry);
        let (lo, hi) = Self::offset_bounds(geometry, orientation);
        if !off.is_finite() || off < lo || off > hi {
            return Err(TransformError::OffsetOutOfBounds(off, lo, hi));
        }
        Ok(())
    }

    /// 执行一次编辑, 返回新的、已校验的位姿.
    pub fn edit<G: AtlasGeometry>(
        &self,
        edit: PoseEdit,
        geometry: &G,
        orientation: Orientation,
    ) -> TransformResult<Self> {
        let mut next = *self;
        match edit {
            PoseEdit::Offset(d) => next.offset_um += d,
            PoseEdit::SetOffset(v) => next.offset_um = v,
            PoseEdit::Pitch(d) => next.pitch_deg += d,
            PoseEdit::SetPitch(v) => next.pitch_deg = v,
            PoseEdit::Yaw(d) => next.yaw_deg += d,
            PoseEdit::SetYaw(v) => next.yaw_deg = v,
            PoseEdit::Reset => next = Self::default(),
        }
        next.check(geometry, orientation)?;
        Ok(next)
    }
}

/// 斜切平面在图谱索引空间中的原点与正交基.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlaneBasis {
    /// 平面原点 (体素坐标).
    pub origin: Vector3<f64>,

    /// 平面内水平方向.
    pub u: Vector3<f64>,

    /// 平面内竖直方向.
    pub v: Vector3<f64>,

    /// 平面法向.
    pub normal: Vector3<f64>,
}

/// 三个轴的单位向量.
#[inline]
fn unit_axis(axis: usize) -> Vector3<f64> {
    let mut e = Vector3::zeros();
    e[axis] = 1.0;
    e
}

impl PlaneBasis {
    /// 基准平面 (零俯仰、零偏航) 的 `(u, v, n)`.
    pub fn base_axes(orientation: Orientation) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
        let (u, v) = orientation.in_plane_axes();
        (
            unit_axis(u),
            unit_axis(v),
            unit_axis(orientation.depth_axis()),
        )
    }

    /// 由位姿构造平面基.
    ///
    /// 先绕基准水平轴 `u` 转过俯仰角, 再绕俯仰后的竖直轴转过偏航角.
    /// 原点为图谱中心沿 **基准** 法向平移 `offset` 个体素.
    pub fn new<G: AtlasGeometry>(geometry: &G, orientation: Orientation, pose: &PlanePose) -> Self {
        let (u, v, n) = Self::base_axes(orientation);

        let pitch = Rotation3::from_axis_angle(&Unit::new_normalize(u), pose.pitch_deg.to_radians());
        let (v, n) = (pitch * v, pitch * n);

        let yaw = Rotation3::from_axis_angle(&Unit::new_normalize(v), pose.yaw_deg.to_radians());
        let (u, n) = (yaw * u, yaw * n);

        let (a, b, c) = geometry.centre();
        let centre = Vector3::new(a as f64, b as f64, c as f64);
        let origin = centre + unit_axis(orientation.depth_axis()) * pose.offset_voxels(geometry);

        Self {
            origin,
            u,
            v,
            normal: n,
        }
    }

    /// 平面内坐标 `(du, dv)` (体素) 对应的三维点.
    #[inline]
    pub fn point(&self, du: f64, dv: f64) -> Vector3<f64> {
        self.origin + self.u * du + self.v * dv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::{AtlasFrame, Resolution};

    fn near(a: Vector3<f64>, b: Vector3<f64>) -> bool {
        (a - b).norm() < 1e-9
    }

    #[test]
    fn test_zero_pose_origin_is_centre() {
        let frame = AtlasFrame::new(Resolution::Um25);
        for o in Orientation::ALL {
            let b = PlaneBasis::new(&frame, o, &PlanePose::default());
            assert!(near(b.origin, Vector3::new(263.0, 159.0, 227.0)));
            let (u, v, n) = PlaneBasis::base_axes(o);
            assert!(near(b.u, u) && near(b.v, v) && near(b.normal, n));
        }
    }

    #[test]
    fn test_offset_moves_along_base_normal() {
        let frame = AtlasFrame::new(Resolution::Um100);
        let pose = PlanePose::new(-300.0, 20.0, 0.0, &frame, Orientation::Horizontal).unwrap();
        let b = PlaneBasis::new(&frame, Orientation::Horizontal, &pose);
        assert!(near(b.origin, Vector3::new(65.0, 36.0, 56.0)));
    }

    #[test]
    fn test_yaw_applies_in_pitched_frame() {
        let frame = AtlasFrame::new(Resolution::Um100);
        let pose = PlanePose::new(0.0, 90.0, 90.0, &frame, Orientation::Coronal).unwrap();
        let b = PlaneBasis::new(&frame, Orientation::Coronal, &pose);
        assert!(near(b.u, Vector3::new(0.0, 1.0, 0.0)));
        assert!(near(b.v, Vector3::new(-1.0, 0.0, 0.0)));
        assert!(near(b.normal, Vector3::new(0.0, 0.0, -1.0)));
    }

    #[test]
    fn test_basis_stays_orthonormal() {
        let frame = AtlasFrame::new(Resolution::Um50);
        let pose = PlanePose::new(150.0, 13.0, -27.5, &frame, Orientation::Sagittal).unwrap();
        let b = PlaneBasis::new(&frame, Orientation::Sagittal, &pose);
        for w in [b.u, b.v, b.normal] {
            assert!((w.norm() - 1.0).abs() < 1e-12);
        }
        assert!(b.u.dot(&b.v).abs() < 1e-12);
        assert!(b.u.dot(&b.normal).abs() < 1e-12);
        assert!(b.v.dot(&b.normal).abs() < 1e-12);
    }

    #[test]
    fn test_offset_bounds() {
        // 深度轴长 132, 中心 65: 允许 [-65, 66] 个体素.
        let frame = AtlasFrame::new(Resolution::Um100);
        let o = Orientation::Coronal;
        assert!(PlanePose::new(6600.0, 0.0, 0.0, &frame, o).is_ok());
        assert!(PlanePose::new(-6500.0, 0.0, 0.0, &frame, o).is_ok());
        assert!(matches!(
            PlanePose::new(6700.0, 0.0, 0.0, &frame, o),
            Err(TransformError::OffsetOutOfBounds(..))
        ));

        let pose = PlanePose::default();
        let moved = pose.edit(PoseEdit::Offset(500.0), &frame, o).unwrap();
        assert_eq!(moved.offset_um(), 500.0);
        assert!(moved.edit(PoseEdit::SetOffset(-1e6), &frame, o).is_err());
        assert_eq!(
            moved.edit(PoseEdit::Yaw(f64::INFINITY), &frame, o),
            Err(TransformError::NonFiniteAngle)
        );
        assert_eq!(moved.edit(PoseEdit::Reset, &frame, o), Ok(PlanePose::default()));
    }
}
