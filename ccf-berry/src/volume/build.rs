//! 体重建主流程.
//!
//! 1. 分配与图谱同形状的强度网格和来源网格, 初始为背景与 `Empty`;
//! 2. 每个对齐的深度索引为 `中心深度 + round(offset / voxel)`. 多个对齐落在同一层时,
//!    输入顺序靠后的覆盖靠前的, 并记入报告;
//! 3. 切片经仿射变换重采样到平面网格后直接写入该层, 来源为 `Direct`;
//! 4. z-stack 模式下复制到 `[d - half, d + half]`, 中心层 `Direct`, 其余 `StackFilled`.
//!    `StackFilled` 永不覆盖 `Direct`;
//! 5. 按深度递增补齐空层: 上下都有源数据层时按距离线性混合; 只有一侧时保持该层不变;
//!    两侧都没有时保持为空. 插值结果不作为邻居.

use super::{BuildError, Provenance, ReconstructedVolume, VolumeBuildSpec};
use crate::alignment::Alignment;
use crate::atlas::{AtlasGeometry, Orientation};
use crate::sampler::{warp_histology, PlaneGrid};
use itertools::Itertools;
use ndarray::{Array2, ArrayView2, Zip};

/// 一幅已对齐的切片, 以及 (可能失败的) 图像数据.
///
/// 目录与文件的解析由调用方负责; 若伴随文件没有找到, `image` 即为对应的错误,
/// 该切片在重建时被跳过.
#[derive(Clone, Debug)]
pub struct AlignedSlice {
    /// 图像名, 用于报告.
    pub name: String,

    /// 对齐.
    pub alignment: Alignment,

    /// 切片强度, 形状 `(高, 宽)`.
    pub image: Result<Array2<f32>, BuildError>,
}

impl AlignedSlice {
    /// 新建.
    pub fn new<S: Into<String>>(
        name: S,
        alignment: Alignment,
        image: Result<Array2<f32>, BuildError>,
    ) -> Self {
        Self {
            name: name.into(),
            alignment,
            image,
        }
    }
}

/// 同一深度层被再次直接写入.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collision {
    /// 深度索引.
    pub depth: usize,

    /// 被覆盖的图像.
    pub overwritten: String,

    /// 覆盖它的图像.
    pub by: String,
}

/// 一次重建的报告.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildReport {
    /// 成功写入的图像及其深度索引.
    pub placed: Vec<(String, usize)>,

    /// 因图像错误被跳过的图像.
    pub skipped: Vec<(String, BuildError)>,

    /// 深度索引越界的图像.
    pub out_of_range: Vec<(String, i64)>,

    /// 深度冲突.
    pub collisions: Vec<Collision>,
}

impl BuildReport {
    /// 是否没有任何跳过、越界与冲突.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.out_of_range.is_empty() && self.collisions.is_empty()
    }
}

/// 对齐在深度轴上的索引, 可能越界.
#[inline]
fn depth_index<G: AtlasGeometry>(geometry: &G, orientation: Orientation, a: &Alignment) -> i64 {
    geometry.centre_depth(orientation) as i64 + a.pose.offset_voxels(geometry).round() as i64
}

/// 由一个目录的全部对齐切片重建稠密体.
///
/// 输入按给定顺序处理, 因此深度冲突时的结果是确定的. 单幅图像的失败只记入报告.
pub fn build<G, I>(
    spec: &VolumeBuildSpec,
    geometry: &G,
    orientation: Orientation,
    slices: I,
) -> (ReconstructedVolume, BuildReport)
where
    G: AtlasGeometry,
    I: IntoIterator<Item = AlignedSlice>,
{
    let mut volume = ReconstructedVolume::empty(geometry, orientation);
    let mut report = BuildReport::default();
    let grid = PlaneGrid::native(geometry, orientation);
    let n = geometry.depth_len(orientation);
    let half = spec.half_thickness();
    let mut owners: Vec<Option<String>> = vec![None; n];

    for slice in slices {
        let image = match slice.image {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Skipping `{}`: {e}", slice.name);
                report.skipped.push((slice.name, e));
                continue;
            }
        };
        let d = depth_index(geometry, orientation, &slice.alignment);
        if d < 0 || d >= n as i64 {
            log::warn!("Skipping `{}`: depth index {d} outside [0, {n})", slice.name);
            report.out_of_range.push((slice.name, d));
            continue;
        }
        let d = d as usize;

        let warped = warp_histology(
            image.view(),
            &slice.alignment.transform,
            grid.width,
            grid.height,
        );

        if let Some(prev) = owners[d].take() {
            log::warn!(
                "Depth {d} of `{}` is overwritten by `{}`",
                prev,
                slice.name
            );
            report.collisions.push(Collision {
                depth: d,
                overwritten: prev,
                by: slice.name.clone(),
            });
        }
        write_layer(&mut volume, d, warped.view(), Provenance::Direct);
        owners[d] = Some(slice.name.clone());

        for s in d.saturating_sub(half)..=d.saturating_add(half).min(n - 1) {
            if s != d && volume.layer_provenance(s) != Provenance::Direct {
                write_layer(&mut volume, s, warped.view(), Provenance::StackFilled);
            }
        }
        report.placed.push((slice.name, d));
    }

    fill_gaps(&mut volume);

    let [empty, direct, stacked, interpolated] = volume.provenance_counts();
    log::info!(
        "Built volume for `{}`: {} images placed, {} skipped; voxels direct = {direct}, stack-filled = {stacked}, interpolated = {interpolated}, empty = {empty}",
        spec.directory.display(),
        report.placed.len(),
        report.skipped.len() + report.out_of_range.len(),
    );
    (volume, report)
}

/// 写入一层, 并标记整层来源.
#[inline]
fn write_layer(
    volume: &mut ReconstructedVolume,
    depth: usize,
    data: ArrayView2<'_, f32>,
    provenance: Provenance,
) {
    let (mut values, mut tags) = volume.layers_mut(depth);
    values.assign(&data);
    tags.fill(provenance);
}

/// 按深度递增补齐空层. 任一时刻只额外持有两层数据.
fn fill_gaps(volume: &mut ReconstructedVolume) {
    let sources: Vec<usize> = volume
        .layer_provenances()
        .into_iter()
        .enumerate()
        .filter_map(|(d, p)| p.is_source().then_some(d))
        .collect();
    let (Some(&first), Some(&last)) = (sources.first(), sources.last()) else {
        return;
    };

    let held = volume.layer(first).to_owned();
    (0..first).for_each(|d| write_layer(volume, d, held.view(), Provenance::Interpolated));

    for (lo, hi) in sources.iter().copied().tuple_windows() {
        if hi - lo < 2 {
            continue;
        }
        let below = volume.layer(lo).to_owned();
        let above = volume.layer(hi).to_owned();
        let span = (hi - lo) as f32;
        for d in lo + 1..hi {
            let t = (d - lo) as f32 / span;
            let (mut values, mut tags) = volume.layers_mut(d);
            Zip::from(&mut values)
                .and(&below)
                .and(&above)
                .for_each(|x, &a, &b| *x = a * (1.0 - t) + b * t);
            tags.fill(Provenance::Interpolated);
        }
    }

    let held = volume.layer(last).to_owned();
    let n = volume.depth_len();
    (last + 1..n).for_each(|d| write_layer(volume, d, held.view(), Provenance::Interpolated));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::{AtlasFrame, Resolution};
    use crate::transform::{AffineTransform2D, PlanePose, TransformEdit};

    /// 深度轴长 8 (中心 3), 平面 5 x 4.
    fn frame() -> AtlasFrame {
        AtlasFrame::fake(Resolution::Um100, (8, 4, 5))
    }

    fn slice_at(name: &str, depth: i64, value: f32) -> AlignedSlice {
        let f = frame();
        let off = (depth - 3) as f64 * f.voxel_um();
        let pose = PlanePose::new(off, 0.0, 0.0, &f, Orientation::Coronal).unwrap();
        AlignedSlice::new(
            name,
            Alignment::new(pose, AffineTransform2D::identity()),
            Ok(Array2::from_elem((4, 5), value)),
        )
    }

    fn run(spec: &VolumeBuildSpec, slices: Vec<AlignedSlice>) -> (ReconstructedVolume, BuildReport) {
        build(spec, &frame(), Orientation::Coronal, slices)
    }

    fn assert_layer(v: &ReconstructedVolume, d: usize, value: f32) {
        assert!(
            v.layer(d).iter().all(|&x| (x - value).abs() < 1e-4),
            "layer {d}: {:?}",
            v.layer(d)
        );
    }

    #[test]
    fn test_interpolation_between_sparse_layers() {
        let spec = VolumeBuildSpec::new("/brain");
        let (v, report) = run(&spec, vec![slice_at("a", 2, 10.0), slice_at("b", 5, 40.0)]);
        assert!(report.is_clean());
        assert_eq!(report.placed, vec![("a".to_owned(), 2), ("b".to_owned(), 5)]);

        use Provenance::*;
        assert_eq!(
            v.layer_provenances(),
            vec![
                Interpolated,
                Interpolated,
                Direct,
                Interpolated,
                Interpolated,
                Direct,
                Interpolated,
                Interpolated
            ]
        );
        // 1/3 与 2/3 处.
        assert_layer(&v, 3, 20.0);
        assert_layer(&v, 4, 30.0);
        // 边界保持, 不外推.
        assert_layer(&v, 0, 10.0);
        assert_layer(&v, 1, 10.0);
        assert_layer(&v, 7, 40.0);
        assert_eq!(v.provenance().dim(), v.intensity().dim());
    }

    #[test]
    fn test_no_slices_stay_empty() {
        let (v, _) = run(&VolumeBuildSpec::new("/brain"), vec![]);
        assert!(v.layer_provenances().iter().all(|p| *p == Provenance::Empty));
        assert!(v.intensity().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_z_stack() {
        let spec = VolumeBuildSpec::new("/brain").with_z_stack(1);
        let (v, _) = run(&spec, vec![slice_at("a", 5, 7.0)]);
        assert_eq!(v.layer_provenance(4), Provenance::StackFilled);
        assert_eq!(v.layer_provenance(5), Provenance::Direct);
        assert_eq!(v.layer_provenance(6), Provenance::StackFilled);
        for d in 4..=6 {
            assert_eq!(v.layer(d), v.layer(5));
        }
        assert_eq!(v.layer_provenance(3), Provenance::Interpolated);
        assert_eq!(v.layer_provenance(7), Provenance::Interpolated);

        // 夹在边界内; 复制层不覆盖直接插入的层.
        let (v, _) = run(&spec, vec![slice_at("a", 0, 1.0), slice_at("b", 1, 2.0)]);
        assert_eq!(v.layer_provenance(0), Provenance::Direct);
        assert_eq!(v.layer_provenance(1), Provenance::Direct);
        assert_layer(&v, 0, 1.0);
        assert_layer(&v, 1, 2.0);
        assert_eq!(v.layer_provenance(2), Provenance::StackFilled);
        assert_layer(&v, 2, 2.0);

        // 直接插入覆盖此前的复制层.
        let (v, _) = run(&spec, vec![slice_at("a", 3, 1.0), slice_at("b", 4, 2.0)]);
        assert_eq!(v.layer_provenance(4), Provenance::Direct);
        assert_layer(&v, 4, 2.0);
        assert_layer(&v, 2, 1.0);
    }

    #[test]
    fn test_collision_last_write_wins() {
        crate::init_test_logger();
        let (v, report) = run(
            &VolumeBuildSpec::new("/brain"),
            vec![slice_at("a", 4, 1.0), slice_at("b", 4, 9.0)],
        );
        assert_layer(&v, 4, 9.0);
        assert_eq!(
            report.collisions,
            vec![Collision {
                depth: 4,
                overwritten: "a".to_owned(),
                by: "b".to_owned()
            }]
        );
    }

    #[test]
    fn test_unresolved_companion_is_skipped() {
        let mut missing = slice_at("b", 6, 1.0);
        missing.image = Err(BuildError::UnresolvedCompanionFile("/brain/b_GFP.tif".into()));
        let (v, report) = run(
            &VolumeBuildSpec::new("/brain"),
            vec![slice_at("a", 2, 5.0), missing],
        );
        assert_eq!(report.placed.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "b");
        assert_eq!(v.layer_provenance(6), Provenance::Interpolated);
        assert_layer(&v, 6, 5.0);
    }

    #[test]
    fn test_huge_stack_thickness_is_clamped() {
        let spec = VolumeBuildSpec::new("/brain").with_z_stack(usize::MAX);
        let (v, report) = run(&spec, vec![slice_at("a", 5, 4.0)]);
        assert_eq!(report.placed, vec![("a".to_owned(), 5)]);
        assert_eq!(v.layer_provenance(5), Provenance::Direct);
        for d in (0..8).filter(|&d| d != 5) {
            assert_eq!(v.layer_provenance(d), Provenance::StackFilled);
            assert_layer(&v, d, 4.0);
        }
    }

    #[test]
    fn test_slice_is_warped() {
        // 平移一个像素后, 最左一列落到背景.
        let mut s = slice_at("a", 3, 3.0);
        s.alignment.transform = AffineTransform2D::identity()
            .edit(TransformEdit::SetTranslation(1.0, 0.0))
            .unwrap();
        let (v, _) = run(&VolumeBuildSpec::new("/brain"), vec![s]);
        let l = v.layer(3);
        assert!(l.column(0).iter().all(|&x| x == 0.0));
        assert!(l.column(1).iter().all(|&x| x == 3.0));
    }

    #[test]
    fn test_sagittal_layers() {
        let f = frame();
        let (w, h) = f.plane_size(Orientation::Sagittal);
        let pose = PlanePose::new(100.0, 0.0, 0.0, &f, Orientation::Sagittal).unwrap();
        let img = Array2::from_shape_fn((h, w), |(r, c)| (r * 10 + c) as f32);
        let s = AlignedSlice::new(
            "s",
            Alignment::new(pose, AffineTransform2D::identity()),
            Ok(img.clone()),
        );
        let (v, _) = build(&VolumeBuildSpec::new("/"), &f, Orientation::Sagittal, vec![s]);
        let d = f.centre_depth(Orientation::Sagittal) + 1;
        assert_eq!(v.layer(d), img);
        // 原始轴序 (AP, DV, LR): 行为 DV, 列为 AP.
        assert_eq!(v.intensity()[[3, 1, d]], img[(1, 3)]);
    }
}
