//! 按脑区统计平均强度.
//!
//! 先对 (结构 id, 强度) 做一次直方图, 得到每个 id 的强度和与计数;
//! 每个选中的结构再把其后代集合内各 id 的计数合并. 选中的结构之间可以重叠,
//! 重叠的像素在每个结构中各算一次.

use super::StructureForest;
use crate::volume::{Provenance, ReconstructedVolume};
use ndarray::{ArrayView, ArrayView3, Dimension, Zip};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 统计错误.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantifyError {
    /// 该结构 (及其后代) 没有覆盖任何像素, 平均值无定义.
    EmptyStructureSelection(u32),

    /// 结构 id 网格与强度网格形状不一致.
    ShapeMismatch {
        /// 结构 id 网格形状.
        labels: Vec<usize>,
        /// 强度网格形状.
        intensity: Vec<usize>,
    },

    /// 该结构不在本次统计的选择中.
    NotSelected(u32),
}

impl fmt::Display for QuantifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStructureSelection(id) => {
                write!(f, "structure {id} covers no position")
            }
            Self::ShapeMismatch { labels, intensity } => write!(
                f,
                "label grid {labels:?} does not match intensity grid {intensity:?}"
            ),
            Self::NotSelected(id) => write!(f, "structure {id} was not selected"),
        }
    }
}

impl std::error::Error for QuantifyError {}

/// 统计相关操作的结果.
pub type QuantifyResult<T> = Result<T, QuantifyError>;

/// 强度和与计数.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StructureStat {
    /// 强度和.
    pub sum: f64,

    /// 像素 (体素) 个数.
    pub count: usize,
}

impl StructureStat {
    #[inline]
    fn add(&mut self, value: f32) {
        self.sum += value as f64;
        self.count += 1;
    }

    #[inline]
    fn merge(&mut self, other: &Self) {
        self.sum += other.sum;
        self.count += other.count;
    }

    /// 平均值. 计数为 0 时返回 `None`.
    #[inline]
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// 平均值. 计数为 0 时返回 `NaN`.
    #[inline]
    pub fn mean_or_nan(&self) -> f64 {
        self.mean().unwrap_or(f64::NAN)
    }
}

type Bins = HashMap<u32, StructureStat>;

fn merge_bins(mut a: Bins, b: Bins) -> Bins {
    for (id, s) in b {
        a.entry(id).or_default().merge(&s);
    }
    a
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};

        fn tally<D: Dimension>(labels: ArrayView<'_, u32, D>, intensity: ArrayView<'_, f32, D>) -> Bins {
            Zip::from(&labels)
                .and(&intensity)
                .into_par_iter()
                .fold(Bins::new, |mut bins, (&l, &v)| {
                    bins.entry(l).or_default().add(v);
                    bins
                })
                .reduce(Bins::new, merge_bins)
        }

        fn tally_where<D, T, F>(
            labels: ArrayView<'_, u32, D>,
            intensity: ArrayView<'_, f32, D>,
            tags: ArrayView<'_, T, D>,
            keep: F,
        ) -> Bins
        where
            D: Dimension,
            T: Sync,
            F: Fn(&T) -> bool + Sync + Send,
        {
            Zip::from(&labels)
                .and(&intensity)
                .and(&tags)
                .into_par_iter()
                .fold(Bins::new, |mut bins, (&l, &v, t)| {
                    if keep(t) {
                        bins.entry(l).or_default().add(v);
                    }
                    bins
                })
                .reduce(Bins::new, merge_bins)
        }
    } else {
        fn tally<D: Dimension>(labels: ArrayView<'_, u32, D>, intensity: ArrayView<'_, f32, D>) -> Bins {
            Zip::from(&labels)
                .and(&intensity)
                .fold(Bins::new(), |mut bins, &l, &v| {
                    bins.entry(l).or_default().add(v);
                    bins
                })
        }

        fn tally_where<D, T, F>(
            labels: ArrayView<'_, u32, D>,
            intensity: ArrayView<'_, f32, D>,
            tags: ArrayView<'_, T, D>,
            keep: F,
        ) -> Bins
        where
            D: Dimension,
            F: Fn(&T) -> bool,
        {
            Zip::from(&labels)
                .and(&intensity)
                .and(&tags)
                .fold(Bins::new(), |mut bins, &l, &v, t| {
                    if keep(t) {
                        bins.entry(l).or_default().add(v);
                    }
                    bins
                })
        }
    }
}

/// 每个结构 id 的强度和与计数.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelHistogram {
    bins: Bins,
}

impl LabelHistogram {
    /// 对任意维度的结构 id 网格与同形状的强度网格做直方图.
    pub fn new<D: Dimension>(
        labels: ArrayView<'_, u32, D>,
        intensity: ArrayView<'_, f32, D>,
    ) -> QuantifyResult<Self> {
        check_shape(labels.shape(), intensity.shape())?;
        Ok(Self {
            bins: tally(labels, intensity),
        })
    }

    /// 同 [`LabelHistogram::new`], 但只统计 `keep(tag)` 成立的位置.
    pub fn with_filter<D, T, F>(
        labels: ArrayView<'_, u32, D>,
        intensity: ArrayView<'_, f32, D>,
        tags: ArrayView<'_, T, D>,
        keep: F,
    ) -> QuantifyResult<Self>
    where
        D: Dimension,
        T: Sync,
        F: Fn(&T) -> bool + Sync + Send,
    {
        check_shape(labels.shape(), intensity.shape())?;
        check_shape(labels.shape(), tags.shape())?;
        Ok(Self {
            bins: tally_where(labels, intensity, tags, keep),
        })
    }

    /// 单个 id 的统计.
    #[inline]
    pub fn get(&self, id: u32) -> StructureStat {
        self.bins.get(&id).copied().unwrap_or_default()
    }

    /// 出现过的 id 个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// 合并另一张直方图, 用于逐切片累加.
    pub fn merge(&mut self, other: &Self) {
        for (&id, s) in &other.bins {
            self.bins.entry(id).or_default().merge(s);
        }
    }

    /// 合并 `ids` 内各 id 的统计.
    pub fn aggregate(&self, ids: &HashSet<u32>) -> StructureStat {
        let mut total = StructureStat::default();
        self.bins
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .for_each(|(_, s)| total.merge(s));
        total
    }
}

#[inline]
fn check_shape(labels: &[usize], intensity: &[usize]) -> QuantifyResult<()> {
    if labels == intensity {
        Ok(())
    } else {
        Err(QuantifyError::ShapeMismatch {
            labels: labels.to_vec(),
            intensity: intensity.to_vec(),
        })
    }
}

/// 一次统计的结果: 选中的结构 id → 统计.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Quantification {
    stats: BTreeMap<u32, StructureStat>,
}

impl Quantification {
    /// 由直方图汇总 `selected` 中的每个结构 (连同其后代).
    ///
    /// 结构层级中不存在的 id 记为空统计, 并给出警告.
    pub fn from_histogram<I>(hist: &LabelHistogram, forest: &StructureForest, selected: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let stats = selected
            .into_iter()
            .map(|id| {
                let stat = match forest.descendants(id) {
                    Some(ids) => hist.aggregate(ids),
                    None => {
                        log::warn!("Structure {id} is not in the ontology");
                        StructureStat::default()
                    }
                };
                (id, stat)
            })
            .collect();
        Self { stats }
    }

    /// 结构 `id` 的平均强度.
    ///
    /// # 返回值
    ///
    /// - 未选中时, 返回 `Err(QuantifyError::NotSelected)`;
    /// - 没有覆盖任何像素时, 返回 `Err(QuantifyError::EmptyStructureSelection)`.
    pub fn mean(&self, id: u32) -> QuantifyResult<f64> {
        self.stats
            .get(&id)
            .ok_or(QuantifyError::NotSelected(id))?
            .mean()
            .ok_or(QuantifyError::EmptyStructureSelection(id))
    }

    /// 结构 `id` 的平均强度, 未选中或为空时为 `NaN`.
    #[inline]
    pub fn mean_or_nan(&self, id: u32) -> f64 {
        self.stats
            .get(&id)
            .map_or(f64::NAN, StructureStat::mean_or_nan)
    }

    /// 结构 `id` 的统计.
    #[inline]
    pub fn get(&self, id: u32) -> Option<&StructureStat> {
        self.stats.get(&id)
    }

    /// 按 id 递增遍历.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &StructureStat)> + '_ {
        self.stats.iter().map(|(&id, s)| (id, s))
    }

    /// 所有平均值, 空结构为 `NaN`.
    pub fn means(&self) -> BTreeMap<u32, f64> {
        self.stats
            .iter()
            .map(|(&id, s)| (id, s.mean_or_nan()))
            .collect()
    }

    /// 选中的结构个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

/// 在结构 id 网格 (平面或体) 与同形状的强度网格上, 统计每个选中结构的平均强度.
///
/// 每个选中的结构独立统计, 互相重叠的部分各算一次. 某个结构没有覆盖任何位置时,
/// 只有该结构的平均值无定义, 整次统计仍然成功.
pub fn quantify<D, I>(
    labels: ArrayView<'_, u32, D>,
    intensity: ArrayView<'_, f32, D>,
    forest: &StructureForest,
    selected: I,
) -> QuantifyResult<Quantification>
where
    D: Dimension,
    I: IntoIterator<Item = u32>,
{
    let hist = LabelHistogram::new(labels, intensity)?;
    Ok(Quantification::from_histogram(&hist, forest, selected))
}

/// 在重建体上统计, 只计入 `keep(provenance)` 成立的体素.
///
/// 例如 `|p| p.is_source()` 排除了插值得到的层. 是否排除由调用方决定.
pub fn quantify_volume<I, F>(
    volume: &ReconstructedVolume,
    labels: ArrayView3<'_, u32>,
    forest: &StructureForest,
    selected: I,
    keep: F,
) -> QuantifyResult<Quantification>
where
    I: IntoIterator<Item = u32>,
    F: Fn(Provenance) -> bool + Sync + Send,
{
    let hist = LabelHistogram::with_filter(labels, volume.intensity(), volume.provenance(), |p| {
        keep(*p)
    })?;
    log::debug!("Quantifying over {} structure ids", hist.len());
    Ok(Quantification::from_histogram(&hist, forest, selected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::Alignment;
    use crate::atlas::{AtlasFrame, Orientation, Resolution};
    use crate::ontology::small_forest;
    use crate::transform::{AffineTransform2D, PlanePose};
    use crate::volume::{build, AlignedSlice, VolumeBuildSpec};
    use ndarray::{arr2, Array2, Array3};

    #[test]
    fn test_mean_over_plane() {
        let f = small_forest();
        let labels = arr2(&[[7, 7, 0], [3, 0, 0]]);
        let intensity = arr2(&[[10.0_f32, 20.0, 99.0], [5.0, 99.0, 99.0]]);
        let q = quantify(labels.view(), intensity.view(), &f, [7]).unwrap();
        assert_eq!(q.mean(7), Ok(15.0));
        assert_eq!(q.get(7).unwrap().count, 2);
    }

    #[test]
    fn test_descendants_and_overlap() {
        let f = small_forest();
        let labels = arr2(&[[4, 5, 6], [1, 8, 0]]);
        let intensity = arr2(&[[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let q = quantify(labels.view(), intensity.view(), &f, [1, 2, 6, 5]).unwrap();
        // 1 覆盖 {1, 4, 5, 6}, 2 覆盖 {4, 5}; 重叠的像素各算一次.
        assert_eq!(q.get(1).unwrap().count, 4);
        assert_eq!(q.mean(1), Ok(2.5));
        assert_eq!(q.mean(2), Ok(1.5));
        assert_eq!(q.mean(6), Ok(3.0));
        assert_eq!(q.mean(5), Ok(2.0));
        assert_eq!(q.len(), 4);
        assert_eq!(q.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![1, 2, 5, 6]);
    }

    #[test]
    fn test_empty_selection() {
        let f = small_forest();
        let labels = arr2(&[[4, 4]]);
        let intensity = arr2(&[[1.0_f32, 1.0]]);
        let q = quantify(labels.view(), intensity.view(), &f, [3, 404]).unwrap();
        assert_eq!(q.mean(3), Err(QuantifyError::EmptyStructureSelection(3)));
        assert!(q.mean_or_nan(3).is_nan());
        assert_eq!(q.mean(404), Err(QuantifyError::EmptyStructureSelection(404)));
        assert_eq!(q.mean(1), Err(QuantifyError::NotSelected(1)));
        assert!(q.means()[&3].is_nan());
    }

    #[test]
    fn test_shape_mismatch() {
        let f = small_forest();
        let labels = Array2::<u32>::zeros((2, 2));
        let intensity = Array2::<f32>::zeros((2, 3));
        assert_eq!(
            quantify(labels.view(), intensity.view(), &f, [1]),
            Err(QuantifyError::ShapeMismatch {
                labels: vec![2, 2],
                intensity: vec![2, 3]
            })
        );
    }

    #[test]
    fn test_histogram_merge() {
        let a = LabelHistogram::new(arr2(&[[1, 2]]).view(), arr2(&[[1.0_f32, 2.0]]).view()).unwrap();
        let mut b =
            LabelHistogram::new(arr2(&[[1, 1]]).view(), arr2(&[[3.0_f32, 5.0]]).view()).unwrap();
        b.merge(&a);
        assert_eq!(b.get(1), StructureStat { sum: 9.0, count: 3 });
        assert_eq!(b.get(2).count, 1);
        assert_eq!(b.get(3), StructureStat::default());
    }

    #[test]
    fn test_provenance_filter() {
        // 深度 6 (中心 2), 只在深度 1 放一张切片, 其余层都是边界保持.
        let frame = AtlasFrame::fake(Resolution::Um100, (6, 2, 2));
        let pose = PlanePose::new(-100.0, 0.0, 0.0, &frame, Orientation::Coronal).unwrap();
        let s = AlignedSlice::new(
            "a",
            Alignment::new(pose, AffineTransform2D::identity()),
            Ok(Array2::from_elem((2, 2), 4.0)),
        );
        let (v, _) = build(&VolumeBuildSpec::new("/"), &frame, Orientation::Coronal, vec![s]);
        let labels = Array3::from_elem((6, 2, 2), 2_u32);

        let f = small_forest();
        let all = quantify_volume(&v, labels.view(), &f, [1], |_| true).unwrap();
        assert_eq!(all.get(1).unwrap().count, 24);
        let direct = quantify_volume(&v, labels.view(), &f, [1], |p| p.is_source()).unwrap();
        assert_eq!(direct.get(1).unwrap().count, 4);
        assert_eq!(direct.mean(1), Ok(4.0));
    }
}
