use super::{Job, JobOutput, Progress};
use crate::alignment::Alignment;
use crate::atlas::{AtlasFrame, AtlasVolume, Orientation};
use crate::ontology::{quantify_volume, LabelHistogram, Quantification, StructureForest};
use crate::sampler::{sample_labels, warp_histology, PlaneGrid};
use crate::volume::{build, AlignedSlice, BuildResult, Provenance, VolumeBuildSpec, VolumeStore};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 在 worker 线程上读取一幅图像.
pub type ImageLoader = Box<dyn Fn(&Path) -> BuildResult<Array2<f32>> + Send + Sync>;

/// 重建任务的切片来源.
pub enum SliceInput {
    /// 已读取的切片, 按处理顺序.
    Loaded(Vec<AlignedSlice>),

    /// 尚未读取的图像及其对齐, 按处理顺序.
    ///
    /// 伴随文件的解析与图像读取都在 worker 线程上进行, 同一时刻只持有一幅图像.
    Deferred {
        /// 图像路径与对齐.
        images: Vec<(PathBuf, Alignment)>,
        /// 读取函数.
        load: ImageLoader,
    },
}

impl SliceInput {
    /// 切片数.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Loaded(slices) => slices.len(),
            Self::Deferred { images, .. } => images.len(),
        }
    }

    /// 是否没有切片.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<AlignedSlice>> for SliceInput {
    fn from(slices: Vec<AlignedSlice>) -> Self {
        Self::Loaded(slices)
    }
}

/// 重建一个目录, 结果写入体仓库.
pub struct VolumeJob {
    /// 重建参数.
    pub spec: VolumeBuildSpec,

    /// 图谱几何.
    pub frame: AtlasFrame,

    /// 切片方向.
    pub orientation: Orientation,

    /// 该目录下已对齐的切片.
    pub slices: SliceInput,

    /// 结果仓库.
    pub store: Arc<VolumeStore>,
}

impl Job for VolumeJob {
    fn name(&self) -> String {
        format!(
            "volume of `{}` ({} images)",
            self.spec.directory.display(),
            self.slices.len()
        )
    }

    fn run(self: Box<Self>, progress: &Progress) -> Result<JobOutput, String> {
        let Self {
            spec,
            frame,
            orientation,
            slices,
            store,
        } = *self;
        let total = slices.len().max(1) as f32;
        let (volume, report) = match slices {
            SliceInput::Loaded(slices) => build(&spec, &frame, orientation, slices),
            SliceInput::Deferred { images, load } => {
                let needs_companion = spec.use_channel_substitution || spec.use_z_stack;
                let spec_ref = &spec;
                let slices = images
                    .into_iter()
                    .enumerate()
                    .map(|(i, (path, alignment))| {
                        let image = if needs_companion {
                            spec_ref.resolve_companion(&path).and_then(|p| load(&p))
                        } else {
                            load(&path)
                        };
                        progress.set(0.9 * (i + 1) as f32 / total);
                        AlignedSlice::new(path.display().to_string(), alignment, image)
                    });
                build(&spec, &frame, orientation, slices)
            }
        };
        progress.set(0.95);
        store.insert(spec.directory.clone(), volume);
        progress.set(1.0);
        Ok(JobOutput::Volume {
            directory: spec.directory,
            report,
        })
    }
}

/// 统计重建体时保留哪些体素.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ProvenanceFilter {
    /// 所有非空体素.
    #[default]
    NonEmpty,

    /// 只保留直接插入或 z-stack 复制的体素.
    SourceOnly,

    /// 只保留直接插入的体素.
    DirectOnly,
}

impl ProvenanceFilter {
    /// 是否保留.
    #[inline]
    pub fn keep(&self, p: Provenance) -> bool {
        match self {
            Self::NonEmpty => p != Provenance::Empty,
            Self::SourceOnly => p.is_source(),
            Self::DirectOnly => p == Provenance::Direct,
        }
    }
}

/// 统计的数据来源.
pub enum QuantifySource {
    /// 体仓库中某目录的重建体, 与图谱结构 id 网格逐体素对应.
    Volume {
        /// 目录.
        directory: PathBuf,
        /// 体仓库.
        store: Arc<VolumeStore>,
        /// 体素来源过滤.
        filter: ProvenanceFilter,
    },

    /// 逐张切片: 每张切片重采样到图谱平面后, 与沿同一位姿采样的结构 id 平面对应.
    Slices {
        /// 切片方向.
        orientation: Orientation,
        /// 已对齐的切片.
        slices: Vec<AlignedSlice>,
    },
}

/// 脑区统计任务.
pub struct QuantifyJob {
    /// 图谱.
    pub atlas: Arc<AtlasVolume>,

    /// 结构层级.
    pub forest: Arc<StructureForest>,

    /// 选中的结构.
    pub selected: Vec<u32>,

    /// 数据来源.
    pub source: QuantifySource,
}

impl Job for QuantifyJob {
    fn name(&self) -> String {
        match &self.source {
            QuantifySource::Volume { directory, .. } => {
                format!("quantification of `{}`", directory.display())
            }
            QuantifySource::Slices { slices, .. } => {
                format!("quantification of {} slices", slices.len())
            }
        }
    }

    fn run(self: Box<Self>, progress: &Progress) -> Result<JobOutput, String> {
        let Self {
            atlas,
            forest,
            selected,
            source,
        } = *self;
        let q = match source {
            QuantifySource::Volume {
                directory,
                store,
                filter,
            } => {
                let volume = store
                    .get(&directory)
                    .ok_or_else(|| format!("no volume built for `{}`", directory.display()))?;
                quantify_volume(&volume, atlas.labels(), &forest, selected, |p| filter.keep(p))
                    .map_err(|e| e.to_string())?
            }
            QuantifySource::Slices {
                orientation,
                slices,
            } => {
                let grid = PlaneGrid::native(atlas.as_ref(), orientation);
                let total = slices.len().max(1) as f32;
                let mut hist = LabelHistogram::default();
                for (i, slice) in slices.into_iter().enumerate() {
                    match &slice.image {
                        Ok(image) => {
                            let labels =
                                sample_labels(&atlas, orientation, &slice.alignment.pose, grid);
                            let values = warp_histology(
                                image.view(),
                                &slice.alignment.transform,
                                grid.width,
                                grid.height,
                            );
                            let h = LabelHistogram::new(labels.view(), values.view())
                                .map_err(|e| e.to_string())?;
                            hist.merge(&h);
                        }
                        Err(e) => log::warn!("Skipping `{}`: {e}", slice.name),
                    }
                    progress.set((i + 1) as f32 / total);
                }
                Quantification::from_histogram(&hist, &forest, selected)
            }
        };
        Ok(JobOutput::Quantification(q))
    }
}
