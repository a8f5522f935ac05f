//! 项目: 共享的只读图谱与结构层级, 每幅图像的对齐, 每个目录的重建体, 以及任务队列.

use crate::alignment::Alignment;
use crate::atlas::{AtlasGeometry, AtlasVolume, Orientation, Resolution};
use crate::config::ProjectConfig;
use crate::jobs::{
    JobId, JobQueue, ProvenanceFilter, QuantifyJob, QuantifySource, QueueError, SliceInput,
    VolumeJob,
};
use crate::landmark::{self, LandmarkResult, LandmarkSet, Preview};
use crate::ontology::StructureForest;
use crate::sampler::{sample_intensity, sample_labels, PlaneGrid};
use crate::transform::{AffineTransform2D, PlanePose, TransformError};
use crate::volume::{BuildResult, VolumeBuildSpec, VolumeStore};
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 项目操作错误.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectError {
    /// 图谱分辨率与项目配置不符.
    ResolutionMismatch {
        /// 项目配置的分辨率.
        config: Resolution,
        /// 图谱的分辨率.
        atlas: Resolution,
    },

    /// 对齐不合法.
    Transform(TransformError),

    /// 任务队列拒绝.
    Queue(QueueError),

    /// 读写对齐记录错误.
    Io(String),
}

impl fmt::Display for ProjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolutionMismatch { config, atlas } => {
                write!(f, "project is at {config} but atlas is at {atlas}")
            }
            Self::Transform(e) => write!(f, "invalid alignment: {e}"),
            Self::Queue(e) => write!(f, "job rejected: {e}"),
            Self::Io(e) => write!(f, "alignment I/O error: {e}"),
        }
    }
}

impl std::error::Error for ProjectError {}

impl From<TransformError> for ProjectError {
    fn from(e: TransformError) -> Self {
        Self::Transform(e)
    }
}

impl From<QueueError> for ProjectError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

/// 项目相关操作的结果.
pub type ProjectResult<T> = Result<T, ProjectError>;

/// 一个配准项目.
///
/// 图谱与结构层级在项目生命周期内只读, 以 `Arc` 共享给采样与后台任务.
pub struct Project {
    config: ProjectConfig,
    atlas: Arc<AtlasVolume>,
    forest: Arc<StructureForest>,
    alignments: BTreeMap<PathBuf, Alignment>,
    volumes: Arc<VolumeStore>,
    queue: JobQueue,
}

impl Project {
    /// 新建. 图谱分辨率必须与配置一致.
    pub fn new(
        config: ProjectConfig,
        atlas: Arc<AtlasVolume>,
        forest: Arc<StructureForest>,
    ) -> ProjectResult<Self> {
        if atlas.resolution() != config.resolution {
            return Err(ProjectError::ResolutionMismatch {
                config: config.resolution,
                atlas: atlas.resolution(),
            });
        }
        log::info!(
            "Opened project at `{}` ({}, {})",
            config.project_dir.display(),
            config.orientation,
            config.resolution
        );
        Ok(Self {
            config,
            atlas,
            forest,
            alignments: BTreeMap::new(),
            volumes: Arc::new(VolumeStore::new()),
            queue: JobQueue::new(),
        })
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// 切片方向.
    #[inline]
    pub fn orientation(&self) -> Orientation {
        self.config.orientation
    }

    /// 图谱.
    #[inline]
    pub fn atlas(&self) -> &Arc<AtlasVolume> {
        &self.atlas
    }

    /// 结构层级.
    #[inline]
    pub fn forest(&self) -> &Arc<StructureForest> {
        &self.forest
    }

    /// 重建体仓库.
    #[inline]
    pub fn volumes(&self) -> &Arc<VolumeStore> {
        &self.volumes
    }

    /// 任务队列.
    #[inline]
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// 在给定位姿下渲染图谱强度平面.
    #[inline]
    pub fn render_atlas(&self, pose: &PlanePose, grid: PlaneGrid) -> Array2<f32> {
        sample_intensity(&self.atlas, self.orientation(), pose, grid)
    }

    /// 在给定位姿下渲染结构 id 平面.
    #[inline]
    pub fn render_labels(&self, pose: &PlanePose, grid: PlaneGrid) -> Array2<u32> {
        sample_labels(&self.atlas, self.orientation(), pose, grid)
    }

    /// 求解地标. 结果不会自动提交.
    #[inline]
    pub fn solve_landmarks(&self, landmarks: &LandmarkSet) -> LandmarkResult<AffineTransform2D> {
        landmarks.solve()
    }

    /// 用候选变换预览, 不修改已提交的对齐.
    pub fn preview(
        &self,
        pose: &PlanePose,
        candidate: &AffineTransform2D,
        histology: ArrayView2<'_, f32>,
        grid: PlaneGrid,
    ) -> Preview {
        landmark::preview(&self.atlas, self.orientation(), pose, candidate, histology, grid)
    }

    /// 提交一幅图像的对齐, 替换旧的对齐 (若有) 并返回它.
    pub fn commit<P: Into<PathBuf>>(
        &mut self,
        image: P,
        alignment: Alignment,
    ) -> ProjectResult<Option<Alignment>> {
        alignment.check(self.atlas.as_ref(), self.orientation())?;
        let image = image.into();
        log::debug!("Committed alignment of `{}`", image.display());
        Ok(self.alignments.insert(image, alignment))
    }

    /// 一幅图像的对齐.
    #[inline]
    pub fn alignment<P: AsRef<Path>>(&self, image: P) -> Option<&Alignment> {
        self.alignments.get(image.as_ref())
    }

    /// 目录 `dir` 下 (不含子目录) 所有已对齐的图像, 按路径排序.
    pub fn alignments_in<'a>(
        &'a self,
        dir: &'a Path,
    ) -> impl Iterator<Item = (&'a Path, &'a Alignment)> + 'a {
        self.alignments
            .iter()
            .filter(move |(p, _)| p.parent() == Some(dir))
            .map(|(p, a)| (p.as_path(), a))
    }

    /// 为 `spec.directory` 排入一个重建任务.
    ///
    /// 图像由 `load` 在 worker 线程上逐幅读取; 启用通道替换或 z-stack 时先解析伴随文件,
    /// 解析或读取失败的图像在重建时被跳过. 队列运行期间直接返回
    /// `ProjectError::Queue(QueueError::Busy)`, 不读取任何图像.
    pub fn queue_volume<F>(&self, spec: VolumeBuildSpec, load: F) -> ProjectResult<JobId>
    where
        F: Fn(&Path) -> BuildResult<Array2<f32>> + Send + Sync + 'static,
    {
        let images = self
            .alignments_in(&spec.directory)
            .map(|(path, alignment)| (path.to_path_buf(), alignment.clone()))
            .collect();
        let id = self.queue.enqueue(VolumeJob {
            spec,
            frame: self.atlas.frame(),
            orientation: self.orientation(),
            slices: SliceInput::Deferred {
                images,
                load: Box::new(load),
            },
            store: Arc::clone(&self.volumes),
        })?;
        Ok(id)
    }

    /// 为 `directory` 的重建体排入一个统计任务.
    pub fn queue_quantification<P: Into<PathBuf>>(
        &self,
        directory: P,
        selected: Vec<u32>,
        filter: ProvenanceFilter,
    ) -> ProjectResult<JobId> {
        let id = self.queue.enqueue(QuantifyJob {
            atlas: Arc::clone(&self.atlas),
            forest: Arc::clone(&self.forest),
            selected,
            source: QuantifySource::Volume {
                directory: directory.into(),
                store: Arc::clone(&self.volumes),
                filter,
            },
        })?;
        Ok(id)
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        /// 对齐记录的持久化.
        impl Project {
            fn record_path(&self, image: &Path) -> PathBuf {
                let dir = image.parent().unwrap_or_else(|| Path::new(""));
                let name = image
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.config.alignment_dir(dir).join(format!("{name}.json"))
            }

            /// 把一幅图像的对齐写入项目目录. 没有对齐时不做任何事.
            pub fn save_alignment<P: AsRef<Path>>(&self, image: P) -> ProjectResult<()> {
                let Some(a) = self.alignment(image.as_ref()) else {
                    return Ok(());
                };
                let path = self.record_path(image.as_ref());
                let io = |e: std::io::Error| ProjectError::Io(e.to_string());
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(io)?;
                }
                a.save(&path).map_err(io)
            }

            /// 从项目目录读取一幅图像的对齐并提交.
            pub fn load_alignment<P: Into<PathBuf>>(&mut self, image: P) -> ProjectResult<()> {
                let image = image.into();
                let a = Alignment::load(self.record_path(&image))
                    .map_err(|e| ProjectError::Io(e.to_string()))?;
                self.commit(image, a)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::{ramp_atlas, AtlasFrame};
    use crate::jobs::{Job, JobOutput, JobStatus, Progress};
    use crate::ontology::{StructureNode, StructureForest};
    use crate::volume::BuildError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver};
    use std::thread;

    /// 收到信号前一直占用 worker.
    struct Gate(Receiver<()>);

    impl Job for Gate {
        fn name(&self) -> String {
            "gate".to_owned()
        }

        fn run(self: Box<Self>, _: &Progress) -> Result<JobOutput, String> {
            self.0.recv().map_err(|e| e.to_string())?;
            Ok(JobOutput::Message("opened".to_owned()))
        }
    }

    fn counting_loader(
        calls: &Arc<AtomicUsize>,
        (w, h): (usize, usize),
    ) -> impl Fn(&Path) -> BuildResult<Array2<f32>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move |_: &Path| {
            assert_eq!(thread::current().name(), Some("ccf-berry-jobs"));
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Array2::from_elem((h, w), 1.0))
        }
    }

    fn project(dir: &Path) -> Project {
        let atlas = Arc::new(ramp_atlas((6, 3, 4)));
        let forest = Arc::new(
            StructureForest::new([
                StructureNode::new(1, "front", "F", None),
                StructureNode::new(2, "back", "B", None),
            ])
            .unwrap(),
        );
        let config = ProjectConfig::new(Orientation::Coronal, Resolution::Um100, dir);
        Project::new(config, atlas, forest).unwrap()
    }

    fn at_depth(p: &Project, depth: usize) -> Alignment {
        let atlas = p.atlas().as_ref();
        let o = p.orientation();
        let off = (depth as f64 - atlas.centre_depth(o) as f64) * atlas.voxel_um();
        Alignment::new(
            PlanePose::new(off, 0.0, 0.0, atlas, o).unwrap(),
            AffineTransform2D::identity(),
        )
    }

    #[test]
    fn test_resolution_mismatch() {
        let atlas = Arc::new(ramp_atlas((2, 2, 2)));
        let forest = Arc::new(StructureForest::new([]).unwrap());
        let config = ProjectConfig::new(Orientation::Coronal, Resolution::Um25, "/p");
        assert!(matches!(
            Project::new(config, atlas, forest),
            Err(ProjectError::ResolutionMismatch { .. })
        ));
    }

    #[test]
    fn test_commit_replaces() {
        let mut p = project(Path::new("/p"));
        assert_eq!(p.commit("/d/a.tif", at_depth(&p, 1)).unwrap(), None);
        let old = p.commit("/d/a.tif", at_depth(&p, 2)).unwrap();
        assert_eq!(old, Some(at_depth(&p, 1)));
        assert_eq!(p.alignment("/d/a.tif"), Some(&at_depth(&p, 2)));

        // 在完整尺寸的图谱上合法, 在 6 层的小图谱上越界.
        let full = AtlasFrame::new(Resolution::Um100);
        let mut bad = at_depth(&p, 0);
        bad.pose = PlanePose::new(-1000.0, 0.0, 0.0, &full, Orientation::Coronal).unwrap();
        assert!(matches!(
            p.commit("/d/b.tif", bad),
            Err(ProjectError::Transform(TransformError::OffsetOutOfBounds(..)))
        ));
    }

    #[test]
    fn test_queue_volume_and_quantification() {
        let mut p = project(Path::new("/p"));
        p.commit("/d/s1.tif", at_depth(&p, 1)).unwrap();
        p.commit("/d/s4.tif", at_depth(&p, 4)).unwrap();
        p.commit("/d/missing.tif", at_depth(&p, 3)).unwrap();
        p.commit("/other/s2.tif", at_depth(&p, 2)).unwrap();

        let (w, h) = p.atlas().plane_size(Orientation::Coronal);
        let load = move |path: &Path| -> BuildResult<Array2<f32>> {
            match path.to_str() {
                Some("/d/s1.tif") => Ok(Array2::from_elem((h, w), 2.0)),
                Some("/d/s4.tif") => Ok(Array2::from_elem((h, w), 8.0)),
                _ => Err(BuildError::UnresolvedCompanionFile(path.to_path_buf())),
            }
        };
        let build_id = p.queue_volume(VolumeBuildSpec::new("/d"), load).unwrap();
        let quant_id = p
            .queue_quantification("/d", vec![1, 2], ProvenanceFilter::DirectOnly)
            .unwrap();
        p.queue().start().unwrap();
        p.queue().wait();

        match p.queue().status(build_id) {
            Some(JobStatus::Finished(JobOutput::Volume { report, .. })) => {
                assert_eq!(report.placed.len(), 2);
                assert_eq!(report.skipped.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        match p.queue().status(quant_id) {
            Some(JobStatus::Finished(JobOutput::Quantification(q))) => {
                assert_eq!(q.mean(1), Ok(2.0));
                assert_eq!(q.mean(2), Ok(8.0));
            }
            other => panic!("unexpected {other:?}"),
        }
        let v = p.volumes().get("/d").unwrap();
        assert_eq!(v.layer_provenance(3), crate::volume::Provenance::Interpolated);
    }

    #[test]
    fn test_queue_volume_loads_on_worker() {
        let mut p = project(Path::new("/p"));
        p.commit("/d/s1.tif", at_depth(&p, 1)).unwrap();
        p.commit("/d/s4.tif", at_depth(&p, 4)).unwrap();
        let size = p.atlas().plane_size(Orientation::Coronal);
        let calls = Arc::new(AtomicUsize::new(0));

        // 队列运行期间被拒绝, 且没有读取任何图像.
        let (tx, rx) = mpsc::channel();
        p.queue().enqueue(Gate(rx)).unwrap();
        p.queue().start().unwrap();
        assert_eq!(
            p.queue_volume(VolumeBuildSpec::new("/d"), counting_loader(&calls, size)),
            Err(ProjectError::Queue(QueueError::Busy))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tx.send(()).unwrap();
        p.queue().wait();

        // 入队时不读取, 运行时在 worker 线程上逐幅读取.
        let id = p
            .queue_volume(VolumeBuildSpec::new("/d"), counting_loader(&calls, size))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        p.queue().start().unwrap();
        p.queue().wait();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match p.queue().status(id) {
            Some(JobStatus::Finished(JobOutput::Volume { report, .. })) => {
                assert_eq!(report.placed.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_render_and_preview() {
        let p = project(Path::new("/p"));
        let grid = PlaneGrid::native(p.atlas().as_ref(), p.orientation());
        let pose = PlanePose::default();
        assert_eq!(p.render_atlas(&pose, grid).dim(), (3, 4));
        assert_eq!(p.render_labels(&pose, grid).dim(), (3, 4));
        let img = Array2::from_elem((3, 4), 1.0_f32);
        let pv = p.preview(&pose, &AffineTransform2D::identity(), img.view(), grid);
        assert_eq!(pv.histology, img);
        assert!(p.alignment("/any").is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_save_and_load_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = project(dir.path());
        let a = at_depth(&p, 4);
        p.commit("/d/s.tif", a.clone()).unwrap();
        p.save_alignment("/d/s.tif").unwrap();

        let mut q = project(dir.path());
        q.load_alignment("/d/s.tif").unwrap();
        assert_eq!(q.alignment("/d/s.tif"), Some(&a));
        assert!(q.load_alignment("/d/none.tif").is_err());
    }
}
