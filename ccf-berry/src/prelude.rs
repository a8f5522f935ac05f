//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx2dF, Idx3d, Idx3dF};

pub use crate::atlas::{
    AtlasFrame, AtlasGeometry, AtlasVolume, DisplayWindow, ImgWriteVis, Orientation, Resolution,
};
pub use crate::transform::{
    AffineParams, AffineTransform2D, Axis2d, PlanePose, PoseEdit, TransformEdit,
};

pub use crate::sampler::{sample_intensity, sample_labels, warp_histology, PlaneGrid};

pub use crate::landmark::{LandmarkEdit, LandmarkPair, LandmarkSet};

pub use crate::alignment::Alignment;

pub use crate::volume::{
    build, AlignedSlice, ExportKind, Provenance, ReconstructedVolume, VolumeBuildSpec, VolumeStore,
};

pub use crate::ontology::{quantify, Quantification, StructureForest, StructureNode};

pub use crate::jobs::{Job, JobQueue, JobStatus, ProvenanceFilter};

pub use crate::config::ProjectConfig;
pub use crate::project::Project;
