//! 单幅组织切片的对齐记录.

use crate::atlas::{AtlasGeometry, Orientation};
use crate::landmark::LandmarkSet;
use crate::transform::{AffineTransform2D, PlanePose, TransformResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一幅图像的对齐: 平面位姿, 二维仿射变换, 以及 (可选的) 求解所用的地标.
///
/// 每个 (项目, 图像) 任何时刻只有一份对齐; 新的对齐直接替换旧的, 不保留版本.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Alignment {
    /// 图谱平面位姿.
    pub pose: PlanePose,

    /// 组织切片到图谱平面的仿射变换.
    pub transform: AffineTransform2D,

    /// 求解 `transform` 时使用的地标.
    #[cfg_attr(feature = "serde", serde(default))]
    pub landmarks: Option<LandmarkSet>,
}

impl Alignment {
    /// 新建.
    #[inline]
    pub fn new(pose: PlanePose, transform: AffineTransform2D) -> Self {
        Self {
            pose,
            transform,
            landmarks: None,
        }
    }

    /// 附带地标.
    #[inline]
    pub fn with_landmarks(mut self, landmarks: LandmarkSet) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    /// 检查位姿是否落在图谱范围内. 仿射变换的可逆性由其构造保证.
    #[inline]
    pub fn check<G: AtlasGeometry>(&self, geometry: &G, orientation: Orientation) -> TransformResult<()> {
        self.pose.check(geometry, orientation)
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        use std::fs::File;
        use std::io::{self, BufReader, BufWriter};
        use std::path::Path;

        /// JSON 持久化.
        impl Alignment {
            /// 序列化为 JSON 字符串.
            pub fn to_json(&self) -> serde_json::Result<String> {
                serde_json::to_string_pretty(self)
            }

            /// 从 JSON 字符串反序列化. 不可逆的仿射参数会被拒绝.
            pub fn from_json(s: &str) -> serde_json::Result<Self> {
                serde_json::from_str(s)
            }

            /// 保存到 `path`.
            pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
                let w = BufWriter::new(File::create(path)?);
                serde_json::to_writer_pretty(w, self)?;
                Ok(())
            }

            /// 从 `path` 加载.
            pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
                let r = BufReader::new(File::open(path)?);
                Ok(serde_json::from_reader(r)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::{AtlasFrame, Resolution};
    use crate::landmark::{LandmarkPair, LandmarkSet};
    use crate::transform::{Axis2d, TransformEdit};

    fn sample() -> Alignment {
        let frame = AtlasFrame::new(Resolution::Um50);
        let pose = PlanePose::new(-1200.0, 3.0, -4.5, &frame, Orientation::Coronal).unwrap();
        let t = AffineTransform2D::identity()
            .edit(TransformEdit::Rotate(12.0))
            .unwrap()
            .edit(TransformEdit::SetScale(Axis2d::Y, 0.75))
            .unwrap();
        let lm: LandmarkSet = [LandmarkPair::new((1.0, 2.0), (3.0, 4.0))]
            .into_iter()
            .collect();
        Alignment::new(pose, t).with_landmarks(lm)
    }

    #[test]
    fn test_check() {
        let a = sample();
        assert!(a.check(&AtlasFrame::new(Resolution::Um50), Orientation::Coronal).is_ok());
        // 同样的偏移在小图谱上越界.
        let small = AtlasFrame::fake(Resolution::Um50, (10, 10, 10));
        assert!(a.check(&small, Orientation::Coronal).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_round_trip() {
        let a = sample();
        let s = a.to_json().unwrap();
        assert_eq!(Alignment::from_json(&s).unwrap(), a);

        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("alignment.json");
        a.save(&p).unwrap();
        assert_eq!(Alignment::load(&p).unwrap(), a);

        let legacy = s.replace("\"landmarks\"", "\"unused\"");
        assert_eq!(Alignment::from_json(&legacy).unwrap().landmarks, None);
    }
}
