//! 基于地标对应点的仿射变换求解.
//!
//! 地标坐标均以各自图像中心为原点 (见 [`crate::sampler::centred`]).
//! 求解得到的变换只是候选, 在显式提交前不会写入任何 [`crate::Alignment`].

mod decompose;
mod solver;

pub use decompose::decompose;
pub use solver::{fit, preview, solve, AffineFit, Preview};

use crate::sampler::centred;
use crate::transform::TransformError;
use crate::Idx2dF;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 一对对应点.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LandmarkPair {
    /// 组织切片上的点.
    pub histology: Idx2dF,

    /// 图谱平面上的点.
    pub atlas: Idx2dF,
}

impl LandmarkPair {
    /// 直接由中心坐标构造.
    #[inline]
    pub fn new(histology: Idx2dF, atlas: Idx2dF) -> Self {
        Self { histology, atlas }
    }

    /// 由像素坐标构造. `*_size` 为对应图像的 `(宽, 高)`.
    pub fn from_pixels(
        histology: Idx2dF,
        histology_size: (usize, usize),
        atlas: Idx2dF,
        atlas_size: (usize, usize),
    ) -> Self {
        Self {
            histology: centred(histology, histology_size.0, histology_size.1),
            atlas: centred(atlas, atlas_size.0, atlas_size.1),
        }
    }
}

/// 对地标集合的一次编辑.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LandmarkEdit {
    /// 追加一对点.
    Add(LandmarkPair),

    /// 移动第 `index` 对中组织切片上的点.
    MoveHistology(usize, Idx2dF),

    /// 移动第 `index` 对中图谱平面上的点.
    MoveAtlas(usize, Idx2dF),

    /// 删除第 `index` 对.
    Remove(usize),

    /// 清空.
    Clear,
}

/// 一次地标会话中的点对集合.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LandmarkSet {
    pairs: Vec<LandmarkPair>,
}

impl FromIterator<LandmarkPair> for LandmarkSet {
    fn from_iter<I: IntoIterator<Item = LandmarkPair>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl LandmarkSet {
    /// 空集合.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部点对.
    #[inline]
    pub fn pairs(&self) -> &[LandmarkPair] {
        &self.pairs
    }

    /// 点对个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// 执行一次编辑, 返回新的集合.
    pub fn edit(&self, edit: LandmarkEdit) -> LandmarkResult<Self> {
        let mut next = self.clone();
        let len = next.pairs.len();
        let check = |index: usize| {
            if index < len {
                Ok(index)
            } else {
                Err(LandmarkError::IndexOutOfRange(index, len))
            }
        };
        match edit {
            LandmarkEdit::Add(pair) => next.pairs.push(pair),
            LandmarkEdit::MoveHistology(i, p) => next.pairs[check(i)?].histology = p,
            LandmarkEdit::MoveAtlas(i, p) => next.pairs[check(i)?].atlas = p,
            LandmarkEdit::Remove(i) => {
                next.pairs.remove(check(i)?);
            }
            LandmarkEdit::Clear => next.pairs.clear(),
        }
        Ok(next)
    }

    /// 用当前点对求解候选变换.
    #[inline]
    pub fn solve(&self) -> LandmarkResult<crate::AffineTransform2D> {
        solve(&self.pairs)
    }
}

/// 地标求解错误.
#[derive(Debug, Clone, PartialEq)]
pub enum LandmarkError {
    /// 点对不足. 参数依次为已有点对数与最少点对数.
    InsufficientLandmarks(usize, usize),

    /// 点对共线、重复, 或者病态. 参数为归一化正规矩阵的条件数.
    DegenerateLandmarkSet(f64),

    /// 编辑的点对索引越界. 参数依次为索引与集合大小.
    IndexOutOfRange(usize, usize),

    /// 拟合矩阵无法分解为合法的仿射参数.
    Transform(TransformError),
}

impl fmt::Display for LandmarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientLandmarks(got, needed) => {
                write!(f, "insufficient landmarks: need {needed}, got {got}")
            }
            Self::DegenerateLandmarkSet(cond) => {
                write!(f, "degenerate landmark set (condition number {cond:.3e})")
            }
            Self::IndexOutOfRange(i, len) => {
                write!(f, "landmark index {i} out of range for {len} pairs")
            }
            Self::Transform(e) => write!(f, "fitted matrix is not a valid transform: {e}"),
        }
    }
}

impl std::error::Error for LandmarkError {}

impl From<TransformError> for LandmarkError {
    fn from(e: TransformError) -> Self {
        Self::Transform(e)
    }
}

/// 地标相关操作的结果.
pub type LandmarkResult<T> = Result<T, LandmarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(h: Idx2dF, a: Idx2dF) -> LandmarkPair {
        LandmarkPair::new(h, a)
    }

    #[test]
    fn test_session_edits() {
        let s = LandmarkSet::new()
            .edit(LandmarkEdit::Add(pair((0.0, 0.0), (1.0, 1.0))))
            .unwrap()
            .edit(LandmarkEdit::Add(pair((5.0, 0.0), (6.0, 1.0))))
            .unwrap();
        assert_eq!(s.len(), 2);

        let moved = s.edit(LandmarkEdit::MoveAtlas(1, (7.0, 2.0))).unwrap();
        assert_eq!(moved.pairs()[1].atlas, (7.0, 2.0));
        assert_eq!(s.pairs()[1].atlas, (6.0, 1.0));

        assert_eq!(
            s.edit(LandmarkEdit::Remove(2)),
            Err(LandmarkError::IndexOutOfRange(2, 2))
        );
        let removed = s.edit(LandmarkEdit::Remove(0)).unwrap();
        assert_eq!(removed.pairs(), &[pair((5.0, 0.0), (6.0, 1.0))]);
        assert!(s.edit(LandmarkEdit::Clear).unwrap().is_empty());
    }

    #[test]
    fn test_from_pixels_is_centred() {
        let p = LandmarkPair::from_pixels((10.0, 20.0), (100, 40), (0.0, 0.0), (8, 6));
        assert_eq!(p.histology, (-40.0, 0.0));
        assert_eq!(p.atlas, (-4.0, -3.0));
    }

    #[test]
    fn test_too_few_pairs() {
        let s: LandmarkSet = [pair((0.0, 0.0), (0.0, 0.0)), pair((1.0, 0.0), (1.0, 0.0))]
            .into_iter()
            .collect();
        assert_eq!(s.solve(), Err(LandmarkError::InsufficientLandmarks(2, 3)));
    }
}
