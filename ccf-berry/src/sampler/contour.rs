//! 选中结构在结构 id 平面上的轮廓.

use ndarray::{Array2, ArrayView2};
use std::collections::HashSet;

/// 求 `members` (通常是某结构的全部后代) 在 `labels` 平面上的轮廓.
///
/// 轮廓像素属于 `members`, 且至少有一个 4-邻居不属于 `members` 或位于平面以外.
pub fn structure_contour(labels: ArrayView2<'_, u32>, members: &HashSet<u32>) -> Array2<bool> {
    let (h, w) = labels.dim();
    let inside = |y: usize, x: usize| members.contains(&labels[(y, x)]);
    Array2::from_shape_fn((h, w), |(y, x)| {
        inside(y, x)
            && (y == 0
                || x == 0
                || y + 1 == h
                || x + 1 == w
                || !inside(y - 1, x)
                || !inside(y + 1, x)
                || !inside(y, x - 1)
                || !inside(y, x + 1))
    })
}
