use num::ToPrimitive;

/// 显示窗口, 包含窗位 (level) 和窗宽 (width). 用于将强度值映射为 8-bit 灰度值.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DisplayWindow {
    level: f32,
    width: f32,
}

impl DisplayWindow {
    /// 构建显示窗口.
    ///
    /// `level` 和 `width` 必须有限, 且 `width > 0`, 否则返回 `None`.
    pub fn new(level: f32, width: f32) -> Option<DisplayWindow> {
        if level.is_finite() && width.is_finite() && width > 0.0 {
            Some(Self { level, width })
        } else {
            None
        }
    }

    /// 由强度下限和上限构建窗口. 要求 `lower < upper`.
    #[inline]
    pub fn from_range(lower: f32, upper: f32) -> Option<DisplayWindow> {
        Self::new((lower + upper) / 2.0, upper - lower)
    }

    /// 覆盖 `data` 中全部有限值的窗口.
    ///
    /// 若 `data` 中没有有限值, 或者所有有限值相同, 返回 `None`.
    pub fn fit<'a, T, I>(data: I) -> Option<DisplayWindow>
    where
        T: ToPrimitive + Copy + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let (lo, hi) = data
            .into_iter()
            .filter_map(|v| v.to_f32())
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        Self::from_range(lo, hi)
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.level - self.width / 2.0
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.level + self.width / 2.0
    }

    /// 窗位.
    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    /// 求在当前窗口设置下, 强度 `v` 对应的灰度图像素整数值 (0 <= value <= 255)
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, v: f32) -> Option<u8> {
        self.eval_f32(v).map(|g| g as u8)
    }

    /// 求在当前窗口设置下, 强度 `v` 对应的灰度分布点 (0.0 <= value <= 255.0).
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval_f32(&self, v: f32) -> Option<f32> {
        if !v.is_finite() {
            return None;
        }
        let lb = self.lower_bound();
        if v <= lb {
            Some(0.0)
        } else if v >= self.upper_bound() {
            Some(255.0)
        } else {
            // 255, not 256.
            Some((v - lb) / self.width() * 255.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DisplayWindow;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_window_invalid_input() {
        assert!(DisplayWindow::new(0.0, -1.0).is_none());
        assert!(DisplayWindow::new(0.0, 0.0).is_none());
        assert!(DisplayWindow::new(f32::NAN, 1.0).is_none());
        assert!(DisplayWindow::from_range(5.0, 5.0).is_none());
    }

    #[test]
    fn test_window_generic() {
        // [60, 100]
        let w = DisplayWindow::from_range(60.0, 100.0).unwrap();
        assert!(float_eq(w.level(), 80.0));
        assert_eq!(w.eval(f32::NAN), None);
        assert_eq!(w.eval(f32::MIN), Some(0));
        assert_eq!(w.eval(f32::MAX), Some(255));
        assert_eq!(w.eval(60.0), Some(0));
        assert_eq!(w.eval(70.0).unwrap(), (255.0 * 0.25) as u8);
        assert!(float_eq(w.eval_f32(80.0).unwrap(), 255.0 * 0.5));
        assert_eq!(w.eval(99.999), Some(254));
        assert_eq!(w.eval(100.0), Some(u8::MAX));
    }

    #[test]
    fn test_window_fit() {
        let data = [3.0_f32, f32::NAN, -1.0, 7.0];
        let w = DisplayWindow::fit(data.iter()).unwrap();
        assert!(float_eq(w.lower_bound(), -1.0));
        assert!(float_eq(w.upper_bound(), 7.0));

        let flat = [2_u32, 2, 2];
        assert!(DisplayWindow::fit(flat.iter()).is_none());
        assert!(DisplayWindow::fit(std::iter::empty::<&f32>()).is_none());
    }
}
