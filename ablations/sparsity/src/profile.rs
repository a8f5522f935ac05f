//! 重建误差统计.

use ccf_berry::Provenance;
use std::time::{Duration, Instant};

/// ablation/benchmark 计时器.
///
/// 该计时器支持 "中途中断" 与 "结束中断, 继续开始计时".
#[derive(Clone, Debug)]
struct AccTimer {
    consumed: Duration,
    since: Instant,
}

impl AccTimer {
    /// 初始化计时器. 初始化时会视为已经开始计时.
    #[inline]
    fn new() -> Self {
        Self {
            consumed: Duration::ZERO,
            since: Instant::now(),
        }
    }

    /// 开始计时.
    #[inline]
    fn start(&mut self) {
        self.since = Instant::now();
    }

    /// 结束计时, 并将这一区间的时间累加.
    #[inline]
    fn elapsed(&mut self) {
        self.consumed += self.since.elapsed();
    }

    /// 累计时间 (微秒).
    #[inline]
    fn total_us(&self) -> u64 {
        self.consumed.as_micros() as u64
    }
}

/// 单类体素的绝对误差统计.
#[derive(Clone, Debug, Default)]
pub struct ErrorStat {
    count: u64,
    sum: f64,
    max: f64,
}

impl ErrorStat {
    #[inline]
    fn add(&mut self, err: f64) {
        self.count += 1;
        self.sum += err;
        self.max = self.max.max(err);
    }

    /// 体素个数.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 平均绝对误差, 没有体素时为 `None`.
    #[inline]
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// 最大绝对误差.
    #[inline]
    pub fn max(&self) -> f64 {
        self.max
    }
}

/// ablation 数据统计.
#[derive(Clone, Debug)]
pub struct Profile {
    /// 参与重建的切片数.
    slices: u64,

    /// 按来源 `[Empty, Direct, StackFilled, Interpolated]` 分类的误差.
    errors: [ErrorStat; 4],

    /// 重建耗时.
    build_time: AccTimer,
}

impl Profile {
    /// 初始化.
    #[inline]
    pub fn new() -> Self {
        Self {
            slices: 0,
            errors: Default::default(),
            build_time: AccTimer::new(),
        }
    }

    /// 记录切片数.
    #[inline]
    pub fn count_slices(&mut self, n: usize) {
        self.slices += n as u64;
    }

    /// 开始重建计时.
    #[inline]
    pub fn build_start(&mut self) {
        self.build_time.start();
    }

    /// 结束重建计时.
    #[inline]
    pub fn build_elapsed(&mut self) {
        self.build_time.elapsed();
    }

    /// 记录一个体素的重建误差.
    #[inline]
    pub fn count_voxel(&mut self, provenance: Provenance, truth: f32, rebuilt: f32) {
        self.errors[provenance.code() as usize].add((truth - rebuilt).abs() as f64);
    }

    /// 切片数.
    #[inline]
    pub fn get_slices(&self) -> u64 {
        self.slices
    }

    /// 某一来源的误差统计.
    #[inline]
    pub fn get_error(&self, provenance: Provenance) -> &ErrorStat {
        &self.errors[provenance.code() as usize]
    }

    /// 重建耗时 (微秒).
    #[inline]
    pub fn get_build_time_us(&self) -> u64 {
        self.build_time.total_us()
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}
