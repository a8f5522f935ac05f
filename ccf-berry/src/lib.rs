#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 将二维组织学切片配准到 CCF 三维脑图谱, 由稀疏的已配准切片重建稠密三维体,
//! 并按脑区结构层级统计强度.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 坐标约定
//!
//! 1. 图谱数组轴序为 `(AP, DV, LR)`, 原点在前-上-左 (ASL) 角. 索引到物理坐标的换算为
//!   `index * resolution` (微米).
//! 2. 切片方向决定深度轴: 冠状面为 AP, 水平面为 DV, 矢状面为 LR.
//!   平面内的 `(u, v)` 即图像的 `(列, 行)`, 平面层的数组形状总是 `(v, u)`.
//! 3. 二维仿射变换的组合顺序固定为 缩放 → 剪切 → 旋转 → 平移,
//!   即 `M = T · R · Sh · S`. 地标求解的分解严格按该顺序求逆.
//!
//! # 开发计划
//!
//! ### 仿射变换与斜切平面位姿 ✅
//!
//! 编辑是显式的状态转换: 输入当前状态, 返回校验过的新状态或具体错误.
//!
//! 实现位于 `ccf-berry/src/transform`.
//!
//! ### 平面采样 ✅
//!
//! 强度三线性插值, 结构 id 最近邻, 范围外取背景. 同一流程用于组织切片的重采样.
//! 开启 `rayon` feature 时按行并行.
//!
//! 实现位于 `ccf-berry/src/sampler`.
//!
//! ### 地标求解 ✅
//!
//! 最小二乘仿射拟合 (Hartley 归一化 + 条件数判定), 再按固定路线分解.
//!
//! 实现位于 `ccf-berry/src/landmark`.
//!
//! ### 稀疏切片体重建 ✅
//!
//! 1. 直接插入与 z-stack 复制 ✅
//! 2. 按深度线性插值与边界保持 ✅
//! 3. 深度冲突报告 ✅
//! 4. npz 导出与 zlib 压缩存储 ✅
//!
//! 实现位于 `ccf-berry/src/volume`.
//!
//! ### 脑区结构层级与统计 ✅
//!
//! 后代集合按需计算并缓存. 统计支持任意维度的网格, 以及按体素来源过滤.
//!
//! 实现位于 `ccf-berry/src/ontology`.
//!
//! ### 后台任务队列 ✅
//!
//! 单 worker, 先进先出, 运行期间拒绝入队, 单个任务失败不影响其他任务.
//!
//! 实现位于 `ccf-berry/src/jobs`.
//!
//! ### 重建体直接关联组织切片文件的读取 ⌛️
//!
//! 目前图像解码由调用方提供.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 高精度二维坐标 / 向量, `(x, y)`.
pub type Idx2dF = (f64, f64);

/// 高精度三维坐标 / 向量.
pub type Idx3dF = (f64, f64, f64);

pub mod alignment;
pub mod atlas;
pub mod config;
pub mod consts;
pub mod jobs;
pub mod landmark;
pub mod ontology;
pub mod prelude;
pub mod project;
pub mod sampler;
pub mod transform;
pub mod volume;

/// 测试中输出 `warn!` 及以上的日志. 重复调用时忽略.
#[cfg(test)]
pub(crate) fn init_test_logger() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .init();
}

pub use alignment::Alignment;
pub use atlas::{AtlasFrame, AtlasGeometry, AtlasVolume, DisplayWindow, Orientation, Resolution};
pub use config::ProjectConfig;
pub use project::Project;
pub use transform::{AffineTransform2D, PlanePose};
pub use volume::{Provenance, ReconstructedVolume};
