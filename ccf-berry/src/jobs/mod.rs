//! 后台任务: 体重建与脑区统计.
//!
//! 交互路径 (编辑变换、预览) 同步执行; 耗时的体重建与统计进入单 worker 队列,
//! 界面只负责入队与读取进度.

mod queue;
mod tasks;

pub use queue::{JobEvent, JobId, JobQueue, JobStatus, Progress, QueueError, QueueResult};
pub use tasks::{
    ImageLoader, ProvenanceFilter, QuantifyJob, QuantifySource, SliceInput, VolumeJob,
};

use crate::ontology::Quantification;
use crate::volume::BuildReport;
use std::path::PathBuf;

/// 任务的产出.
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutput {
    /// 体重建完成, 结果已写入体仓库.
    Volume {
        /// 目录.
        directory: PathBuf,
        /// 重建报告.
        report: BuildReport,
    },

    /// 统计结果.
    Quantification(Quantification),

    /// 其他任务的简短说明.
    Message(String),
}

/// 可以放入 [`JobQueue`] 的任务.
pub trait Job: Send + 'static {
    /// 用于日志的名称.
    fn name(&self) -> String;

    /// 运行到结束. 返回的错误只记录在本任务的状态上.
    fn run(self: Box<Self>, progress: &Progress) -> Result<JobOutput, String>;
}
