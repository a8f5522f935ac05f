use super::{Job, JobOutput};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

/// 任务编号, 按入队顺序递增.
pub type JobId = u64;

/// 任务状态.
#[derive(Clone, Debug, PartialEq)]
pub enum JobStatus {
    /// 排队中.
    Queued,

    /// 运行中, 附带进度 `[0, 1]`.
    Running(f32),

    /// 已完成.
    Finished(JobOutput),

    /// 失败 (返回错误或 panic), 附带原因. 不影响队列中的其他任务.
    Failed(String),
}

impl JobStatus {
    /// 是否已结束.
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Failed(_))
    }
}

/// 推送给订阅者的事件.
#[derive(Clone, Debug, PartialEq)]
pub enum JobEvent {
    /// 任务开始.
    Started(JobId),

    /// 进度更新.
    Progress(JobId, f32),

    /// 任务结束, 附带最终状态.
    Done(JobId, JobStatus),

    /// 队列已清空, worker 退出.
    Drained,
}

/// 队列错误.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueError {
    /// 队列正在处理, 不接受新任务.
    Busy,

    /// 队列为空, 没有可运行的任务.
    Empty,

    /// 无法启动 worker 线程.
    Spawn(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("cannot queue jobs while the queue is running"),
            Self::Empty => f.write_str("no job is queued"),
            Self::Spawn(e) => write!(f, "failed to spawn worker: {e}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// 队列相关操作的结果.
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Default)]
struct State {
    next_id: JobId,
    pending: VecDeque<(JobId, Box<dyn Job>)>,
    statuses: BTreeMap<JobId, JobStatus>,
    subscribers: Vec<Sender<JobEvent>>,
    draining: bool,
}

impl State {
    fn emit(&mut self, event: JobEvent) {
        self.subscribers.retain(|s| s.send(event.clone()).is_ok());
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 运行中的任务用来报告进度的句柄.
pub struct Progress {
    id: JobId,
    shared: Arc<Shared>,
}

impl Progress {
    /// 任务编号.
    #[inline]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// 报告进度, 会被夹在 `[0, 1]` 内.
    pub fn set(&self, fraction: f32) {
        let f = fraction.clamp(0.0, 1.0);
        let mut state = self.shared.lock();
        state.statuses.insert(self.id, JobStatus::Running(f));
        state.emit(JobEvent::Progress(self.id, f));
    }
}

/// 单 worker 的先进先出任务队列.
///
/// 先 [`JobQueue::enqueue`] 若干任务, 再 [`JobQueue::start`]; worker 按入队顺序逐个运行,
/// 队列清空后退出. 运行期间拒绝入队 (`QueueError::Busy`). 单个任务的失败只记录在它自己的
/// 状态上. 任务一旦开始就会运行到结束, 不支持取消.
#[derive(Clone, Default)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    /// 空队列.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队. 队列运行期间返回 `Err(QueueError::Busy)`.
    pub fn enqueue<J: Job>(&self, job: J) -> QueueResult<JobId> {
        let mut state = self.shared.lock();
        if state.draining {
            return Err(QueueError::Busy);
        }
        let id = state.next_id;
        state.next_id += 1;
        log::debug!("Queued job #{id}: {}", job.name());
        state.pending.push_back((id, Box::new(job)));
        state.statuses.insert(id, JobStatus::Queued);
        Ok(id)
    }

    /// 启动 worker. 已在运行时返回 `Err(QueueError::Busy)`, 没有任务时返回
    /// `Err(QueueError::Empty)`.
    pub fn start(&self) -> QueueResult<()> {
        {
            let mut state = self.shared.lock();
            if state.draining {
                return Err(QueueError::Busy);
            }
            if state.pending.is_empty() {
                return Err(QueueError::Empty);
            }
            state.draining = true;
        }
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("ccf-berry-jobs".into())
            .spawn(move || drain(shared));
        if let Err(e) = spawned {
            let mut state = self.shared.lock();
            state.draining = false;
            return Err(QueueError::Spawn(e.to_string()));
        }
        Ok(())
    }

    /// 是否正在运行.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.lock().draining
    }

    /// 阻塞直到 worker 清空队列. 未运行时立即返回.
    pub fn wait(&self) {
        let mut state = self.shared.lock();
        while state.draining {
            state = self
                .shared
                .idle
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// 任务状态.
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.shared.lock().statuses.get(&id).cloned()
    }

    /// 所有任务的状态, 按编号递增.
    pub fn statuses(&self) -> Vec<(JobId, JobStatus)> {
        let state = self.shared.lock();
        state.statuses.iter().map(|(&id, s)| (id, s.clone())).collect()
    }

    /// 移除已结束 (完成或失败) 任务的状态, 返回移除的个数.
    pub fn clear_finished(&self) -> usize {
        let mut state = self.shared.lock();
        let before = state.statuses.len();
        state.statuses.retain(|_, s| !s.is_done());
        before - state.statuses.len()
    }

    /// 排队中 (尚未开始) 的任务个数.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// 订阅事件.
    pub fn subscribe(&self) -> Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }
}

/// worker 主循环.
fn drain(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut state = shared.lock();
            let next = state.pending.pop_front();
            match &next {
                Some((id, _)) => {
                    let id = *id;
                    state.statuses.insert(id, JobStatus::Running(0.0));
                    state.emit(JobEvent::Started(id));
                }
                None => {
                    state.draining = false;
                    state.emit(JobEvent::Drained);
                    shared.idle.notify_all();
                }
            }
            next
        };
        let Some((id, job)) = next else {
            return;
        };

        let name = job.name();
        let progress = Progress {
            id,
            shared: Arc::clone(&shared),
        };
        let status = match panic::catch_unwind(AssertUnwindSafe(|| job.run(&progress))) {
            Ok(Ok(out)) => {
                log::info!("Job #{id} ({name}) finished");
                JobStatus::Finished(out)
            }
            Ok(Err(e)) => {
                log::warn!("Job #{id} ({name}) failed: {e}");
                JobStatus::Failed(e)
            }
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| String::from("job panicked"));
                log::warn!("Job #{id} ({name}) panicked: {msg}");
                JobStatus::Failed(msg)
            }
        };

        let mut state = shared.lock();
        state.statuses.insert(id, status.clone());
        state.emit(JobEvent::Done(id, status));
    }
}
