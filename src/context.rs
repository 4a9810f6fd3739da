//! 宿主环境的抽象：主上下文（UI 线程）与生命周期。

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver as CrossbeamReceiver, Sender as CrossbeamSender};

use crate::error::{PresenceError, Result};

/// 需要在主上下文中执行的任务。
pub type MainContextJob = Box<dyn FnOnce() + Send + 'static>;

/// 宿主的主上下文（通常是 UI 线程）。
///
/// 播放状态的访问器只能在主上下文中安全调用，所以同步循环会把读取快照的工作
/// 派发到这里，拿到结果后再回到后台执行网络更新。
pub trait PrimaryContext: Send + Sync {
    /// 把任务派发到主上下文执行。主上下文已关闭时返回错误。
    fn dispatch(&self, job: MainContextJob) -> Result<()>;
}

/// 在调用线程上直接执行任务的主上下文。
///
/// 适用于访问器本身就是线程安全的宿主。
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineContext;

impl PrimaryContext for InlineContext {
    fn dispatch(&self, job: MainContextJob) -> Result<()> {
        job();
        Ok(())
    }
}

/// 基于队列的主上下文：任务先排队，由宿主在自己的 UI 循环里通过
/// [`MainContextPump::pump_pending`] 执行。
#[derive(Clone)]
pub struct MainContextQueue {
    job_tx: CrossbeamSender<MainContextJob>,
}

/// [`MainContextQueue`] 的执行端，由拥有主上下文的线程持有。
pub struct MainContextPump {
    job_rx: CrossbeamReceiver<MainContextJob>,
}

impl MainContextQueue {
    /// 创建一对队列与执行端。
    pub fn channel() -> (Self, MainContextPump) {
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        (Self { job_tx }, MainContextPump { job_rx })
    }
}

impl PrimaryContext for MainContextQueue {
    fn dispatch(&self, job: MainContextJob) -> Result<()> {
        self.job_tx
            .send(job)
            .map_err(|_| PresenceError::PrimaryContextUnavailable)
    }
}

impl MainContextPump {
    /// 执行所有已排队的任务，不会阻塞。返回执行的任务数。
    ///
    /// 宿主应在每一帧（或每次事件循环迭代）中调用。
    pub fn pump_pending(&self) -> usize {
        let mut executed = 0;
        while let Ok(job) = self.job_rx.try_recv() {
            job();
            executed += 1;
        }
        executed
    }

    /// 在一个专用线程上持续执行任务，直到所有 [`MainContextQueue`] 都被丢弃。
    pub fn spawn_thread(self, name: &str) -> Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                log::debug!("[MainContext] 主上下文线程已启动。");
                while let Ok(job) = self.job_rx.recv() {
                    job();
                }
                log::debug!("[MainContext] 队列已关闭，主上下文线程结束。");
            })
            .map_err(|_| PresenceError::PrimaryContextUnavailable)
    }
}

/// 生命周期钩子。
pub type DestroyHook = Box<dyn FnOnce() + Send + 'static>;

/// 生命周期钩子的注册编号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// 宿主的生命周期。
///
/// 协调器在 `start()` 时注册一个销毁钩子，在 `stop()` 时注销。
/// 集成方有义务在拆除所属组件时触发这些钩子（或直接调用 `stop()`）。
pub trait HostLifecycle: Send + Sync {
    /// 注册一个在宿主销毁时执行的钩子。
    fn add_destroy_hook(&self, hook: DestroyHook) -> HookId;
    /// 注销钩子。钩子已执行或不存在时什么也不做。
    fn remove_destroy_hook(&self, id: HookId);
}

/// 进程级的生命周期实现。
#[derive(Default)]
pub struct ProcessLifecycle {
    next_id: AtomicU64,
    hooks: Mutex<HashMap<u64, DestroyHook>>,
    destroyed: AtomicBool,
}

impl ProcessLifecycle {
    /// 创建一个新的生命周期。
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记宿主已销毁，并执行所有已注册的钩子，每个钩子只会执行一次。
    ///
    /// 钩子在锁外执行，可以安全地在钩子中注销其他钩子。
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let hooks: Vec<DestroyHook> = {
            let mut guard = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain().map(|(_, hook)| hook).collect()
        };

        log::debug!("[Lifecycle] 宿主正在销毁，执行 {} 个钩子。", hooks.len());
        for hook in hooks {
            hook();
        }
    }

    /// 宿主是否已经销毁。
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// 当前已注册的钩子数量。
    pub fn hook_count(&self) -> usize {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl HostLifecycle for ProcessLifecycle {
    fn add_destroy_hook(&self, hook: DestroyHook) -> HookId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.is_destroyed() {
            log::warn!("[Lifecycle] 宿主已销毁，忽略新注册的钩子。");
        } else {
            self.hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, hook);
        }
        HookId(id)
    }

    fn remove_destroy_hook(&self, id: HookId) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id.0);
    }
}

/// 启动同步时需要的宿主环境。
#[derive(Clone)]
pub struct HostContext {
    /// 读取播放快照时使用的主上下文。
    pub primary: Arc<dyn PrimaryContext>,
    /// 用于绑定销毁钩子的生命周期。
    pub lifecycle: Arc<dyn HostLifecycle>,
}

impl HostContext {
    /// 创建宿主环境。
    pub fn new(primary: Arc<dyn PrimaryContext>, lifecycle: Arc<dyn HostLifecycle>) -> Self {
        Self { primary, lifecycle }
    }
}
