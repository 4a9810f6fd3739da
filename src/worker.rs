use std::sync::Arc;

use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    api::StartParameters,
    context::{HookId, HostContext, HostLifecycle},
    tasks::{self, LoopExit},
    updater::PresenceUpdater,
};

/// 一个正在运行的同步循环及其附属资源。
///
/// `SyncWorker` 持有：
/// 1. 循环任务的句柄和取消令牌（即循环所在的任务组）。
/// 2. 在宿主生命周期上注册的销毁钩子，用于在宿主销毁时自动停止。
/// 3. 启动时解析到的 Tokio 运行时句柄，`stop()` 用它派发异步的连接拆除任务。
pub(crate) struct SyncWorker {
    generation: u64,
    cancel_token: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
    lifecycle_hook: Option<(Arc<dyn HostLifecycle>, HookId)>,
    runtime: Handle,
}

impl SyncWorker {
    /// 在给定运行时上启动同步循环。
    ///
    /// `on_finished` 只会在循环自行结束（而不是被取消）时调用，参数为本次运行的代号。
    /// 循环任务 panic 也视为自行结束。
    pub(crate) fn spawn<F>(
        runtime: Handle,
        generation: u64,
        updater: Arc<PresenceUpdater>,
        context: &HostContext,
        params: StartParameters,
        on_finished: F,
    ) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let loop_token = cancel_token.clone();
        let primary = Arc::clone(&context.primary);

        // 循环跑在内层任务里，外层任务负责观察它的结束方式，包括 panic。
        let task_handle = runtime.spawn(async move {
            let sync_loop =
                tokio::spawn(tasks::sync_loop_task(updater, primary, params, loop_token));
            match sync_loop.await {
                Ok(LoopExit::Cancelled) => {}
                Ok(_) => on_finished(generation),
                Err(e) if e.is_panic() => {
                    log::error!("[SyncWorker] 同步循环 panic (代号 {generation})，按自行结束处理: {e}");
                    on_finished(generation);
                }
                Err(e) => log::debug!("[SyncWorker] 同步循环任务已被运行时取消: {e}"),
            }
        });

        Self {
            generation,
            cancel_token,
            task_handle: Some(task_handle),
            lifecycle_hook: None,
            runtime,
        }
    }

    pub(crate) fn bind_lifecycle(&mut self, lifecycle: Arc<dyn HostLifecycle>, hook: HookId) {
        self.lifecycle_hook = Some((lifecycle, hook));
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// 取消循环并注销生命周期钩子。
    ///
    /// 正在进行的更新不会被强行中止，它会在完成后被丢弃；
    /// 循环在下一个等待点观察到取消后退出。
    pub(crate) fn shutdown(&mut self) {
        self.cancel_token.cancel();
        if self.task_handle.take().is_some() {
            log::debug!("[SyncWorker] 已取消同步循环 (代号 {})。", self.generation);
        }
        if let Some((lifecycle, hook)) = self.lifecycle_hook.take() {
            lifecycle.remove_destroy_hook(hook);
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if self.task_handle.is_some() || self.lifecycle_hook.is_some() {
            log::trace!("[SyncWorker] 实例被丢弃，正在取消同步循环...");
            self.shutdown();
        }
    }
}
