use std::sync::{
    Arc, Mutex, OnceLock, PoisonError, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::{runtime::Handle, sync::watch};

use crate::{
    api::{ArtworkResolver, PresenceClientFactory, StartParameters, TimestampEstimate, Track},
    config::PresenceConfig,
    context::HostContext,
    error::{PresenceError, Result},
    failure::{RestartGate, RestartRefusal},
    updater::PresenceUpdater,
    worker::SyncWorker,
};

/// 最近一次 `start()` 的参数，供 `restart()` 复用。
#[derive(Clone)]
struct StoredStart {
    context: HostContext,
    params: StartParameters,
}

struct CoordinatorInner {
    updater: Arc<PresenceUpdater>,
    running: AtomicBool,
    /// 启动、停止以及循环自行结束这三种状态转换都在这把锁内完成。
    worker: Mutex<Option<SyncWorker>>,
    stored: Mutex<Option<StoredStart>>,
    restart_gate: RestartGate,
    generation: AtomicU64,
    runtime: OnceLock<Handle>,
}

/// 富状态同步协调器，是与本库交互的入口。
///
/// 协调器是一个显式构造的服务对象（内部为 `Arc`，克隆开销很小），
/// 应由管理播放器生命周期的组件持有，而不是作为全局单例访问。
///
/// ## 职责
///
/// * **生命周期**: `start()` / `stop()` 都是幂等的；同一时刻最多只有一个同步循环在运行。
/// * **互斥更新**: 定时更新和 [`update_now`](Self::update_now) 共用同一把锁，永远不会交错。
/// * **受控重启**: [`restart`](Self::restart) 受冷却时间和连续失败次数两道闸门限制。
/// * **时间戳观察**: 最近一次成功更新估算出的开始/结束时间可以通过
///   [`timestamps`](Self::timestamps) 订阅。
///
/// 集成方有义务在拆除所属组件时调用 `stop()`（或触发 `start()` 时传入的生命周期的销毁钩子）。
#[derive(Clone)]
pub struct PresenceCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl PresenceCoordinator {
    /// 创建协调器。不会启动任何后台任务。
    pub fn new(
        factory: Arc<dyn PresenceClientFactory>,
        resolver: Arc<dyn ArtworkResolver>,
        config: PresenceConfig,
    ) -> Self {
        let config = Arc::new(config);
        let restart_gate =
            RestartGate::new(config.restart_cooldown(), config.max_consecutive_failures);
        let updater = Arc::new(PresenceUpdater::new(factory, resolver, Arc::clone(&config)));

        Self {
            inner: Arc::new(CoordinatorInner {
                updater,
                running: AtomicBool::new(false),
                worker: Mutex::new(None),
                stored: Mutex::new(None),
                restart_gate,
                generation: AtomicU64::new(0),
                runtime: OnceLock::new(),
            }),
        }
    }

    /// 指定运行同步循环的 Tokio 运行时。
    ///
    /// 不指定时，`start()` 会使用调用线程所在的运行时。
    #[must_use]
    pub fn with_runtime(self, runtime: Handle) -> Self {
        if self.inner.runtime.set(runtime).is_err() {
            log::warn!("[PresenceCoordinator] 运行时句柄已设置，忽略重复设置。");
        }
        self
    }

    /// 启动同步循环。
    ///
    /// 如果循环已在运行，直接返回 `Ok(())`，不会启动第二个循环。
    /// 否则保存参数、在新的任务组中启动循环，并在宿主生命周期上注册一个调用 `stop()` 的销毁钩子。
    ///
    /// # 错误
    /// - `PresenceError::NoRuntime`: 找不到可用的 Tokio 运行时。
    /// - `PresenceError::MutexPoisoned`: 内部锁已被毒化。
    pub fn start(&self, context: HostContext, params: StartParameters) -> Result<()> {
        let mut worker_slot = self.inner.worker.lock()?;
        if self.inner.running.load(Ordering::Acquire) {
            log::debug!("[PresenceCoordinator] 同步循环已在运行，忽略重复启动。");
            return Ok(());
        }

        let runtime = self.inner.runtime()?;
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;

        *self.inner.stored.lock()? = Some(StoredStart {
            context: context.clone(),
            params: params.clone(),
        });

        let finished = Arc::downgrade(&self.inner);
        let mut worker = SyncWorker::spawn(
            runtime,
            generation,
            Arc::clone(&self.inner.updater),
            &context,
            params,
            move |generation| {
                if let Some(inner) = finished.upgrade() {
                    inner.on_loop_finished(generation);
                }
            },
        );

        let on_destroy: Weak<CoordinatorInner> = Arc::downgrade(&self.inner);
        let hook = context.lifecycle.add_destroy_hook(Box::new(move || {
            if let Some(inner) = on_destroy.upgrade() {
                log::info!("[PresenceCoordinator] 宿主正在销毁，停止同步。");
                inner.stop();
            }
        }));
        worker.bind_lifecycle(Arc::clone(&context.lifecycle), hook);

        self.inner.running.store(true, Ordering::Release);
        *worker_slot = Some(worker);

        log::info!("[PresenceCoordinator] 同步循环已启动 (代号 {generation})。");
        Ok(())
    }

    /// 停止同步循环。
    ///
    /// 未在运行时什么也不做。否则取消循环、注销销毁钩子，并在后台异步地清除活动、关闭连接，
    /// 不会阻塞调用方。
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// 使用最近一次 `start()` 的参数重启同步。
    ///
    /// 以下情况会拒绝重启并返回 `false`：
    /// - 没有保存过启动参数；
    /// - 距离上次重启不足冷却时长（默认 30 秒）；
    /// - 连续失败次数已达上限（默认 3 次），直到调用 [`reset_failure_count`](Self::reset_failure_count)
    ///   或某次更新成功。
    ///
    /// 重启过程中 `start()` 失败时返回 `false`，且不计入冷却时间。
    pub fn restart(&self) -> bool {
        let stored = self
            .inner
            .stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(stored) = stored else {
            log::warn!("[PresenceCoordinator] 没有可用的启动参数，无法重启。");
            return false;
        };

        let failures = self.inner.updater.failure_count();
        let previous = match self.inner.restart_gate.try_acquire(failures) {
            Ok(previous) => previous,
            Err(refusal) => {
                match refusal {
                    RestartRefusal::Cooldown { remaining } => {
                        log::warn!("[PresenceCoordinator] 重启过于频繁，需再等待 {remaining:?}。");
                    }
                    RestartRefusal::TooManyFailures { count } => {
                        log::warn!("[PresenceCoordinator] 已连续失败 {count} 次，拒绝自动重启。");
                    }
                }
                return false;
            }
        };

        log::info!("[PresenceCoordinator] 正在重启同步...");
        self.stop();
        match self.start(stored.context, stored.params) {
            Ok(()) => true,
            Err(e) => {
                // 失败的重启不占用冷却时间。
                self.inner.restart_gate.revert(previous);
                log::error!("[PresenceCoordinator] 重启失败: {e}");
                false
            }
        }
    }

    /// 立即更新一次富状态，用于手动“刷新”。
    ///
    /// 与同步循环共用同一把锁，两者不会交错执行。
    pub async fn update_now(
        &self,
        token: &str,
        track: Option<&Track>,
        position_ms: i64,
        paused: bool,
    ) -> bool {
        self.inner
            .updater
            .update_presence(token, track, position_ms, paused)
            .await
    }

    /// 清零连续失败计数，解除对 `restart()` 的限制。
    pub fn reset_failure_count(&self) {
        self.inner.updater.reset_failures();
    }

    /// 当前的连续失败次数。
    pub fn failure_count(&self) -> u32 {
        self.inner.updater.failure_count()
    }

    /// 同步循环是否正在运行。
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// 订阅时间戳估算的变化。
    pub fn timestamps(&self) -> watch::Receiver<TimestampEstimate> {
        self.inner.updater.subscribe_timestamps()
    }

    /// 最近一次估算的曲目开始时间（Unix 毫秒时间戳）。
    pub fn last_start_time_estimate(&self) -> Option<i64> {
        self.inner.updater.timestamps().started_at_epoch_ms
    }

    /// 最近一次估算的曲目结束时间（Unix 毫秒时间戳）。
    pub fn last_end_time_estimate(&self) -> Option<i64> {
        self.inner.updater.timestamps().ends_at_epoch_ms
    }
}

impl CoordinatorInner {
    fn runtime(&self) -> Result<Handle> {
        if let Some(handle) = self.runtime.get() {
            return Ok(handle.clone());
        }
        Handle::try_current().map_err(|_| PresenceError::NoRuntime)
    }

    fn stop(&self) {
        let worker = {
            let mut worker_slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.running.swap(false, Ordering::AcqRel) {
                log::trace!("[PresenceCoordinator] 同步循环未在运行，忽略停止请求。");
                return;
            }
            worker_slot.take()
        };

        let Some(mut worker) = worker else {
            return;
        };
        worker.shutdown();

        let updater = Arc::clone(&self.updater);
        worker.runtime().spawn(async move {
            updater.teardown_connection().await;
        });

        log::info!("[PresenceCoordinator] 同步循环已停止 (代号 {})。", worker.generation());
    }

    /// 循环自行结束（间隔 `<= 0` 或主上下文关闭）时调用。
    ///
    /// 只清理与 `generation` 对应的那次运行；连接保持不变。
    fn on_loop_finished(&self, generation: u64) {
        let finished = {
            let mut worker_slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            if worker_slot
                .as_ref()
                .is_some_and(|w| w.generation() == generation)
            {
                self.running.store(false, Ordering::Release);
                worker_slot.take()
            } else {
                None
            }
        };

        if let Some(mut worker) = finished {
            worker.shutdown();
            log::info!("[PresenceCoordinator] 同步循环已自行结束 (代号 {generation})。");
        }
    }
}
