use std::{sync::Arc, time::Duration, time::Instant};

use tokio::{sync::oneshot, time::timeout as tokio_timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    api::{ArtworkResolver, PlaybackSnapshot, SnapshotSource, StartParameters, Track},
    context::PrimaryContext,
    error::{PresenceError, Result},
    updater::PresenceUpdater,
};

/// 同步循环结束的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// 被外部取消（`stop()`）。
    Cancelled,
    /// 轮询间隔 `<= 0`，循环自行结束。
    IntervalDisabled,
    /// 宿主的主上下文已关闭。
    PrimaryContextGone,
}

/// 带超时地执行封面解析。超时或出错只记录日志，不影响调用方。
pub(crate) async fn resolve_artwork_with_timeout(
    resolver: &dyn ArtworkResolver,
    track: &Track,
    limit: Duration,
) {
    let start_time = Instant::now();
    let outcome = match tokio_timeout(limit, resolver.resolve(track)).await {
        Ok(result) => result,
        Err(_) => Err(PresenceError::ArtworkTimeout(limit)),
    };

    match outcome {
        Ok(()) => log::trace!(
            "[Artwork] '{}' 的封面已解析，耗时 {:?}",
            track.title,
            start_time.elapsed()
        ),
        Err(e) => log::warn!("[Artwork] '{}' 的封面解析未完成，继续更新: {e}", track.title),
    }
}

/// 在主上下文中读取一份播放快照，然后把结果交回调用方所在的后台任务。
pub(crate) async fn read_snapshot(
    primary: &dyn PrimaryContext,
    source: Arc<dyn SnapshotSource>,
) -> Result<PlaybackSnapshot> {
    let (snapshot_tx, snapshot_rx) = oneshot::channel();
    primary.dispatch(Box::new(move || {
        let _ = snapshot_tx.send(source.snapshot());
    }))?;
    snapshot_rx
        .await
        .map_err(|_| PresenceError::PrimaryContextUnavailable)
}

/// 同步循环：立即更新一次，然后按 `interval` 周期性地轮询并更新，
/// 直到被取消或间隔变为 `<= 0`。
pub(crate) async fn sync_loop_task(
    updater: Arc<PresenceUpdater>,
    primary: Arc<dyn PrimaryContext>,
    params: StartParameters,
    cancel_token: CancellationToken,
) -> LoopExit {
    log::debug!("[SyncLoop] 同步循环已启动。");

    let initial = tokio::select! {
        biased;
        () = cancel_token.cancelled() => return LoopExit::Cancelled,
        snapshot = read_snapshot(primary.as_ref(), Arc::clone(&params.source)) => snapshot,
    };
    let initial = match initial {
        Ok(snapshot) => snapshot,
        Err(e) => {
            log::warn!("[SyncLoop] 无法读取初始播放状态，循环退出: {e}");
            return LoopExit::PrimaryContextGone;
        }
    };

    if let Some(track) = &initial.track {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => return LoopExit::Cancelled,
            () = updater.prefetch_artwork(track) => {}
        }
    }

    if cancel_token.is_cancelled() {
        return LoopExit::Cancelled;
    }

    // 已经开始的更新不会被中途打断，取消只在下一个等待点生效。
    updater
        .update_presence(
            &params.token,
            initial.track.as_ref(),
            initial.position_ms,
            initial.paused,
        )
        .await;

    let exit = loop {
        let interval_ms = (params.interval)();
        if interval_ms <= 0 {
            log::info!("[SyncLoop] 轮询间隔为 {interval_ms} ms，循环结束。");
            break LoopExit::IntervalDisabled;
        }

        tokio::select! {
            biased;
            () = cancel_token.cancelled() => break LoopExit::Cancelled,
            () = tokio::time::sleep(Duration::from_millis(interval_ms as u64)) => {}
        }

        let snapshot = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break LoopExit::Cancelled,
            snapshot = read_snapshot(primary.as_ref(), Arc::clone(&params.source)) => snapshot,
        };
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("[SyncLoop] 无法读取播放状态，循环退出: {e}");
                break LoopExit::PrimaryContextGone;
            }
        };

        log::trace!("[SyncLoop] 定时更新 (间隔 {interval_ms} ms)");
        updater
            .update_presence(
                &params.token,
                snapshot.track.as_ref(),
                snapshot.position_ms,
                snapshot.paused,
            )
            .await;
    };

    log::debug!("[SyncLoop] 同步循环已结束: {exit:?}");
    exit
}
