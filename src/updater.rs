use std::sync::Arc;

use tokio::sync::{Mutex as TokioMutex, watch};

use crate::{
    api::{
        ActivityButton, ActivityPayload, ActivityTimestamps, ActivityType, ArtworkResolver,
        PresenceClientFactory, TimestampEstimate, Track,
    },
    config::PresenceConfig,
    connection::{ConnectionSlot, teardown_client},
    error::{PresenceError, Result},
    failure::FailureTracker,
    tasks,
    utils::{activity_text, image_url, now_epoch_ms},
};

/// 富状态更新的执行者，也就是整个子系统唯一的临界区。
///
/// 定时轮询和手动刷新都经过同一把互斥锁，因此任意时刻最多只有一次更新在进行，
/// 对客户端的调用也永远不会交错。
pub(crate) struct PresenceUpdater {
    factory: Arc<dyn PresenceClientFactory>,
    resolver: Arc<dyn ArtworkResolver>,
    config: Arc<PresenceConfig>,
    connection: TokioMutex<ConnectionSlot>,
    failures: FailureTracker,
    timestamps: watch::Sender<TimestampEstimate>,
}

impl PresenceUpdater {
    pub(crate) fn new(
        factory: Arc<dyn PresenceClientFactory>,
        resolver: Arc<dyn ArtworkResolver>,
        config: Arc<PresenceConfig>,
    ) -> Self {
        let (timestamps, _) = watch::channel(TimestampEstimate::default());
        Self {
            factory,
            resolver,
            config,
            connection: TokioMutex::new(ConnectionSlot::default()),
            failures: FailureTracker::default(),
            timestamps,
        }
    }

    /// 用给定的播放状态更新富状态。
    ///
    /// 只通过返回值报告结果，任何错误都不会传播给调用方：
    /// - 令牌为空：直接返回 `false`，不尝试连接，也不计入失败。
    /// - 没有曲目：清除活动，失败计数归零，返回 `true`。
    /// - 其余情况：发送活动，成功时归零失败计数并（在播放中时）刷新时间戳估算。
    pub(crate) async fn update_presence(
        &self,
        token: &str,
        track: Option<&Track>,
        position_ms: i64,
        paused: bool,
    ) -> bool {
        if token.trim().is_empty() {
            log::warn!("[PresenceUpdater] {}，跳过本次更新。", PresenceError::BlankToken);
            return false;
        }

        let mut slot = self.connection.lock().await;

        let Some(track) = track else {
            return match self.clear(&mut slot, token).await {
                Ok(()) => {
                    self.failures.reset();
                    true
                }
                Err(e) => {
                    let count = self.failures.record_failure();
                    log::warn!("[PresenceUpdater] 清除活动时无法建立连接 (连续失败 {count} 次): {e}");
                    false
                }
            };
        };

        match self.send(&mut slot, token, track, position_ms, paused).await {
            Ok(()) => {
                self.failures.reset();
                if !paused {
                    self.publish_timestamps(track, position_ms);
                }
                log::debug!(
                    "[PresenceUpdater] 已更新富状态: '{}' ({})",
                    track.title,
                    if paused { "已暂停" } else { "播放中" }
                );
                true
            }
            Err(e) => {
                let count = self.failures.record_failure();
                log::warn!("[PresenceUpdater] 更新富状态失败 (连续失败 {count} 次): {e}");
                false
            }
        }
    }

    async fn clear(&self, slot: &mut ConnectionSlot, token: &str) -> Result<()> {
        let client = slot.get_or_create(self.factory.as_ref(), token).await?;
        if let Err(e) = client.clear_activity().await {
            log::debug!("[PresenceUpdater] 清除活动失败 (已忽略): {e}");
        } else {
            log::debug!("[PresenceUpdater] 当前没有播放内容，已清除活动。");
        }
        Ok(())
    }

    async fn send(
        &self,
        slot: &mut ConnectionSlot,
        token: &str,
        track: &Track,
        position_ms: i64,
        paused: bool,
    ) -> Result<()> {
        tasks::resolve_artwork_with_timeout(
            self.resolver.as_ref(),
            track,
            self.config.artwork_timeout(),
        )
        .await;

        let client = slot.get_or_create(self.factory.as_ref(), token).await?;
        let artwork = self.resolver.cached_artwork(track);
        let payload = build_activity(
            &self.config,
            track,
            artwork.as_deref(),
            position_ms,
            paused,
            now_epoch_ms(),
        );
        client.set_activity(&payload).await
    }

    fn publish_timestamps(&self, track: &Track, position_ms: i64) {
        let (started, ends) = estimate_span(now_epoch_ms(), position_ms, track.duration_ms);
        self.timestamps.send_replace(TimestampEstimate {
            started_at_epoch_ms: Some(started),
            ends_at_epoch_ms: Some(ends),
        });
    }

    /// 在锁外预先解析封面，用于让第一次更新尽量带上封面。
    pub(crate) async fn prefetch_artwork(&self, track: &Track) {
        tasks::resolve_artwork_with_timeout(
            self.resolver.as_ref(),
            track,
            self.config.artwork_timeout(),
        )
        .await;
    }

    /// 拆除当前连接：清除活动并关闭，错误全部忽略。
    pub(crate) async fn teardown_connection(&self) {
        let client = self.connection.lock().await.take();
        if let Some(client) = client {
            log::debug!("[PresenceUpdater] 正在拆除富状态连接...");
            teardown_client(client.as_ref()).await;
        }
    }

    pub(crate) fn reset_failures(&self) {
        self.failures.reset();
    }

    pub(crate) fn failure_count(&self) -> u32 {
        self.failures.count()
    }

    pub(crate) fn subscribe_timestamps(&self) -> watch::Receiver<TimestampEstimate> {
        self.timestamps.subscribe()
    }

    pub(crate) fn timestamps(&self) -> TimestampEstimate {
        *self.timestamps.borrow()
    }
}

/// 由当前时间、播放进度和曲目时长估算 `(开始, 结束)`。
///
/// 进度或时长可能接近 `i64` 边界，结果饱和而不溢出。
fn estimate_span(now_ms: i64, position_ms: i64, duration_ms: i64) -> (i64, i64) {
    let started = now_ms.saturating_sub(position_ms);
    (started, started.saturating_add(duration_ms))
}

/// 根据曲目和播放状态构建活动。
///
/// 时间戳只在播放中时附带；暂停时不显示进度。
pub(crate) fn build_activity(
    config: &PresenceConfig,
    track: &Track,
    resolved_artwork: Option<&str>,
    position_ms: i64,
    paused: bool,
    now_ms: i64,
) -> ActivityPayload {
    let large_image =
        image_url(resolved_artwork).or_else(|| image_url(track.artwork_url.as_deref()));

    let (small_image, small_text) = if paused {
        (image_url(config.paused_icon.as_deref()), "Paused")
    } else {
        (image_url(config.playing_icon.as_deref()), "Playing")
    };

    let timestamps = (!paused).then(|| {
        let (start, end) = estimate_span(now_ms, position_ms, track.duration_ms);
        ActivityTimestamps { start, end }
    });

    let buttons = config
        .track_url(&track.id)
        .and_then(|url| {
            Some(ActivityButton {
                label: activity_text(&config.button_label)?,
                url,
            })
        })
        .into_iter()
        .collect();

    ActivityPayload {
        name: activity_text(&config.application_name).unwrap_or_else(|| "Music".to_string()),
        activity_type: ActivityType::Listening,
        details: activity_text(&track.title),
        state: activity_text(&track.artist_names()),
        small_text: small_image.as_ref().map(|_| small_text.to_string()),
        large_text: track.album.as_ref().and_then(|a| activity_text(&a.title)),
        large_image,
        small_image,
        timestamps,
        buttons,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::api::{AlbumRef, ArtistRef, NoopArtworkResolver, PresenceClient};

    struct AcceptingClient;

    #[async_trait]
    impl PresenceClient for AcceptingClient {
        async fn set_activity(&self, _payload: &ActivityPayload) -> Result<()> {
            Ok(())
        }
        async fn clear_activity(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct AcceptingFactory;

    #[async_trait]
    impl PresenceClientFactory for AcceptingFactory {
        async fn create(&self, _token: &str) -> Result<Arc<dyn PresenceClient>> {
            Ok(Arc::new(AcceptingClient))
        }
    }

    fn accepting_updater() -> PresenceUpdater {
        PresenceUpdater::new(
            Arc::new(AcceptingFactory),
            Arc::new(NoopArtworkResolver),
            Arc::new(PresenceConfig::default()),
        )
    }

    fn sample_track() -> Track {
        Track {
            id: "dQw4w9WgXcQ".into(),
            title: "Solaris".into(),
            duration_ms: 240_000,
            artists: vec![ArtistRef {
                id: None,
                name: "Stellardrone".into(),
            }],
            album: Some(AlbumRef {
                id: None,
                title: "Light Years".into(),
            }),
            artwork_url: Some("https://img.example.com/light-years.jpg".into()),
        }
    }

    #[test]
    fn test_playing_activity_has_timestamps() {
        let config = PresenceConfig::default();
        let payload = build_activity(&config, &sample_track(), None, 30_000, false, 1_000_000);

        assert_eq!(payload.details.as_deref(), Some("Solaris"));
        assert_eq!(payload.state.as_deref(), Some("Stellardrone"));
        assert_eq!(payload.large_text.as_deref(), Some("Light Years"));
        assert_eq!(
            payload.large_image.as_deref(),
            Some("https://img.example.com/light-years.jpg")
        );
        assert_eq!(
            payload.timestamps,
            Some(ActivityTimestamps {
                start: 970_000,
                end: 1_210_000
            })
        );
        assert!(payload.buttons.is_empty());
    }

    #[test]
    fn test_paused_activity_has_no_timestamps() {
        let config = PresenceConfig {
            paused_icon: Some("https://img.example.com/pause.png".into()),
            ..Default::default()
        };
        let payload = build_activity(&config, &sample_track(), None, 30_000, true, 1_000_000);

        assert_eq!(payload.timestamps, None);
        assert_eq!(
            payload.small_image.as_deref(),
            Some("https://img.example.com/pause.png")
        );
        assert_eq!(payload.small_text.as_deref(), Some("Paused"));
    }

    #[test]
    fn test_resolved_artwork_wins_over_track_artwork() {
        let config = PresenceConfig::default();
        let payload = build_activity(
            &config,
            &sample_track(),
            Some("https://cdn.example.com/resolved.jpg"),
            0,
            false,
            0,
        );
        assert_eq!(
            payload.large_image.as_deref(),
            Some("https://cdn.example.com/resolved.jpg")
        );

        let mut local = sample_track();
        local.artwork_url = Some("file:///music/cover.jpg".into());
        let payload = build_activity(&config, &local, Some("not a url"), 0, false, 0);
        assert_eq!(payload.large_image, None);
    }

    #[test]
    fn test_track_button_from_template() {
        let config = PresenceConfig {
            track_url_template: Some("https://music.example.com/watch?v={id}".into()),
            ..Default::default()
        };
        let payload = build_activity(&config, &sample_track(), None, 0, false, 0);
        assert_eq!(
            payload.buttons,
            vec![ActivityButton {
                label: "Listen".into(),
                url: "https://music.example.com/watch?v=dQw4w9WgXcQ".into(),
            }]
        );
    }

    #[test]
    fn test_extreme_position_and_duration_saturate() {
        let config = PresenceConfig::default();
        let mut live = sample_track();
        live.duration_ms = i64::MAX;

        let payload = build_activity(&config, &live, None, 0, false, 1_000_000);
        assert_eq!(
            payload.timestamps,
            Some(ActivityTimestamps {
                start: 1_000_000,
                end: i64::MAX
            })
        );

        let payload = build_activity(&config, &live, None, i64::MIN, false, 1_000_000);
        assert_eq!(
            payload.timestamps,
            Some(ActivityTimestamps {
                start: i64::MAX,
                end: i64::MAX
            })
        );

        let mut negative = sample_track();
        negative.duration_ms = i64::MIN;
        let payload = build_activity(&config, &negative, None, i64::MAX, false, -1);
        assert_eq!(
            payload.timestamps,
            Some(ActivityTimestamps {
                start: i64::MIN,
                end: i64::MIN
            })
        );
    }

    #[tokio::test]
    async fn test_update_with_extreme_values_succeeds() {
        let updater = accepting_updater();
        let mut live = sample_track();
        live.duration_ms = i64::MAX;

        assert!(updater.update_presence("token", Some(&live), 0, false).await);
        assert_eq!(updater.timestamps().ends_at_epoch_ms, Some(i64::MAX));

        assert!(
            updater
                .update_presence("token", Some(&live), i64::MIN, false)
                .await
        );
        assert_eq!(updater.timestamps().started_at_epoch_ms, Some(i64::MAX));
        assert_eq!(updater.failure_count(), 0);
    }
}
