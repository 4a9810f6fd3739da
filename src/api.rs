use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 艺术家引用。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtistRef {
    /// 艺术家在曲库中的 ID（可能不存在，例如本地文件）。
    pub id: Option<String>,
    /// 艺术家名称。
    pub name: String,
}

/// 专辑引用。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlbumRef {
    /// 专辑在曲库中的 ID。
    pub id: Option<String>,
    /// 专辑标题。
    pub title: String,
}

/// 宿主播放器提供的曲目信息。对本库而言是只读的。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    /// 曲目的唯一标识符。
    pub id: String,
    /// 曲目标题。
    pub title: String,
    /// 曲目总时长（毫秒）。
    pub duration_ms: i64,
    /// 艺术家列表。
    pub artists: Vec<ArtistRef>,
    /// 所属专辑。
    pub album: Option<AlbumRef>,
    /// 封面图片的 URL。
    pub artwork_url: Option<String>,
}

impl Track {
    /// 以 ", " 连接的艺术家名称，忽略空名称。
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.trim())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// 某一时刻的播放状态快照，作为一次更新的输入。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    /// 当前曲目。`None` 表示没有在播放任何内容。
    pub track: Option<Track>,
    /// 当前播放位置（毫秒）。
    pub position_ms: i64,
    /// 是否处于暂停状态。
    pub paused: bool,
}

/// 最近一次成功更新时估算出的曲目开始/结束时间（Unix 毫秒时间戳）。
///
/// `(None, None)` 表示当前没有有效的估算。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimestampEstimate {
    /// 估算的曲目开始时间。
    pub started_at_epoch_ms: Option<i64>,
    /// 估算的曲目结束时间。
    pub ends_at_epoch_ms: Option<i64>,
}

/// 活动的类型。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    #[default]
    /// 正在收听。
    Listening,
    /// 正在观看。
    Watching,
    /// 正在玩。
    Playing,
}

/// 活动的时间戳（Unix 毫秒时间戳）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActivityTimestamps {
    /// 开始时间。
    pub start: i64,
    /// 结束时间。
    pub end: i64,
}

/// 活动上的链接按钮。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityButton {
    /// 按钮文字。
    pub label: String,
    /// 点击后打开的链接。
    pub url: String,
}

/// 发送给富状态服务的活动描述。
///
/// 具体的线上协议由 [`PresenceClient`] 的实现者负责，这里只描述要展示的内容。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivityPayload {
    /// 活动名称。
    pub name: String,
    /// 活动类型。
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    /// 第一行文字，通常是曲目标题。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// 第二行文字，通常是艺术家。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// 大图（封面）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    /// 大图的悬停文字，通常是专辑名。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    /// 小图（播放/暂停图标）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    /// 小图的悬停文字。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
    /// 仅在播放中时存在。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<ActivityTimestamps>,
    /// 链接按钮。
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<ActivityButton>,
}

impl ActivityPayload {
    /// 将活动序列化为 JSON，便于客户端实现直接发送。
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// 到富状态服务的一条连接。
///
/// 实现者负责具体的协议和网络超时。本库保证对同一个客户端的调用
/// 永远不会并发发生。
#[async_trait]
pub trait PresenceClient: Send + Sync {
    /// 设置当前活动。
    async fn set_activity(&self, payload: &ActivityPayload) -> Result<()>;
    /// 清除当前活动。
    async fn clear_activity(&self) -> Result<()>;
    /// 关闭连接。关闭后客户端不会再被使用。
    async fn close(&self) -> Result<()>;
}

/// 根据认证令牌创建 [`PresenceClient`]。
#[async_trait]
pub trait PresenceClientFactory: Send + Sync {
    /// 为给定令牌建立一条新连接。
    async fn create(&self, token: &str) -> Result<Arc<dyn PresenceClient>>;
}

/// 尽力而为的封面解析器，例如把封面上传到图床并缓存得到的 URL。
///
/// 解析受超时约束，失败只会被记录，永远不会阻止更新。
#[async_trait]
pub trait ArtworkResolver: Send + Sync {
    /// 为曲目解析（并缓存）封面。
    async fn resolve(&self, track: &Track) -> Result<()>;

    /// 返回之前解析好的封面 URL。构建活动时优先于 `Track::artwork_url` 使用。
    fn cached_artwork(&self, _track: &Track) -> Option<String> {
        None
    }
}

/// 不做任何事情的封面解析器。
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopArtworkResolver;

#[async_trait]
impl ArtworkResolver for NoopArtworkResolver {
    async fn resolve(&self, _track: &Track) -> Result<()> {
        Ok(())
    }
}

/// 播放快照的来源。
///
/// 只会在宿主的主上下文中被调用（见 [`crate::PrimaryContext`]）。
pub trait SnapshotSource: Send + Sync {
    /// 读取一份新的播放快照。
    fn snapshot(&self) -> PlaybackSnapshot;
}

/// 返回当前曲目的回调。
pub type SongProvider = Arc<dyn Fn() -> Option<Track> + Send + Sync>;
/// 返回当前播放位置（毫秒）的回调。
pub type PositionProvider = Arc<dyn Fn() -> i64 + Send + Sync>;
/// 返回是否暂停的回调。
pub type PausedProvider = Arc<dyn Fn() -> bool + Send + Sync>;
/// 返回轮询间隔（毫秒）的回调。每轮都会重新求值，`<= 0` 表示停止轮询。
pub type IntervalProvider = Arc<dyn Fn() -> i64 + Send + Sync>;

/// 由三个访问回调组成的 [`SnapshotSource`]。
#[derive(Clone)]
pub struct CallbackSnapshotSource {
    song: SongProvider,
    position: PositionProvider,
    paused: PausedProvider,
}

impl CallbackSnapshotSource {
    /// 用三个访问回调创建快照来源。
    pub fn new(song: SongProvider, position: PositionProvider, paused: PausedProvider) -> Self {
        Self {
            song,
            position,
            paused,
        }
    }
}

impl SnapshotSource for CallbackSnapshotSource {
    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            track: (self.song)(),
            position_ms: (self.position)(),
            paused: (self.paused)(),
        }
    }
}

/// `start()` 时传入的参数，会被原样保存以供 `restart()` 复用。
#[derive(Clone)]
pub struct StartParameters {
    /// 富状态服务的认证令牌。
    pub token: String,
    /// 播放快照来源。
    pub source: Arc<dyn SnapshotSource>,
    /// 轮询间隔（毫秒）。
    pub interval: IntervalProvider,
}

impl StartParameters {
    /// 直接使用一个 [`SnapshotSource`] 创建启动参数。
    pub fn new(
        token: impl Into<String>,
        source: Arc<dyn SnapshotSource>,
        interval: IntervalProvider,
    ) -> Self {
        Self {
            token: token.into(),
            source,
            interval,
        }
    }

    /// 使用宿主提供的三个访问回调创建启动参数。
    pub fn from_callbacks(
        token: impl Into<String>,
        song: SongProvider,
        position: PositionProvider,
        paused: PausedProvider,
        interval: IntervalProvider,
    ) -> Self {
        let source = CallbackSnapshotSource::new(song, position, paused);
        Self::new(token, Arc::new(source), interval)
    }
}

impl std::fmt::Debug for StartParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartParameters")
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artist_names_skips_blank_entries() {
        let track = Track {
            artists: vec![
                ArtistRef {
                    id: None,
                    name: "Stellardrone".into(),
                },
                ArtistRef {
                    id: None,
                    name: "  ".into(),
                },
                ArtistRef {
                    id: Some("a2".into()),
                    name: " Hammock ".into(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(track.artist_names(), "Stellardrone, Hammock");
    }

    #[test]
    fn test_callback_source_reads_every_provider() {
        let track = Track {
            id: "t1".into(),
            title: "Solaris".into(),
            duration_ms: 240_000,
            ..Default::default()
        };
        let song_track = track.clone();
        let params = StartParameters::from_callbacks(
            "token",
            Arc::new(move || Some(song_track.clone())),
            Arc::new(|| 1_500),
            Arc::new(|| true),
            Arc::new(|| 1_000),
        );

        let snapshot = params.source.snapshot();
        assert_eq!(snapshot.track, Some(track));
        assert_eq!(snapshot.position_ms, 1_500);
        assert!(snapshot.paused);
        assert_eq!((params.interval)(), 1_000);
    }

    #[test]
    fn test_payload_json_omits_empty_fields() {
        let payload = ActivityPayload {
            name: "Music".into(),
            details: Some("Solaris".into()),
            ..Default::default()
        };
        let json = payload.to_json().unwrap();
        assert_eq!(json, r#"{"name":"Music","type":"listening","details":"Solaris"}"#);
    }
}
