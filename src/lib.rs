#![warn(missing_docs)]

//! 一个将本地播放状态同步到第三方富状态 (Rich Presence) 服务的 Rust 库。
//!
//! `presence-sync` 在后台周期性地读取播放器的状态（当前曲目、播放进度、是否暂停），
//! 并通过一条长连接把它镜像到富状态服务上。
//!
//! ## 核心功能
//!
//! * **互斥更新**: 所有对富状态客户端的调用都经过同一把锁，定时更新和手动刷新不会交错。
//! * **连接管理**: 同一令牌复用连接；令牌变化时旧连接会被清除并关闭，错误被安全吸收。
//! * **尽力而为的封面解析**: 每次更新前解析封面，带超时，永远不会阻塞或打断更新。
//! * **受控重启**: 重启受冷却时间和连续失败次数两道闸门限制，避免重启风暴。
//! * **主上下文读取**: 播放状态只在宿主的主上下文（UI 线程）中读取，网络更新在后台执行。
//!
//! ## 使用方法
//!
//! 1.  实现 [`PresenceClientFactory`] 和 [`PresenceClient`]，封装具体的富状态协议。
//! 2.  用 [`PresenceCoordinator::new`] 创建协调器，并交给管理播放器生命周期的组件持有。
//! 3.  调用 [`PresenceCoordinator::start`]，传入宿主环境 [`HostContext`] 和 [`StartParameters`]。
//! 4.  在宿主拆除时调用 [`PresenceCoordinator::stop`]，或通过 [`ProcessLifecycle::destroy`]
//!     触发自动注册的销毁钩子。
//!
//! ## 示例
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use presence_sync::{
//!     ActivityPayload, HostContext, InlineContext, NoopArtworkResolver, PresenceClient,
//!     PresenceClientFactory, PresenceConfig, PresenceCoordinator, ProcessLifecycle, Result,
//!     StartParameters,
//! };
//!
//! struct LogClient;
//!
//! #[async_trait]
//! impl PresenceClient for LogClient {
//!     async fn set_activity(&self, payload: &ActivityPayload) -> Result<()> {
//!         println!("活动: {:?}", payload.details);
//!         Ok(())
//!     }
//!     async fn clear_activity(&self) -> Result<()> {
//!         Ok(())
//!     }
//!     async fn close(&self) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! struct LogFactory;
//!
//! #[async_trait]
//! impl PresenceClientFactory for LogFactory {
//!     async fn create(&self, _token: &str) -> Result<Arc<dyn PresenceClient>> {
//!         Ok(Arc::new(LogClient))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = PresenceCoordinator::new(
//!         Arc::new(LogFactory),
//!         Arc::new(NoopArtworkResolver),
//!         PresenceConfig::default(),
//!     );
//!
//!     let lifecycle = Arc::new(ProcessLifecycle::new());
//!     let context = HostContext::new(Arc::new(InlineContext), lifecycle.clone());
//!
//!     coordinator.start(
//!         context,
//!         StartParameters::from_callbacks(
//!             "my-token",
//!             Arc::new(|| None),
//!             Arc::new(|| 0),
//!             Arc::new(|| false),
//!             Arc::new(|| 15_000),
//!         ),
//!     )?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!
//!     // 宿主销毁时，注册的钩子会自动调用 stop()。
//!     lifecycle.destroy();
//!     Ok(())
//! }
//! ```

mod api;
mod config;
mod connection;
mod context;
mod coordinator;
mod error;
mod failure;
mod tasks;
mod updater;
mod utils;
mod worker;

pub use api::{
    ActivityButton, ActivityPayload, ActivityTimestamps, ActivityType, AlbumRef, ArtistRef,
    ArtworkResolver, CallbackSnapshotSource, IntervalProvider, NoopArtworkResolver,
    PausedProvider, PlaybackSnapshot, PositionProvider, PresenceClient, PresenceClientFactory,
    SnapshotSource, SongProvider, StartParameters, TimestampEstimate, Track,
};
pub use config::{
    DEFAULT_ARTWORK_TIMEOUT_MS, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_RESTART_COOLDOWN_MS,
    PresenceConfig,
};
pub use context::{
    DestroyHook, HookId, HostContext, HostLifecycle, InlineContext, MainContextJob,
    MainContextPump, MainContextQueue, PrimaryContext, ProcessLifecycle,
};
pub use coordinator::PresenceCoordinator;
pub use error::{PresenceError, Result};
pub use utils::MAX_ACTIVITY_TEXT_CHARS;
