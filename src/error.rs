use std::time::Duration;

use thiserror::Error;

/// 定义库的统一错误枚举。
///
/// 所有错误都只会在库内部被记录和吸收，不会导致宿主进程崩溃；
/// 公共的更新接口只通过 `bool` 返回值报告结果。
#[derive(Debug, Error)]
pub enum PresenceError {
    /// 认证令牌为空（或仅包含空白字符）。
    ///
    /// 这是一个配置错误：更新会被直接短路，不会尝试建立连接，也不会计入失败次数。
    #[error("认证令牌为空")]
    BlankToken,

    /// 无法建立到富状态服务的连接。
    #[error("无法连接到富状态服务: {0}")]
    Connect(String),

    /// 客户端在发送或清除活动时报告了错误。
    #[error("富状态客户端调用失败: {0}")]
    Client(String),

    /// 封面解析超出了允许的等待时长。
    #[error("封面解析超时 (>{0:?})")]
    ArtworkTimeout(Duration),

    /// 封面解析器报告的错误。
    #[error("封面解析失败: {0}")]
    Artwork(String),

    /// 宿主的主上下文已关闭，无法再读取播放快照。
    #[error("宿主主上下文不可用，无法读取播放快照")]
    PrimaryContextUnavailable,

    /// 当前线程不在 Tokio 运行时中，且未通过 `with_runtime` 提供运行时句柄。
    #[error("找不到可用的 Tokio 运行时")]
    NoRuntime,

    /// 锁已被毒化。
    #[error("锁已被毒化: {0}")]
    MutexPoisoned(String),
}

impl PresenceError {
    /// 便捷构造一个 [`PresenceError::Client`]，供客户端实现者使用。
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }

    /// 便捷构造一个 [`PresenceError::Connect`]。
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }
}

impl<T> From<std::sync::PoisonError<T>> for PresenceError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PresenceError::MutexPoisoned(err.to_string())
    }
}

/// 本库统一的 `Result` 类型别名。
pub type Result<T> = std::result::Result<T, PresenceError>;
