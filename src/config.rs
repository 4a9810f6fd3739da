use std::time::Duration;

use serde::Deserialize;

/// 封面解析的默认超时时长（毫秒）。
pub const DEFAULT_ARTWORK_TIMEOUT_MS: u64 = 8_000;
/// 两次自动重启之间的默认最短间隔（毫秒）。
pub const DEFAULT_RESTART_COOLDOWN_MS: u64 = 30_000;
/// 连续失败达到该次数后，自动重启将被拒绝。
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// 富状态同步的配置。
///
/// 所有字段都有默认值，宿主可以把它嵌入到自己的设置文件中，只覆盖需要的字段。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// 活动的名称，通常是播放器的名字。
    pub application_name: String,
    /// 封面解析的超时时长（毫秒）。
    pub artwork_timeout_ms: u64,
    /// 两次 `restart()` 之间的最短间隔（毫秒）。
    pub restart_cooldown_ms: u64,
    /// 连续失败次数达到此值后拒绝自动重启。
    pub max_consecutive_failures: u32,
    /// 曲目链接模板，`{id}` 会被替换为曲目 ID。为 `None` 时不生成按钮。
    pub track_url_template: Option<String>,
    /// 曲目链接按钮上的文字。
    pub button_label: String,
    /// 播放中时显示的小图标 URL。
    pub playing_icon: Option<String>,
    /// 暂停时显示的小图标 URL。
    pub paused_icon: Option<String>,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            application_name: "Music".to_string(),
            artwork_timeout_ms: DEFAULT_ARTWORK_TIMEOUT_MS,
            restart_cooldown_ms: DEFAULT_RESTART_COOLDOWN_MS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            track_url_template: None,
            button_label: "Listen".to_string(),
            playing_icon: None,
            paused_icon: None,
        }
    }
}

impl PresenceConfig {
    /// 封面解析的超时时长。
    pub fn artwork_timeout(&self) -> Duration {
        Duration::from_millis(self.artwork_timeout_ms)
    }

    /// 两次重启之间的冷却时长。
    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_millis(self.restart_cooldown_ms)
    }

    /// 根据模板生成曲目链接。
    pub fn track_url(&self, track_id: &str) -> Option<String> {
        let template = self.track_url_template.as_deref()?;
        if track_id.is_empty() {
            return None;
        }
        Some(template.replace("{id}", track_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: PresenceConfig = serde_json::from_str(
            r#"{ "application_name": "Rustle", "restart_cooldown_ms": 1000 }"#,
        )
        .unwrap();

        assert_eq!(config.application_name, "Rustle");
        assert_eq!(config.restart_cooldown(), Duration::from_secs(1));
        assert_eq!(config.artwork_timeout(), Duration::from_secs(8));
        assert_eq!(config.max_consecutive_failures, 3);
    }

    #[test]
    fn test_track_url_template() {
        let config = PresenceConfig {
            track_url_template: Some("https://music.example.com/watch?v={id}".into()),
            ..Default::default()
        };
        assert_eq!(
            config.track_url("abc123").as_deref(),
            Some("https://music.example.com/watch?v=abc123")
        );
        assert_eq!(config.track_url(""), None);
        assert_eq!(PresenceConfig::default().track_url("abc123"), None);
    }
}
