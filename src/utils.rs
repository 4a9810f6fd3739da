use chrono::Utc;

/// 富状态服务对单个文本字段允许的最大字符数。
pub const MAX_ACTIVITY_TEXT_CHARS: usize = 128;

/// 当前 Unix 时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// 把任意文本整理为可以放进活动字段的形式。
///
/// - 去掉首尾空白，空文本返回 `None`。
/// - 超过 [`MAX_ACTIVITY_TEXT_CHARS`] 个字符时截断，并以 `…` 结尾。
///
/// 按字符而不是字节截断，避免把多字节字符切成两半。
pub fn activity_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.chars().count() <= MAX_ACTIVITY_TEXT_CHARS {
        return Some(trimmed.to_string());
    }

    let mut truncated: String = trimmed
        .chars()
        .take(MAX_ACTIVITY_TEXT_CHARS - 1)
        .collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push('…');
    Some(truncated)
}

/// 只接受 `http://` 或 `https://` 开头的图片链接，其余一律丢弃。
pub fn image_url(url: Option<&str>) -> Option<String> {
    let url = url?.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") {
        Some(url.to_string())
    } else {
        None
    }
}

/// 隐藏令牌的大部分内容，用于日志输出。
pub fn redact_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
