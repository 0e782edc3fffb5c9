//! Queue configuration types
//!
//! [`QueueConfig`] is the user-scoped configuration document persisted next to
//! the queue state. [`EngineOptions`] holds runtime-only knobs for the engine's
//! background workers.

use crate::entry::LineColor;
use crate::error::{QueueError, Result};
use crate::retry::RetryPolicy;
use crate::special::SpecialUsers;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Characters that separate enrollment keywords in `line_key`
const KEYWORD_SEPARATORS: &[char] = &[
    '.', ',', '!', '！', '；', '：', '’', '"', '\'', '“', '”', '?', '？', ';', ':', '，', '。',
    '、', '-',
];

/// Split a keyword string on punctuation into the set of enrollment keywords
pub fn parse_keywords(line_key: &str) -> BTreeSet<String> {
    line_key
        .split(KEYWORD_SEPARATORS)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// User-scoped queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Credential for the live room connection
    pub id_code: String,
    pub guard_color: LineColor,
    pub gift_color: LineColor,
    pub common_color: LineColor,
    pub chat_color: LineColor,
    /// Enrollment keywords, punctuation separated
    pub line_key: String,
    pub cancel_keyword: String,
    pub locate_keyword: String,
    /// Chat prefix that forwards the rest of the message as a music request
    pub music_prefix: String,
    /// Common line capacity
    pub max_line_count: usize,
    /// Suppress all chat-triggered enrollment
    pub only_gift: bool,
    /// Paid gifts enroll into (or accrue on) the gift line
    pub auto_join_gift_line: bool,
    pub enable_music_server: bool,
    /// Display options, read by presentation surfaces only
    pub gift_price_display: bool,
    pub transparent_background: bool,
    pub current_queue_size_display: bool,
    pub chat_display_no_sleep: bool,
    pub scroll_interval: u32,
    pub auto_scroll_line: bool,
    pub special_users: SpecialUsers,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            id_code: String::new(),
            guard_color: LineColor::new(255, 215, 0),
            gift_color: LineColor::new(255, 64, 64),
            common_color: LineColor::new(0, 150, 255),
            chat_color: LineColor::new(255, 255, 255),
            line_key: "排队".to_string(),
            cancel_keyword: "取消排队".to_string(),
            locate_keyword: "我在哪".to_string(),
            music_prefix: "点歌 ".to_string(),
            max_line_count: 100,
            only_gift: false,
            auto_join_gift_line: true,
            enable_music_server: false,
            gift_price_display: true,
            transparent_background: false,
            current_queue_size_display: true,
            chat_display_no_sleep: false,
            scroll_interval: 2,
            auto_scroll_line: false,
            special_users: SpecialUsers::new(),
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set common line capacity (builder pattern)
    pub fn with_max_line_count(mut self, max: usize) -> Self {
        self.max_line_count = max;
        self
    }

    /// Set enrollment keywords (builder pattern)
    pub fn with_line_key(mut self, line_key: impl Into<String>) -> Self {
        self.line_key = line_key.into();
        self
    }

    /// Set gift-only mode (builder pattern)
    pub fn with_only_gift(mut self, only_gift: bool) -> Self {
        self.only_gift = only_gift;
        self
    }

    /// Set gift line auto-join (builder pattern)
    pub fn with_auto_join_gift_line(mut self, enabled: bool) -> Self {
        self.auto_join_gift_line = enabled;
        self
    }

    /// Enable the music request side channel (builder pattern)
    pub fn with_music_server(mut self, enabled: bool) -> Self {
        self.enable_music_server = enabled;
        self
    }

    /// Set the room credential (builder pattern)
    pub fn with_id_code(mut self, id_code: impl Into<String>) -> Self {
        self.id_code = id_code.into();
        self
    }

    /// Set the special-user allow-list (builder pattern)
    pub fn with_special_users(mut self, special_users: SpecialUsers) -> Self {
        self.special_users = special_users;
        self
    }

    pub fn keywords(&self) -> BTreeSet<String> {
        parse_keywords(&self.line_key)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cancel_keyword.is_empty() {
            return Err(QueueError::Config("cancel keyword must not be empty".into()));
        }
        if self.locate_keyword.is_empty() {
            return Err(QueueError::Config("locate keyword must not be empty".into()));
        }
        if !self.only_gift && self.keywords().is_empty() {
            return Err(QueueError::Config(
                "at least one enrollment keyword is required unless gift-only mode is on".into(),
            ));
        }
        Ok(())
    }
}

/// How queue state reaches storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    /// Save inside every mutating operation
    WriteThrough,
    /// Mark dirty and flush on a timer
    Interval(Duration),
    /// Never save automatically
    Manual,
}

/// Runtime options for the engine and its workers
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub persist_mode: PersistMode,
    /// Presentation refresh poll interval
    pub refresh_interval: Duration,
    /// Upstream heartbeat interval
    pub heartbeat_interval: Duration,
    /// Upstream reconnect backoff
    pub reconnect_policy: RetryPolicy,
    /// Capacity of the lossy chat display feed
    pub chat_feed_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            persist_mode: PersistMode::WriteThrough,
            refresh_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(10),
            reconnect_policy: RetryPolicy::reconnect(),
            chat_feed_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_default() {
        let config = QueueConfig::default();
        assert_eq!(config.max_line_count, 100);
        assert_eq!(config.cancel_keyword, "取消排队");
        assert_eq!(config.locate_keyword, "我在哪");
        assert!(config.auto_join_gift_line);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_keywords_splits_on_punctuation() {
        let keywords = parse_keywords("排队，上车!join; 1");
        assert!(keywords.contains("排队"));
        assert!(keywords.contains("上车"));
        assert!(keywords.contains("join"));
        assert!(keywords.contains(" 1"));
        assert_eq!(keywords.len(), 4);
        assert!(parse_keywords("，。、").is_empty());
    }

    #[test]
    fn test_builder_methods() {
        let config = QueueConfig::new()
            .with_max_line_count(2)
            .with_line_key("a,b")
            .with_only_gift(true)
            .with_auto_join_gift_line(false)
            .with_music_server(true)
            .with_id_code("CODE");
        assert_eq!(config.max_line_count, 2);
        assert_eq!(config.keywords().len(), 2);
        assert!(config.only_gift);
        assert!(!config.auto_join_gift_line);
        assert!(config.enable_music_server);
        assert_eq!(config.id_code, "CODE");
    }

    #[test]
    fn test_validate_rejects_missing_keywords() {
        let config = QueueConfig::new().with_line_key("，");
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
        assert!(config.with_only_gift(true).validate().is_ok());

        let mut config = QueueConfig::new();
        config.cancel_keyword.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: QueueConfig = serde_json::from_str(r#"{"max_line_count": 7}"#).unwrap();
        assert_eq!(config.max_line_count, 7);
        assert_eq!(config.line_key, "排队");
    }

    #[test]
    fn test_queue_config_serialization() {
        let mut config = QueueConfig::new().with_max_line_count(12);
        config
            .special_users
            .grant("u1", "Alice", chrono::Utc::now());
        let json = serde_json::to_string(&config).unwrap();
        let parsed: QueueConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_engine_options_default() {
        let options = EngineOptions::default();
        assert_eq!(options.persist_mode, PersistMode::WriteThrough);
        assert_eq!(options.refresh_interval, Duration::from_millis(500));
        assert_eq!(options.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(options.reconnect_policy.max_attempts, 3);
    }
}
