//! Inbound event classification
//!
//! The live platform client hands the engine normalized chat and gift events.
//! [`Router`] decides what each one means for the queue without touching queue
//! state; the engine applies the resulting [`Route`].

use crate::config::QueueConfig;
use crate::entry::OpenId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A chat message from a viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub open_id: OpenId,
    pub user_name: String,
    #[serde(default)]
    pub avatar: String,
    pub message: String,
}

/// A gift sent by a viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftEvent {
    pub open_id: OpenId,
    pub user_name: String,
    #[serde(default)]
    pub avatar: String,
    pub gift_name: String,
    /// Price of one gift in minor currency units
    pub unit_price: u64,
    pub quantity: u64,
    /// Free gifts never enroll or accrue value
    pub paid: bool,
}

impl GiftEvent {
    /// Total value in minor units
    pub fn value_minor(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity)
    }
}

/// Normalized inbound event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    Chat(ChatEvent),
    Gift(GiftEvent),
}

impl InboundEvent {
    pub fn open_id(&self) -> &str {
        match self {
            InboundEvent::Chat(chat) => &chat.open_id,
            InboundEvent::Gift(gift) => &gift.open_id,
        }
    }
}

/// Why an event has no queue effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Chat text matches no enrollment keyword
    NoKeyword,
    /// Gift-only mode suppresses chat enrollment
    GiftOnly,
    /// Gift line auto-join is off
    GiftLineDisabled,
    /// Free gift
    Unpaid,
    /// Paid gift with no value
    ZeroValue,
}

/// What an inbound event asks of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Leave the queue
    Cancel,
    /// Ask for one's own position
    Locate,
    /// Join the guard or common line
    Enroll,
    /// Credit a paid gift
    Gift { value_minor: u64 },
    Ignore(IgnoreReason),
}

/// Stateless classifier built from the current configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Router {
    keywords: BTreeSet<String>,
    cancel_keyword: String,
    locate_keyword: String,
    music_prefix: String,
    only_gift: bool,
    auto_join_gift_line: bool,
    music_enabled: bool,
}

impl Router {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            keywords: config.keywords(),
            cancel_keyword: config.cancel_keyword.clone(),
            locate_keyword: config.locate_keyword.clone(),
            music_prefix: config.music_prefix.clone(),
            only_gift: config.only_gift,
            auto_join_gift_line: config.auto_join_gift_line,
            music_enabled: config.enable_music_server,
        }
    }

    pub fn classify(&self, event: &InboundEvent) -> Route {
        match event {
            InboundEvent::Chat(chat) => self.classify_chat(chat),
            InboundEvent::Gift(gift) => self.classify_gift(gift),
        }
    }

    /// Cancel and locate win over everything; gift-only mode then suppresses
    /// enrollment regardless of keyword.
    pub fn classify_chat(&self, chat: &ChatEvent) -> Route {
        let text = chat.message.as_str();
        if text == self.cancel_keyword {
            return Route::Cancel;
        }
        if text == self.locate_keyword {
            return Route::Locate;
        }
        if self.only_gift {
            return Route::Ignore(IgnoreReason::GiftOnly);
        }
        if !self.keywords.contains(text) {
            return Route::Ignore(IgnoreReason::NoKeyword);
        }
        Route::Enroll
    }

    pub fn classify_gift(&self, gift: &GiftEvent) -> Route {
        if !self.auto_join_gift_line {
            return Route::Ignore(IgnoreReason::GiftLineDisabled);
        }
        if !gift.paid {
            return Route::Ignore(IgnoreReason::Unpaid);
        }
        match gift.value_minor() {
            0 => Route::Ignore(IgnoreReason::ZeroValue),
            value_minor => Route::Gift { value_minor },
        }
    }

    /// Search keyword for the music side channel, if this chat requests one
    pub fn music_request<'a>(&self, chat: &'a ChatEvent) -> Option<&'a str> {
        if !self.music_enabled || self.music_prefix.is_empty() {
            return None;
        }
        chat.message
            .strip_prefix(self.music_prefix.as_str())
            .map(str::trim)
            .filter(|keyword| !keyword.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(message: &str) -> ChatEvent {
        ChatEvent {
            open_id: "u1".into(),
            user_name: "Alice".into(),
            avatar: String::new(),
            message: message.into(),
        }
    }

    fn gift(unit_price: u64, quantity: u64, paid: bool) -> GiftEvent {
        GiftEvent {
            open_id: "u1".into(),
            user_name: "Alice".into(),
            avatar: String::new(),
            gift_name: "rose".into(),
            unit_price,
            quantity,
            paid,
        }
    }

    #[test]
    fn test_chat_routes() {
        let router = Router::new(&QueueConfig::new().with_line_key("排队,join"));
        assert_eq!(router.classify_chat(&chat("取消排队")), Route::Cancel);
        assert_eq!(router.classify_chat(&chat("我在哪")), Route::Locate);
        assert_eq!(router.classify_chat(&chat("join")), Route::Enroll);
        assert_eq!(router.classify_chat(&chat("排队")), Route::Enroll);
        assert_eq!(
            router.classify_chat(&chat("hello")),
            Route::Ignore(IgnoreReason::NoKeyword)
        );
    }

    #[test]
    fn test_gift_only_mode_suppresses_enrollment() {
        let router = Router::new(&QueueConfig::new().with_only_gift(true));
        assert_eq!(
            router.classify_chat(&chat("排队")),
            Route::Ignore(IgnoreReason::GiftOnly)
        );
        // cancel and locate still work
        assert_eq!(router.classify_chat(&chat("取消排队")), Route::Cancel);
        assert_eq!(router.classify_chat(&chat("我在哪")), Route::Locate);
    }

    #[test]
    fn test_gift_routes() {
        let router = Router::new(&QueueConfig::new());
        assert_eq!(
            router.classify_gift(&gift(100, 5, true)),
            Route::Gift { value_minor: 500 }
        );
        assert_eq!(
            router.classify_gift(&gift(100, 5, false)),
            Route::Ignore(IgnoreReason::Unpaid)
        );
        assert_eq!(
            router.classify_gift(&gift(0, 5, true)),
            Route::Ignore(IgnoreReason::ZeroValue)
        );

        let disabled = Router::new(&QueueConfig::new().with_auto_join_gift_line(false));
        assert_eq!(
            disabled.classify_gift(&gift(100, 1, true)),
            Route::Ignore(IgnoreReason::GiftLineDisabled)
        );
    }

    #[test]
    fn test_music_request() {
        let router = Router::new(&QueueConfig::new().with_music_server(true));
        assert_eq!(router.music_request(&chat("点歌 晴天")), Some("晴天"));
        assert_eq!(router.music_request(&chat("点歌 ")), None);
        assert_eq!(router.music_request(&chat("排队")), None);

        let off = Router::new(&QueueConfig::new());
        assert_eq!(off.music_request(&chat("点歌 晴天")), None);
    }

    #[test]
    fn test_inbound_event_wire_shape() {
        let json = r#"{"kind":"gift","open_id":"u9","user_name":"Bob","gift_name":"rose","unit_price":100,"quantity":2,"paid":true}"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.open_id(), "u9");
        match event {
            InboundEvent::Gift(g) => assert_eq!(g.value_minor(), 200),
            other => panic!("unexpected {:?}", other),
        }
    }
}
