//! Queue entry types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable per-viewer identity key
pub type OpenId = String;

/// Minor units per whole unit of the platform currency
pub const MINOR_UNIT_SCALE: u64 = 100;

/// Queue tier, listed in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Priority/guard line (FIFO)
    Guard,
    /// Gift line, ranked by cumulative gift value
    Gift,
    /// Common line (FIFO, capacity-bounded)
    Common,
}

impl Tier {
    /// All tiers in lookup priority order
    pub const ALL: [Tier; 3] = [Tier::Guard, Tier::Gift, Tier::Common];

    /// Numeric line type used by overlay clients
    pub fn code(self) -> u8 {
        match self {
            Tier::Guard => 0,
            Tier::Gift => 1,
            Tier::Common => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Guard => "guard",
            Tier::Gift => "gift",
            Tier::Common => "common",
        };
        f.write_str(name)
    }
}

/// RGB display color
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl LineColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Black is treated as "unset" by overlays
    pub fn is_unset(&self) -> bool {
        self.r == 0 && self.g == 0 && self.b == 0
    }
}

/// Anything held in a tier line
pub trait Keyed {
    fn open_id(&self) -> &str;
}

/// A viewer's position record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntry {
    pub open_id: OpenId,
    pub user_name: String,
    pub avatar: String,
    pub color: LineColor,
    pub is_online: bool,
}

impl QueueEntry {
    /// Create an entry; new entries start online
    pub fn new(
        open_id: impl Into<String>,
        user_name: impl Into<String>,
        avatar: impl Into<String>,
        color: LineColor,
    ) -> Self {
        Self {
            open_id: open_id.into(),
            user_name: user_name.into(),
            avatar: avatar.into(),
            color,
            is_online: true,
        }
    }
}

impl Keyed for QueueEntry {
    fn open_id(&self) -> &str {
        &self.open_id
    }
}

/// A gift line entry with its cumulative value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GiftQueueEntry {
    #[serde(flatten)]
    pub entry: QueueEntry,
    /// Cumulative gift value in minor units; never decreases while the entry exists
    pub value_minor: u64,
    /// Most recent qualifying gift
    pub gift_name: String,
}

impl GiftQueueEntry {
    pub fn new(entry: QueueEntry, value_minor: u64, gift_name: impl Into<String>) -> Self {
        Self {
            entry,
            value_minor,
            gift_name: gift_name.into(),
        }
    }

    /// Cumulative value as a decimal amount
    pub fn value(&self) -> f64 {
        self.value_minor as f64 / MINOR_UNIT_SCALE as f64
    }

    pub(crate) fn accrue(&mut self, amount_minor: u64, gift_name: &str) {
        self.value_minor = self.value_minor.saturating_add(amount_minor);
        self.gift_name = gift_name.to_string();
    }
}

impl Keyed for GiftQueueEntry {
    fn open_id(&self) -> &str {
        &self.entry.open_id
    }
}

/// Borrowed view of an entry from any tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryRef<'a> {
    Plain(&'a QueueEntry),
    Gift(&'a GiftQueueEntry),
}

impl EntryRef<'_> {
    pub fn base(&self) -> &QueueEntry {
        match self {
            EntryRef::Plain(entry) => entry,
            EntryRef::Gift(gift) => &gift.entry,
        }
    }

    pub fn to_owned_entry(&self) -> AnyEntry {
        match self {
            EntryRef::Plain(entry) => AnyEntry::Plain((*entry).clone()),
            EntryRef::Gift(gift) => AnyEntry::Gift((*gift).clone()),
        }
    }
}

/// Owned entry from any tier, as carried on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyEntry {
    Gift(GiftQueueEntry),
    Plain(QueueEntry),
}

impl AnyEntry {
    pub fn base(&self) -> &QueueEntry {
        match self {
            AnyEntry::Plain(entry) => entry,
            AnyEntry::Gift(gift) => &gift.entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_codes_and_display() {
        assert_eq!(Tier::Guard.code(), 0);
        assert_eq!(Tier::Gift.code(), 1);
        assert_eq!(Tier::Common.code(), 2);
        assert_eq!(Tier::Common.to_string(), "common");
        assert_eq!(serde_json::to_string(&Tier::Gift).unwrap(), "\"gift\"");
    }

    #[test]
    fn test_new_entry_is_online() {
        let entry = QueueEntry::new("u1", "Alice", "a.png", LineColor::new(1, 2, 3));
        assert!(entry.is_online);
        assert_eq!(entry.open_id(), "u1");
    }

    #[test]
    fn test_gift_value_is_decimal() {
        let entry = QueueEntry::new("u1", "Alice", "", LineColor::default());
        let mut gift = GiftQueueEntry::new(entry, 500, "rose");
        assert_eq!(gift.value(), 5.0);

        gift.accrue(250, "heart");
        assert_eq!(gift.value_minor, 750);
        assert_eq!(gift.value(), 7.5);
        assert_eq!(gift.gift_name, "heart");
    }

    #[test]
    fn test_gift_entry_wire_shape_is_flat() {
        let entry = QueueEntry::new("u1", "Alice", "", LineColor::default());
        let gift = GiftQueueEntry::new(entry, 100, "rose");
        let json = serde_json::to_value(&gift).unwrap();
        assert_eq!(json["open_id"], "u1");
        assert_eq!(json["value_minor"], 100);

        let any: AnyEntry = serde_json::from_value(json).unwrap();
        assert!(matches!(any, AnyEntry::Gift(_)));
    }

    #[test]
    fn test_color_unset() {
        assert!(LineColor::default().is_unset());
        assert!(!LineColor::new(0, 0, 1).is_unset());
    }
}
