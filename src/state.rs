//! Three-tier queue state with identity indexes
//!
//! A [`TierLine`] keeps an ordered sequence together with its `OpenId -> position`
//! index. Positions are 1-based: the entry at array slot `i` is indexed as `i + 1`.
//! Every structural change rebuilds the whole index for that tier.
//!
//! [`QueueState`] holds the guard, gift and common lines. Its mutation methods
//! validate first and mutate second, so any error leaves all three tiers as they
//! were. Each successful mutation returns the [`SyncEvent`] describing it.

use crate::entry::{
    AnyEntry, EntryRef, GiftQueueEntry, Keyed, LineColor, OpenId, QueueEntry, Tier,
};
use crate::error::{QueueError, Result};
use crate::event::SyncEvent;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use tracing::{error, warn};

/// An ordered line and its identity index, mutated only as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierLine<T> {
    entries: Vec<T>,
    index: HashMap<OpenId, usize>,
}

impl<T> Default for TierLine<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Keyed + Clone> TierLine<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in line order
    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    /// Raw 1-based index value, if the id is indexed
    pub fn indexed(&self, open_id: &str) -> Option<usize> {
        self.index.get(open_id).copied().filter(|&i| i != 0)
    }

    pub fn contains(&self, open_id: &str) -> bool {
        self.indexed(open_id).is_some()
    }

    pub fn get(&self, open_id: &str) -> Option<&T> {
        let idx = self.indexed(open_id)?;
        self.entries
            .get(idx - 1)
            .filter(|entry| entry.open_id() == open_id)
    }

    pub fn front(&self) -> Option<&T> {
        self.entries.first()
    }

    /// Resolve an id to its zero-based slot, rejecting stale indexes
    fn slot(&self, tier: Tier, open_id: &str) -> Result<usize> {
        let idx = self
            .indexed(open_id)
            .ok_or_else(|| QueueError::NotFound(open_id.to_string()))?;
        match self.entries.get(idx - 1) {
            Some(entry) if entry.open_id() == open_id => Ok(idx - 1),
            _ => {
                error!(
                    tier = %tier,
                    index = idx,
                    len = self.entries.len(),
                    open_id = %open_id,
                    "stale tier index"
                );
                Err(QueueError::IndexOutOfRange {
                    tier,
                    index: idx,
                    len: self.entries.len(),
                    open_id: open_id.to_string(),
                })
            }
        }
    }

    /// Append and index; returns the new 1-based position
    fn push(&mut self, entry: T) -> usize {
        let id = entry.open_id().to_string();
        self.entries.push(entry);
        let position = self.entries.len();
        self.index.insert(id, position);
        position
    }

    fn remove_at(&mut self, slot: usize) -> T {
        let removed = self.entries.remove(slot);
        self.reindex();
        removed
    }

    fn get_mut_at(&mut self, slot: usize) -> &mut T {
        &mut self.entries[slot]
    }

    /// Rebuild the whole index from the sequence
    fn reindex(&mut self) {
        self.index.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            self.index.insert(entry.open_id().to_string(), i + 1);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Drop entries whose id is already in `seen`; returns how many were dropped
    fn dedup_against(&mut self, seen: &mut HashSet<OpenId>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| seen.insert(entry.open_id().to_string()));
        before - self.entries.len()
    }

    /// Every entry is indexed at its slot + 1 and nothing else is indexed
    pub fn is_consistent(&self) -> bool {
        let indexed = self.index.values().filter(|&&i| i != 0).count();
        indexed == self.entries.len()
            && self
                .entries
                .iter()
                .enumerate()
                .all(|(i, entry)| self.index.get(entry.open_id()) == Some(&(i + 1)))
    }
}

impl TierLine<GiftQueueEntry> {
    /// Stable sort by cumulative value, highest first, then reindex
    fn rank(&mut self) {
        self.entries
            .sort_by(|a, b| b.value_minor.cmp(&a.value_minor));
        self.reindex();
    }
}

/// Fields used when a gift creates a brand new gift line entry
#[derive(Debug, Clone, PartialEq)]
pub struct GiftDefaults {
    pub user_name: String,
    pub avatar: String,
    pub color: LineColor,
}

/// Where a viewer currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub tier: Tier,
    /// 1-based position within the tier
    pub position: usize,
    /// 1-based rank across all tiers (guard, then gift, then common)
    pub rank: usize,
}

/// The complete queue: guard, gift and common lines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    #[serde(default)]
    guard_line: TierLine<QueueEntry>,
    #[serde(default)]
    gift_line: TierLine<GiftQueueEntry>,
    #[serde(default)]
    common_line: TierLine<QueueEntry>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard_line(&self) -> &TierLine<QueueEntry> {
        &self.guard_line
    }

    pub fn gift_line(&self) -> &TierLine<GiftQueueEntry> {
        &self.gift_line
    }

    pub fn common_line(&self) -> &TierLine<QueueEntry> {
        &self.common_line
    }

    pub fn len(&self) -> usize {
        self.guard_line.len() + self.gift_line.len() + self.common_line.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tier_len(&self, tier: Tier) -> usize {
        match tier {
            Tier::Guard => self.guard_line.len(),
            Tier::Gift => self.gift_line.len(),
            Tier::Common => self.common_line.len(),
        }
    }

    /// The tier whose index holds this id, checked guard, gift, common
    pub fn tier_of(&self, open_id: &str) -> Option<Tier> {
        Tier::ALL
            .into_iter()
            .find(|&tier| self.indexed_in(tier, open_id).is_some())
    }

    pub fn contains(&self, open_id: &str) -> bool {
        self.tier_of(open_id).is_some()
    }

    fn indexed_in(&self, tier: Tier, open_id: &str) -> Option<usize> {
        match tier {
            Tier::Guard => self.guard_line.indexed(open_id),
            Tier::Gift => self.gift_line.indexed(open_id),
            Tier::Common => self.common_line.indexed(open_id),
        }
    }

    pub fn get(&self, open_id: &str) -> Option<EntryRef<'_>> {
        match self.tier_of(open_id)? {
            Tier::Guard => self.guard_line.get(open_id).map(EntryRef::Plain),
            Tier::Gift => self.gift_line.get(open_id).map(EntryRef::Gift),
            Tier::Common => self.common_line.get(open_id).map(EntryRef::Plain),
        }
    }

    /// Append an entry to a tier.
    ///
    /// Fails with `DuplicateEntry` if the id is indexed anywhere, and with
    /// `CapacityExceeded` when the common line already holds `common_capacity`.
    pub fn add(&mut self, tier: Tier, entry: AnyEntry, common_capacity: usize) -> Result<SyncEvent> {
        let open_id = entry.base().open_id.clone();
        if open_id.is_empty() {
            return Err(QueueError::InvalidOpenId);
        }
        if self.contains(&open_id) {
            return Err(QueueError::DuplicateEntry(open_id));
        }

        let (position, stored) = match tier {
            Tier::Guard => {
                let plain = into_plain(entry);
                let position = self.guard_line.push(plain.clone());
                (position, AnyEntry::Plain(plain))
            }
            Tier::Common => {
                if self.common_line.len() >= common_capacity {
                    return Err(QueueError::CapacityExceeded {
                        capacity: common_capacity,
                    });
                }
                let plain = into_plain(entry);
                let position = self.common_line.push(plain.clone());
                (position, AnyEntry::Plain(plain))
            }
            Tier::Gift => {
                let gift = match entry {
                    AnyEntry::Gift(gift) => gift,
                    AnyEntry::Plain(plain) => GiftQueueEntry::new(plain, 0, ""),
                };
                self.gift_line.push(gift.clone());
                self.gift_line.rank();
                let position = self.gift_line.indexed(&open_id).unwrap_or(0);
                (position, AnyEntry::Gift(gift))
            }
        };

        Ok(SyncEvent::Add {
            tier,
            position: position.saturating_sub(1),
            entry: stored,
        })
    }

    /// Remove a viewer from whichever tier holds them.
    ///
    /// The returned event carries the zero-based position the entry had before
    /// removal.
    pub fn delete(&mut self, open_id: &str) -> Result<SyncEvent> {
        if open_id.is_empty() {
            return Err(QueueError::InvalidOpenId);
        }
        let tier = self
            .tier_of(open_id)
            .ok_or_else(|| QueueError::NotFound(open_id.to_string()))?;

        let prior_position = match tier {
            Tier::Guard => {
                let slot = self.guard_line.slot(tier, open_id)?;
                self.guard_line.remove_at(slot);
                slot
            }
            Tier::Gift => {
                let slot = self.gift_line.slot(tier, open_id)?;
                self.gift_line.remove_at(slot);
                slot
            }
            Tier::Common => {
                let slot = self.common_line.slot(tier, open_id)?;
                self.common_line.remove_at(slot);
                slot
            }
        };

        Ok(SyncEvent::Delete {
            tier,
            prior_position,
            open_id: open_id.to_string(),
        })
    }

    /// Credit a paid gift to a viewer.
    ///
    /// Promotes the viewer out of the common line when present there, accrues
    /// onto an existing gift entry or creates one, then re-ranks the gift line.
    /// Guard-line viewers are already ahead of the gift line and are rejected
    /// with `DuplicateEntry`.
    pub fn increment_gift(
        &mut self,
        open_id: &str,
        amount_minor: u64,
        gift_name: &str,
        defaults: &GiftDefaults,
    ) -> Result<SyncEvent> {
        if open_id.is_empty() {
            return Err(QueueError::InvalidOpenId);
        }
        if self.guard_line.contains(open_id) {
            return Err(QueueError::DuplicateEntry(open_id.to_string()));
        }

        let common_slot = if self.common_line.contains(open_id) {
            Some(self.common_line.slot(Tier::Common, open_id)?)
        } else {
            None
        };
        let gift_slot = if self.gift_line.contains(open_id) {
            Some(self.gift_line.slot(Tier::Gift, open_id)?)
        } else {
            None
        };

        if let Some(slot) = common_slot {
            self.common_line.remove_at(slot);
        }

        match gift_slot {
            Some(slot) => self.gift_line.get_mut_at(slot).accrue(amount_minor, gift_name),
            None => {
                let entry = QueueEntry::new(
                    open_id,
                    defaults.user_name.clone(),
                    defaults.avatar.clone(),
                    defaults.color,
                );
                self.gift_line
                    .push(GiftQueueEntry::new(entry, amount_minor, gift_name));
            }
        }
        self.gift_line.rank();

        let slot = self.gift_line.slot(Tier::Gift, open_id)?;
        Ok(SyncEvent::Add {
            tier: Tier::Gift,
            position: slot,
            entry: AnyEntry::Gift(self.gift_line.entries()[slot].clone()),
        })
    }

    /// Flip the online flag of a queued viewer
    pub fn toggle_online(&mut self, open_id: &str) -> Result<SyncEvent> {
        let tier = self
            .tier_of(open_id)
            .ok_or_else(|| QueueError::NotFound(open_id.to_string()))?;

        let is_online = match tier {
            Tier::Guard => {
                let slot = self.guard_line.slot(tier, open_id)?;
                let entry = self.guard_line.get_mut_at(slot);
                entry.is_online = !entry.is_online;
                entry.is_online
            }
            Tier::Gift => {
                let slot = self.gift_line.slot(tier, open_id)?;
                let entry = &mut self.gift_line.get_mut_at(slot).entry;
                entry.is_online = !entry.is_online;
                entry.is_online
            }
            Tier::Common => {
                let slot = self.common_line.slot(tier, open_id)?;
                let entry = self.common_line.get_mut_at(slot);
                entry.is_online = !entry.is_online;
                entry.is_online
            }
        };

        Ok(SyncEvent::StateUpdate {
            tier,
            open_id: open_id.to_string(),
            is_online,
        })
    }

    /// Empty all three tiers and their indexes
    pub fn clear_all(&mut self) -> SyncEvent {
        self.guard_line.clear();
        self.gift_line.clear();
        self.common_line.clear();
        SyncEvent::ClearAll
    }

    /// Head-most entry across tiers, guard first
    pub fn first(&self) -> Result<EntryRef<'_>> {
        if let Some(entry) = self.guard_line.front() {
            return Ok(EntryRef::Plain(entry));
        }
        if let Some(entry) = self.gift_line.front() {
            return Ok(EntryRef::Gift(entry));
        }
        self.common_line
            .front()
            .map(EntryRef::Plain)
            .ok_or(QueueError::Empty)
    }

    pub fn locate(&self, open_id: &str) -> Option<Location> {
        let tier = self.tier_of(open_id)?;
        let position = match tier {
            Tier::Guard => self.guard_line.get(open_id).and(self.guard_line.indexed(open_id)),
            Tier::Gift => self.gift_line.get(open_id).and(self.gift_line.indexed(open_id)),
            Tier::Common => self.common_line.get(open_id).and(self.common_line.indexed(open_id)),
        }?;
        let ahead: usize = Tier::ALL
            .into_iter()
            .take_while(|&t| t != tier)
            .map(|t| self.tier_len(t))
            .sum();
        Some(Location {
            tier,
            position,
            rank: ahead + position,
        })
    }

    /// All indexes agree with their sequences and no id sits in two tiers
    pub fn is_consistent(&self) -> bool {
        let lines_ok = self.guard_line.is_consistent()
            && self.gift_line.is_consistent()
            && self.common_line.is_consistent();
        if !lines_ok {
            return false;
        }
        let mut seen = HashSet::new();
        self.guard_line
            .entries()
            .iter()
            .map(|e| e.open_id.as_str())
            .chain(self.gift_line.entries().iter().map(|e| e.entry.open_id.as_str()))
            .chain(self.common_line.entries().iter().map(|e| e.open_id.as_str()))
            .all(|id| seen.insert(id))
    }

    /// Rebuild every index from its sequence; returns true if anything was off.
    ///
    /// An id found in more than one place keeps only its first occurrence in
    /// tier priority order (guard, gift, common).
    pub fn repair(&mut self) -> bool {
        if self.is_consistent() {
            return false;
        }
        let mut seen = HashSet::new();
        let dropped = self.guard_line.dedup_against(&mut seen)
            + self.gift_line.dedup_against(&mut seen)
            + self.common_line.dedup_against(&mut seen);
        if dropped > 0 {
            warn!(dropped, "dropped duplicate queue entries");
        }
        self.guard_line.reindex();
        self.gift_line.rank();
        self.common_line.reindex();
        true
    }

    /// Cheap summary of everything a rendered view shows
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for entry in self.guard_line.entries() {
            entry.hash(&mut hasher);
        }
        0xfeu8.hash(&mut hasher);
        for entry in self.gift_line.entries() {
            entry.hash(&mut hasher);
        }
        0xffu8.hash(&mut hasher);
        for entry in self.common_line.entries() {
            entry.hash(&mut hasher);
        }
        hasher.finish()
    }
}

fn into_plain(entry: AnyEntry) -> QueueEntry {
    match entry {
        AnyEntry::Plain(plain) => plain,
        AnyEntry::Gift(gift) => gift.entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(id: &str) -> AnyEntry {
        AnyEntry::Plain(QueueEntry::new(id, id.to_uppercase(), "", LineColor::default()))
    }

    fn defaults(name: &str) -> GiftDefaults {
        GiftDefaults {
            user_name: name.to_string(),
            avatar: String::new(),
            color: LineColor::new(255, 0, 0),
        }
    }

    fn assert_indexes(state: &QueueState) {
        for (i, e) in state.guard_line().entries().iter().enumerate() {
            assert_eq!(state.guard_line().indexed(&e.open_id), Some(i + 1));
        }
        for (i, e) in state.gift_line().entries().iter().enumerate() {
            assert_eq!(state.gift_line().indexed(&e.entry.open_id), Some(i + 1));
        }
        for (i, e) in state.common_line().entries().iter().enumerate() {
            assert_eq!(state.common_line().indexed(&e.open_id), Some(i + 1));
        }
        assert!(state.is_consistent());
    }

    #[test]
    fn test_add_assigns_positions() {
        let mut state = QueueState::new();
        let event = state.add(Tier::Common, plain("a"), 10).unwrap();
        assert!(matches!(event, SyncEvent::Add { tier: Tier::Common, position: 0, .. }));
        state.add(Tier::Common, plain("b"), 10).unwrap();

        assert_eq!(state.common_line().indexed("a"), Some(1));
        assert_eq!(state.common_line().indexed("b"), Some(2));
        assert_indexes(&state);
    }

    #[test]
    fn test_add_rejects_duplicate_across_tiers() {
        let mut state = QueueState::new();
        state.add(Tier::Guard, plain("a"), 10).unwrap();
        let before = state.clone();

        let err = state.add(Tier::Common, plain("a"), 10).unwrap_err();
        assert_eq!(err, QueueError::DuplicateEntry("a".into()));
        assert_eq!(state, before);
    }

    #[test]
    fn test_add_common_capacity() {
        let mut state = QueueState::new();
        state.add(Tier::Common, plain("a"), 1).unwrap();
        let err = state.add(Tier::Common, plain("b"), 1).unwrap_err();
        assert_eq!(err, QueueError::CapacityExceeded { capacity: 1 });
        assert!(!state.contains("b"));

        // guard line is not capacity bounded
        state.add(Tier::Guard, plain("b"), 1).unwrap();
        assert_eq!(state.tier_of("b"), Some(Tier::Guard));
    }

    #[test]
    fn test_add_rejects_empty_id() {
        let mut state = QueueState::new();
        assert_eq!(
            state.add(Tier::Common, plain(""), 10).unwrap_err(),
            QueueError::InvalidOpenId
        );
    }

    #[test]
    fn test_delete_reports_prior_position_and_reindexes() {
        let mut state = QueueState::new();
        for id in ["a", "b", "c", "d"] {
            state.add(Tier::Common, plain(id), 10).unwrap();
        }

        let event = state.delete("b").unwrap();
        assert_eq!(
            event,
            SyncEvent::Delete {
                tier: Tier::Common,
                prior_position: 1,
                open_id: "b".into()
            }
        );
        let order: Vec<_> = state
            .common_line()
            .entries()
            .iter()
            .map(|e| e.open_id.as_str())
            .collect();
        assert_eq!(order, ["a", "c", "d"]);
        assert_indexes(&state);
    }

    #[test]
    fn test_delete_not_found_leaves_state_unchanged() {
        let mut state = QueueState::new();
        state.add(Tier::Guard, plain("g"), 10).unwrap();
        state.add(Tier::Common, plain("c"), 10).unwrap();
        state
            .increment_gift("x", 100, "rose", &defaults("X"))
            .unwrap();
        let before = serde_json::to_vec(&state).unwrap();

        let err = state.delete("missing").unwrap_err();
        assert_eq!(err, QueueError::NotFound("missing".into()));
        assert_eq!(serde_json::to_vec(&state).unwrap(), before);
    }

    #[test]
    fn test_delete_stale_index_is_rejected_without_mutation() {
        let json = serde_json::json!({
            "guard_line": {"entries": [], "index": {}},
            "gift_line": {"entries": [], "index": {}},
            "common_line": {
                "entries": [{"open_id": "a", "user_name": "A", "avatar": "", "color": {"r":0,"g":0,"b":0}, "is_online": true}],
                "index": {"a": 1, "ghost": 5}
            }
        });
        let mut state: QueueState = serde_json::from_value(json).unwrap();
        let before = state.clone();

        let err = state.delete("ghost").unwrap_err();
        assert!(matches!(
            err,
            QueueError::IndexOutOfRange { tier: Tier::Common, index: 5, len: 1, .. }
        ));
        assert_eq!(state, before);

        assert!(state.repair());
        assert!(!state.contains("ghost"));
        assert_indexes(&state);
    }

    fn stale_state() -> QueueState {
        let entry = |id: &str| {
            serde_json::json!({"open_id": id, "user_name": id, "avatar": "", "color": {"r":0,"g":0,"b":0}, "is_online": true})
        };
        let mut gift = entry("g");
        gift["value_minor"] = serde_json::json!(100);
        gift["gift_name"] = serde_json::json!("rose");
        let json = serde_json::json!({
            "guard_line": {"entries": [entry("p")], "index": {"p": 1, "pg": 4}},
            "gift_line": {"entries": [gift], "index": {"g": 1, "gs": 3}},
            "common_line": {"entries": [entry("a")], "index": {"a": 1, "ghost": 5}}
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_increment_gift_stale_index_leaves_state_unchanged() {
        let mut state = stale_state();
        let before = state.clone();
        let defaults = GiftDefaults {
            user_name: "X".into(),
            avatar: String::new(),
            color: LineColor::default(),
        };

        let err = state.increment_gift("ghost", 500, "rose", &defaults).unwrap_err();
        assert!(matches!(
            err,
            QueueError::IndexOutOfRange { tier: Tier::Common, index: 5, .. }
        ));
        assert_eq!(state, before);

        let err = state.increment_gift("gs", 500, "rose", &defaults).unwrap_err();
        assert!(matches!(
            err,
            QueueError::IndexOutOfRange { tier: Tier::Gift, index: 3, .. }
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn test_toggle_online_stale_index_leaves_state_unchanged() {
        let mut state = stale_state();
        let before = state.clone();

        for (id, tier) in [("pg", Tier::Guard), ("gs", Tier::Gift), ("ghost", Tier::Common)] {
            let err = state.toggle_online(id).unwrap_err();
            assert!(
                matches!(err, QueueError::IndexOutOfRange { tier: t, .. } if t == tier),
                "unexpected error for {}: {:?}",
                id,
                err
            );
            assert_eq!(state, before);
        }
    }

    #[test]
    fn test_repair_drops_cross_tier_duplicates() {
        let entry = |id: &str, name: &str| {
            serde_json::json!({"open_id": id, "user_name": name, "avatar": "", "color": {"r":0,"g":0,"b":0}, "is_online": true})
        };
        let mut gift = entry("b", "B-gift");
        gift["value_minor"] = serde_json::json!(100);
        gift["gift_name"] = serde_json::json!("rose");
        let json = serde_json::json!({
            "guard_line": {"entries": [entry("a", "A-guard")], "index": {"a": 1}},
            "gift_line": {"entries": [gift], "index": {"b": 1}},
            "common_line": {
                "entries": [entry("a", "A-common"), entry("b", "B-common"), entry("c", "C"), entry("c", "C-again")],
                "index": {"a": 1, "b": 2, "c": 3}
            }
        });
        let mut state: QueueState = serde_json::from_value(json).unwrap();
        assert!(!state.is_consistent());

        assert!(state.repair());
        assert!(state.is_consistent());
        assert_eq!(state.tier_of("a"), Some(Tier::Guard));
        assert_eq!(state.tier_of("b"), Some(Tier::Gift));
        assert_eq!(state.common_line().len(), 1);
        assert_eq!(state.common_line().get("c").unwrap().user_name, "C");
        assert_indexes(&state);

        state.delete("a").unwrap();
        assert!(!state.contains("a"));
    }

    #[test]
    fn test_random_add_delete_sequence_keeps_indexes() {
        let mut state = QueueState::new();
        let ids: Vec<String> = (0..12).map(|i| format!("u{}", i)).collect();
        for (step, id) in ids.iter().enumerate() {
            let tier = Tier::ALL[step % 3];
            state.add(tier, plain(id), 100).unwrap();
            assert_indexes(&state);
            if step % 4 == 3 {
                state.delete(&ids[step - 2]).unwrap();
                assert_indexes(&state);
            }
        }
        for id in &ids {
            let _ = state.delete(id);
            assert_indexes(&state);
        }
        assert!(state.is_empty());
    }

    #[test]
    fn test_increment_gift_accumulates() {
        let mut state = QueueState::new();
        for amount in [100, 250, 50] {
            state
                .increment_gift("a", amount, "rose", &defaults("A"))
                .unwrap();
        }
        let entry = state.gift_line().get("a").unwrap();
        assert_eq!(entry.value_minor, 400);
        assert_eq!(entry.value(), 4.0);
        assert_eq!(state.gift_line().len(), 1);
    }

    #[test]
    fn test_increment_gift_promotes_from_common() {
        let mut state = QueueState::new();
        state.add(Tier::Common, plain("a"), 10).unwrap();
        state.add(Tier::Common, plain("b"), 10).unwrap();

        let event = state
            .increment_gift("b", 500, "rocket", &defaults("B"))
            .unwrap();
        match event {
            SyncEvent::Add { tier, position, entry } => {
                assert_eq!(tier, Tier::Gift);
                assert_eq!(position, 0);
                assert!(matches!(entry, AnyEntry::Gift(ref g) if g.value_minor == 500));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(state.tier_of("b"), Some(Tier::Gift));
        assert_eq!(state.common_line().indexed("a"), Some(1));
        assert!(!state.common_line().contains("b"));
        assert_indexes(&state);
    }

    #[test]
    fn test_gift_line_sorted_and_stable() {
        let mut state = QueueState::new();
        state.increment_gift("a", 100, "g", &defaults("A")).unwrap();
        state.increment_gift("b", 100, "g", &defaults("B")).unwrap();
        state.increment_gift("c", 300, "g", &defaults("C")).unwrap();
        state.increment_gift("d", 100, "g", &defaults("D")).unwrap();
        // b catches up to c; it keeps its place behind c among equals
        state.increment_gift("b", 200, "g", &defaults("B")).unwrap();

        let order: Vec<_> = state
            .gift_line()
            .entries()
            .iter()
            .map(|e| e.entry.open_id.as_str())
            .collect();
        assert_eq!(order, ["c", "b", "a", "d"]);
        let values: Vec<_> = state.gift_line().entries().iter().map(|e| e.value_minor).collect();
        assert!(values.windows(2).all(|w| w[0] >= w[1]));
        assert_indexes(&state);
    }

    #[test]
    fn test_increment_gift_rejects_guard_viewer() {
        let mut state = QueueState::new();
        state.add(Tier::Guard, plain("g"), 10).unwrap();
        let before = state.clone();
        let err = state.increment_gift("g", 100, "rose", &defaults("G")).unwrap_err();
        assert_eq!(err, QueueError::DuplicateEntry("g".into()));
        assert_eq!(state, before);
    }

    #[test]
    fn test_toggle_online() {
        let mut state = QueueState::new();
        state.increment_gift("a", 100, "g", &defaults("A")).unwrap();

        let event = state.toggle_online("a").unwrap();
        assert_eq!(
            event,
            SyncEvent::StateUpdate {
                tier: Tier::Gift,
                open_id: "a".into(),
                is_online: false
            }
        );
        assert!(!state.gift_line().get("a").unwrap().entry.is_online);
        state.toggle_online("a").unwrap();
        assert!(state.gift_line().get("a").unwrap().entry.is_online);

        assert_eq!(
            state.toggle_online("zz").unwrap_err(),
            QueueError::NotFound("zz".into())
        );
    }

    #[test]
    fn test_clear_all_and_first() {
        let mut state = QueueState::new();
        assert_eq!(state.first().unwrap_err(), QueueError::Empty);

        state.add(Tier::Common, plain("c"), 10).unwrap();
        assert_eq!(state.first().unwrap().base().open_id, "c");
        state.increment_gift("g", 1, "g", &defaults("G")).unwrap();
        assert_eq!(state.first().unwrap().base().open_id, "g");
        state.add(Tier::Guard, plain("p"), 10).unwrap();
        assert_eq!(state.first().unwrap().base().open_id, "p");

        assert_eq!(state.clear_all(), SyncEvent::ClearAll);
        assert!(state.is_empty());
        assert!(!state.contains("p"));
        assert_eq!(state.first().unwrap_err(), QueueError::Empty);
    }

    #[test]
    fn test_locate_rank_spans_tiers() {
        let mut state = QueueState::new();
        state.add(Tier::Guard, plain("p"), 10).unwrap();
        state.increment_gift("g", 1, "g", &defaults("G")).unwrap();
        state.add(Tier::Common, plain("c1"), 10).unwrap();
        state.add(Tier::Common, plain("c2"), 10).unwrap();

        let loc = state.locate("c2").unwrap();
        assert_eq!(loc.tier, Tier::Common);
        assert_eq!(loc.position, 2);
        assert_eq!(loc.rank, 4);
        assert!(state.locate("nobody").is_none());
    }

    #[test]
    fn test_fingerprint_tracks_visible_changes() {
        let mut state = QueueState::new();
        let empty = state.fingerprint();
        state.add(Tier::Common, plain("a"), 10).unwrap();
        let one = state.fingerprint();
        assert_ne!(empty, one);

        state.toggle_online("a").unwrap();
        assert_ne!(one, state.fingerprint());
        state.toggle_online("a").unwrap();
        assert_eq!(one, state.fingerprint());
    }

    #[test]
    fn test_state_serialization_round_trip() {
        let mut state = QueueState::new();
        state.add(Tier::Guard, plain("p"), 10).unwrap();
        state.increment_gift("g", 1234, "rose", &defaults("G")).unwrap();
        state.add(Tier::Common, plain("c"), 10).unwrap();
        state.toggle_online("c").unwrap();

        let json = serde_json::to_string(&state).unwrap();
        let parsed: QueueState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
