//! Special-user allow-list
//!
//! Viewers on this list enroll into the guard line until their grant expires.
//! Expired grants are evicted lazily, when the viewer is next looked up.

use crate::entry::OpenId;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One allow-list grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialUserEntry {
    /// Unix timestamp (seconds) after which the grant no longer applies
    pub expires_at: i64,
    pub user_name: String,
}

impl SpecialUserEntry {
    pub fn new(user_name: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: expires_at.timestamp(),
            user_name: user_name.into(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now.timestamp()
    }

    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }
}

/// Result of looking a viewer up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialLookup {
    /// Grant is present and current
    Valid(SpecialUserEntry),
    /// Grant was present but expired; it has been removed
    Evicted(SpecialUserEntry),
    /// Not on the list
    Absent,
}

/// Allow-list keyed by OpenID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecialUsers {
    users: BTreeMap<OpenId, SpecialUserEntry>,
}

impl SpecialUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Add or replace a grant
    pub fn grant(
        &mut self,
        open_id: impl Into<String>,
        user_name: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Option<SpecialUserEntry> {
        self.users
            .insert(open_id.into(), SpecialUserEntry::new(user_name, expires_at))
    }

    pub fn revoke(&mut self, open_id: &str) -> Option<SpecialUserEntry> {
        self.users.remove(open_id)
    }

    /// Look a viewer up, evicting an expired grant
    pub fn lookup(&mut self, open_id: &str, now: DateTime<Utc>) -> SpecialLookup {
        let expired = match self.users.get(open_id) {
            None => return SpecialLookup::Absent,
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            self.users
                .remove(open_id)
                .map_or(SpecialLookup::Absent, SpecialLookup::Evicted)
        } else {
            self.users
                .get(open_id)
                .cloned()
                .map_or(SpecialLookup::Absent, SpecialLookup::Valid)
        }
    }

    /// Read-only check without eviction
    pub fn get(&self, open_id: &str) -> Option<&SpecialUserEntry> {
        self.users.get(open_id)
    }

    /// Drop every expired grant; returns how many were removed
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.users.len();
        self.users.retain(|_, entry| !entry.is_expired(now));
        before - self.users.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OpenId, &SpecialUserEntry)> {
        self.users.iter()
    }
}
