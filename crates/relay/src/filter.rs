//! Event filters for queries and subscriptions.

use crate::event::{EventKind, ProtocolEvent, TAG_GEOCELL};
use ridemesh_core::GeoCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Selects events by kind, tag, author and age.
///
/// Empty criteria match everything. Tag criteria match when the event carries
/// the key with any one of the listed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub kinds: Vec<EventKind>,
    pub tags: BTreeMap<String, Vec<String>>,
    pub authors: Vec<String>,
    /// Only events created at or after this time (ms)
    pub since: Option<u64>,
    /// Maximum number of events returned by a query, newest first
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn tag_any<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.tags.entry(key.into()).or_default();
        entry.extend(values.into_iter().map(Into::into));
        self
    }

    /// Restrict to the given geocells, typically a cell and its neighbours.
    pub fn geocells(self, cells: &[GeoCell]) -> Self {
        self.tag_any(TAG_GEOCELL, cells.iter().map(GeoCell::tag_value))
    }

    pub fn author(mut self, public_key: impl Into<String>) -> Self {
        self.authors.push(public_key.into());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event: &ProtocolEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.public_key) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        self.tags.iter().all(|(key, values)| {
            event
                .tag_values(key)
                .any(|v| values.iter().any(|wanted| wanted == v))
        })
    }
}
