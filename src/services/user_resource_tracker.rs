//! Per-user concurrency and request-rate bookkeeping.
//!
//! Pure in-memory state with no synchronization of its own; the owning
//! [`super::ResourceGuard`] serializes every access.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Concurrent execution counts and request timestamps per user.
///
/// Invariant: no user maps to a zero count or an empty timestamp list.
#[derive(Debug, Default, Clone)]
pub struct UserResourceTracker {
    concurrent_executions: HashMap<String, usize>,
    request_timestamps: HashMap<String, Vec<DateTime<Utc>>>,
}

impl UserResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the user's concurrent count and return the new value.
    pub fn increment_concurrent(&mut self, user_id: &str) -> usize {
        let count = self
            .concurrent_executions
            .entry(user_id.to_string())
            .or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement the user's concurrent count, floored at zero.
    ///
    /// The entry is removed once it reaches zero.
    pub fn decrement_concurrent(&mut self, user_id: &str) -> usize {
        let Some(count) = self.concurrent_executions.get_mut(user_id) else {
            return 0;
        };

        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            self.concurrent_executions.remove(user_id);
        }
        remaining
    }

    pub fn concurrent_for(&self, user_id: &str) -> usize {
        self.concurrent_executions.get(user_id).copied().unwrap_or(0)
    }

    pub fn total_concurrent(&self) -> usize {
        self.concurrent_executions.values().sum()
    }

    /// Users with at least one running execution.
    pub fn active_users(&self) -> usize {
        self.concurrent_executions.len()
    }

    pub fn add_request_timestamp(&mut self, user_id: &str, at: DateTime<Utc>) {
        self.request_timestamps
            .entry(user_id.to_string())
            .or_default()
            .push(at);
    }

    /// Keep only timestamps newer than `cutoff`, dropping users left with none.
    pub fn cleanup_old_timestamps(&mut self, cutoff: DateTime<Utc>) {
        self.request_timestamps.retain(|_, timestamps| {
            timestamps.retain(|t| *t > cutoff);
            !timestamps.is_empty()
        });
    }

    /// Timestamps newer than `cutoff` for the user.
    pub fn get_recent_request_count(&self, user_id: &str, cutoff: DateTime<Utc>) -> usize {
        self.request_timestamps
            .get(user_id)
            .map_or(0, |timestamps| timestamps.iter().filter(|t| **t > cutoff).count())
    }

    pub fn has_entries_for(&self, user_id: &str) -> bool {
        self.concurrent_executions.contains_key(user_id)
            || self.request_timestamps.contains_key(user_id)
    }

    /// Sorted copy of the per-user concurrency counts.
    pub fn concurrency_snapshot(&self) -> BTreeMap<String, usize> {
        self.concurrent_executions
            .iter()
            .map(|(user, count)| (user.clone(), *count))
            .collect()
    }

    /// Forget everything about one user.
    ///
    /// Returns the released concurrent count and the number of dropped timestamps.
    pub fn clear_user(&mut self, user_id: &str) -> (usize, usize) {
        let released = self.concurrent_executions.remove(user_id).unwrap_or(0);
        let timestamps = self
            .request_timestamps
            .remove(user_id)
            .map_or(0, |t| t.len());
        (released, timestamps)
    }

    /// Forget every user.
    ///
    /// Returns the number of users touched, released executions, and dropped timestamps.
    pub fn clear_all(&mut self) -> (usize, usize, usize) {
        let mut users: Vec<&String> = self.concurrent_executions.keys().collect();
        users.extend(self.request_timestamps.keys());
        users.sort();
        users.dedup();
        let user_count = users.len();

        let released = self.total_concurrent();
        let timestamps = self.request_timestamps.values().map(Vec::len).sum();

        self.concurrent_executions.clear();
        self.request_timestamps.clear();
        (user_count, released, timestamps)
    }
}
