//! Client-side gap detection and fill: tracks the last sequence number
//! seen and reconciles with `find_by_agent_since` when the stream skips
//! ahead.

use std::collections::HashSet;

use agent_core_common::AgentMessage;
use uuid::Uuid;

/// Sentinel sequence number for optimistic/local messages that never
/// advance `last_seq`.
pub const LOCAL_SENTINEL_SEQ: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapOutcome {
    /// The message was the expected next one; appended.
    Appended,
    /// The message was stale (`seq <= last_seq`) or a duplicate id; dropped.
    Dropped,
    /// A gap was detected; the caller should fetch `find_by_agent_since`
    /// up to (not including) the returned `since` and merge.
    Gap { since: i64 },
}

/// Tracks `last_seq` for one agent's subscriber and classifies each
/// arriving message.
pub struct GapTracker {
    last_seq: i64,
    seen_ids: HashSet<Uuid>,
}

impl GapTracker {
    pub fn new() -> Self {
        Self {
            last_seq: 0,
            seen_ids: HashSet::new(),
        }
    }

    pub fn last_seq(&self) -> i64 {
        self.last_seq
    }

    /// Classifies `message` against the tracker's current state. Does
    /// not mutate `last_seq` on `Gap` — call `merge` once the caller has
    /// fetched and sorted the missing range.
    pub fn observe(&mut self, message: &AgentMessage) -> GapOutcome {
        if message.sequence_number == LOCAL_SENTINEL_SEQ {
            return GapOutcome::Appended;
        }

        if message.sequence_number <= self.last_seq || self.seen_ids.contains(&message.id) {
            return GapOutcome::Dropped;
        }

        if message.sequence_number == self.last_seq + 1 {
            self.last_seq = message.sequence_number;
            self.seen_ids.insert(message.id);
            return GapOutcome::Appended;
        }

        GapOutcome::Gap {
            since: self.last_seq,
        }
    }

    /// Merges a gap-fill batch (from `find_by_agent_since(agent_id,
    /// since)`) plus the message that triggered the gap, deduping by id
    /// and sorting by sequence number. Advances `last_seq` to the
    /// highest sequence number in the merged batch.
    pub fn merge(&mut self, mut fill: Vec<AgentMessage>, trigger: AgentMessage) -> Vec<AgentMessage> {
        fill.push(trigger);
        fill.sort_by_key(|m| m.sequence_number);
        fill.dedup_by_key(|m| m.id);

        for message in &fill {
            if message.sequence_number > self.last_seq {
                self.last_seq = message.sequence_number;
            }
            self.seen_ids.insert(message.id);
        }

        fill
    }
}

impl Default for GapTracker {
    fn default() -> Self {
        Self::new()
    }
}
