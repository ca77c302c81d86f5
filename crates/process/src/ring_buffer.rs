//! Bounded in-memory history of normalized entries for one execution
//! (§4.C5). The durable source of truth is the store; this exists so a
//! newly-subscribed client can be handed recent history without a round
//! trip to disk.

use std::collections::VecDeque;

use ie_domain::NormalizedEntry;

pub struct RingBuffer {
    entries: VecDeque<NormalizedEntry>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: NormalizedEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tail(&self, n: usize) -> Vec<NormalizedEntry> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(start).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ie_domain::{EntryType, Metadata};

    fn entry(content: &str) -> NormalizedEntry {
        NormalizedEntry {
            entry_type: EntryType::AssistantMessage,
            content: content.to_string(),
            metadata: Metadata::new(),
            tool_call: None,
        }
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut buf = RingBuffer::new(2);
        buf.push(entry("a"));
        buf.push(entry("b"));
        buf.push(entry("c"));
        assert_eq!(buf.len(), 2);
        let tail = buf.tail(10);
        assert_eq!(tail[0].content, "b");
        assert_eq!(tail[1].content, "c");
    }

    #[test]
    fn tail_respects_requested_count() {
        let mut buf = RingBuffer::new(10);
        for c in ["a", "b", "c"] {
            buf.push(entry(c));
        }
        let tail = buf.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "b");
    }
}
