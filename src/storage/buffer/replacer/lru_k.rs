use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// Access history for a single frame: the counters of its last <= k accesses,
/// oldest first, plus the evictability flag.
struct LruKNode {
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            evictable: false,
        }
    }

    /// Earliest recorded access counter. For a frame with exactly k recorded
    /// accesses this is also the k-th most recent access, which is what the
    /// backward k-distance comparison needs.
    fn earliest(&self) -> u64 {
        *self.history.front().expect("access history is never empty")
    }
}

struct LruKInner {
    nodes: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// LRU-K page replacement policy.
///
/// The backward k-distance of a frame is the difference between the current
/// access counter and the counter of its k-th most recent access, or infinity
/// if the frame has fewer than k recorded accesses. Eviction picks the frame
/// with the largest distance; infinite-distance frames are preferred and tie
/// broken by their earliest recorded access.
pub struct LruKReplacer {
    inner: Mutex<LruKInner>,
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "replacer k must be positive");
        Self {
            inner: Mutex::new(LruKInner {
                nodes: HashMap::new(),
                current_timestamp: 0,
                evictable_count: 0,
            }),
            replacer_size: num_frames,
            k,
        }
    }

    /// Record an access to the given frame at the current timestamp.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range for this replacer.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        assert!(frame_id < self.replacer_size, "invalid frame id {}", frame_id);

        let timestamp = inner.current_timestamp;
        inner.current_timestamp += 1;

        let node = inner.nodes.entry(frame_id).or_insert_with(LruKNode::new);
        if node.history.len() == self.k {
            node.history.pop_front();
        }
        node.history.push_back(timestamp);
    }

    /// Flip the evictability of a frame, adjusting the evictable count.
    /// Unknown frames and unchanged flags are no-ops.
    ///
    /// # Panics
    ///
    /// Panics if `frame_id` is out of range for this replacer.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        assert!(frame_id < self.replacer_size, "invalid frame id {}", frame_id);

        let node = match inner.nodes.get_mut(&frame_id) {
            Some(node) => node,
            None => return,
        };
        if node.evictable == evictable {
            return;
        }
        node.evictable = evictable;
        if evictable {
            inner.evictable_count += 1;
        } else {
            inner.evictable_count -= 1;
        }
    }

    /// Select and remove the eviction victim, if any frame is evictable.
    ///
    /// Frames with fewer than k accesses (infinite backward distance) win
    /// over frames with a full history; ties on either side go to the frame
    /// with the earliest recorded access counter.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        // (earliest counter, frame) per class; None = class empty
        let mut short_history: Option<(u64, FrameId)> = None;
        let mut full_history: Option<(u64, FrameId)> = None;

        for (&frame_id, node) in &inner.nodes {
            if !node.evictable {
                continue;
            }
            let candidate = (node.earliest(), frame_id);
            let slot = if node.history.len() < self.k {
                &mut short_history
            } else {
                &mut full_history
            };
            match slot {
                Some(best) if best.0 <= candidate.0 => {}
                _ => *slot = Some(candidate),
            }
        }

        let (_, victim) = short_history.or(full_history)?;
        let node = inner.nodes.remove(&victim).expect("victim must be tracked");
        debug_assert!(node.evictable);
        inner.evictable_count -= 1;
        log::trace!("lru-k evicting frame {}", victim);
        Some(victim)
    }

    /// Unconditionally remove a frame's access history. Unknown frames are a
    /// no-op.
    ///
    /// # Panics
    ///
    /// Panics if the frame is tracked but not evictable, or if `frame_id` is
    /// out of range.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        assert!(frame_id < self.replacer_size, "invalid frame id {}", frame_id);

        if let Some(node) = inner.nodes.remove(&frame_id) {
            assert!(node.evictable, "frame {} is not evictable", frame_id);
            inner.evictable_count -= 1;
        }
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evict_prefers_infinite_distance() {
        let replacer = LruKReplacer::new(7, 2);

        // Frames 1 and 2 get two accesses each, frame 3 only one.
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.record_access(3);
        replacer.record_access(1);
        replacer.record_access(2);
        for frame in [1, 2, 3] {
            replacer.set_evictable(frame, true);
        }
        assert_eq!(replacer.size(), 3);

        // Frame 3 has infinite backward distance and goes first.
        assert_eq!(replacer.evict(), Some(3));
        // Among full histories, frame 1 has the earlier second-latest access.
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_infinite_distance_ties_break_on_earliest_access() {
        let replacer = LruKReplacer::new(4, 3);

        replacer.record_access(0);
        replacer.record_access(1);
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        // Both have < 3 accesses; frame 0 was first touched earlier.
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_pinned_frames_are_skipped() {
        let replacer = LruKReplacer::new(3, 2);

        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, false);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_evicted_frame_stays_gone_until_new_access() {
        let replacer = LruKReplacer::new(2, 2);

        replacer.record_access(0);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));

        // The record was erased with the eviction; the flag flip is a no-op.
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), None);

        replacer.record_access(0);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_remove_unknown_frame_is_noop() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.remove(1);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    #[should_panic(expected = "invalid frame id")]
    fn test_out_of_range_frame_panics() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(2);
    }

    #[test]
    #[should_panic(expected = "not evictable")]
    fn test_remove_pinned_frame_panics() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(0);
        replacer.remove(0);
    }

    #[test]
    fn test_history_is_bounded_by_k() {
        let replacer = LruKReplacer::new(3, 2);

        // Frame 0 accessed many times early, frame 1 twice late. With k = 2
        // only the last two accesses count, so frame 0's distance is larger.
        for _ in 0..5 {
            replacer.record_access(0);
        }
        replacer.record_access(1);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.evict(), Some(0));
    }
}
