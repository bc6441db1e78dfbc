//! Per-track capture bookkeeping.
//!
//! Each track id yields at most one capture for the whole video.

use std::collections::HashMap;

/// Lifecycle of one track id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Unseen,
    SeenNotCaptured,
    /// Terminal.
    Captured,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: TrackState,
    last_seen: u64,
}

/// Capture state for every track id seen so far.
#[derive(Debug, Default)]
pub struct TrackDeduper {
    tracks: HashMap<u32, Entry>,
    // 0 keeps every id until the end of the video
    ttl_frames: u64,
}

impl TrackDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget ids not seen for more than `ttl_frames` frames (see `evict_stale`).
    pub fn with_ttl(ttl_frames: u64) -> Self {
        Self {
            tracks: HashMap::new(),
            ttl_frames,
        }
    }

    pub fn state(&self, id: u32) -> TrackState {
        self.tracks
            .get(&id)
            .map(|e| e.state)
            .unwrap_or(TrackState::Unseen)
    }

    /// Record a sighting of `id` in frame `frame`.
    pub fn observe(&mut self, id: u32, frame: u64) -> TrackState {
        let entry = self.tracks.entry(id).or_insert(Entry {
            state: TrackState::SeenNotCaptured,
            last_seen: frame,
        });
        entry.last_seen = frame;
        entry.state
    }

    /// Observe `id` and fire the capture transition if `crossing` holds.
    ///
    /// Returns true exactly once per id: on the first crossing frame.
    pub fn should_capture(&mut self, id: u32, frame: u64, crossing: bool) -> bool {
        if self.observe(id, frame) != TrackState::SeenNotCaptured || !crossing {
            return false;
        }
        self.mark_captured(id);
        true
    }

    /// Force `id` into the terminal state.
    pub fn mark_captured(&mut self, id: u32) {
        if let Some(entry) = self.tracks.get_mut(&id) {
            entry.state = TrackState::Captured;
        }
    }

    /// Undo a capture that could not be persisted.
    pub fn rollback(&mut self, id: u32) {
        if let Some(entry) = self.tracks.get_mut(&id) {
            entry.state = TrackState::SeenNotCaptured;
        }
    }

    /// Drop ids idle for longer than the ttl. No-op when the ttl is 0.
    ///
    /// An evicted id that shows up again starts over as a new track.
    pub fn evict_stale(&mut self, frame: u64) -> usize {
        if self.ttl_frames == 0 {
            return 0;
        }
        let ttl = self.ttl_frames;
        let before = self.tracks.len();
        self.tracks
            .retain(|_, e| frame.saturating_sub(e.last_seen) <= ttl);
        before - self.tracks.len()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        let mut d = TrackDeduper::new();
        assert_eq!(d.state(4), TrackState::Unseen);
        assert!(!d.should_capture(4, 0, false));
        assert_eq!(d.state(4), TrackState::SeenNotCaptured);
        assert!(d.should_capture(4, 1, true));
        assert_eq!(d.state(4), TrackState::Captured);
    }

    #[test]
    fn captures_at_most_once_per_track() {
        let mut d = TrackDeduper::new();
        let captures = (0..50)
            .filter(|f| d.should_capture(1, *f, true))
            .count();
        assert_eq!(captures, 1);
        // other ids are independent
        assert!(d.should_capture(2, 51, true));
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn rollback_allows_a_retry() {
        let mut d = TrackDeduper::new();
        assert!(d.should_capture(3, 0, true));
        d.rollback(3);
        assert!(d.should_capture(3, 1, true));
    }

    #[test]
    fn no_eviction_by_default() {
        let mut d = TrackDeduper::new();
        d.observe(1, 0);
        assert_eq!(d.evict_stale(1_000_000), 0);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn stale_ids_are_evicted_with_ttl() {
        let mut d = TrackDeduper::with_ttl(10);
        assert!(d.should_capture(1, 0, true));
        d.observe(2, 15);
        assert_eq!(d.evict_stale(15), 1);
        assert_eq!(d.state(1), TrackState::Unseen);
        assert_eq!(d.state(2), TrackState::SeenNotCaptured);
    }
}
