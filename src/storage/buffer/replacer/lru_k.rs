use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU-K page replacement policy.
///
/// Each tracked frame carries an evictable flag and the timestamps of its
/// last K accesses, drawn from a monotonic counter. The victim is the frame
/// with the largest backward K-distance: frames with fewer than K recorded
/// accesses have infinite distance and are preferred, tie-broken by their
/// oldest recorded access.
pub struct LruKReplacer {
    k: usize,
    num_frames: usize,
    state: Mutex<ReplacerState>,
}

struct ReplacerState {
    current_timestamp: u64,
    curr_size: usize,
    evictable: HashMap<FrameId, VecDeque<u64>>,
    pinned: HashMap<FrameId, VecDeque<u64>>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        Self {
            k,
            num_frames,
            state: Mutex::new(ReplacerState {
                current_timestamp: 0,
                curr_size: 0,
                evictable: HashMap::new(),
                pinned: HashMap::new(),
            }),
        }
    }

    /// Record an access to the frame, creating its entry on first access.
    /// The history is truncated to the last K timestamps.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        debug_assert!((frame_id as usize) < self.num_frames);

        let timestamp = state.current_timestamp;
        state.current_timestamp += 1;

        let state = &mut *state;
        let history = match state.evictable.get_mut(&frame_id) {
            Some(history) => history,
            None => state.pinned.entry(frame_id).or_default(),
        };
        history.push_back(timestamp);
        if history.len() > self.k {
            history.pop_front();
        }
    }

    /// Toggle the evictable flag, maintaining the evictable-frame count.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        debug_assert!((frame_id as usize) < self.num_frames);

        if evictable {
            if let Some(history) = state.pinned.remove(&frame_id) {
                state.evictable.insert(frame_id, history);
                state.curr_size += 1;
            }
        } else if let Some(history) = state.evictable.remove(&frame_id) {
            state.pinned.insert(frame_id, history);
            state.curr_size -= 1;
        }
    }

    /// Stop tracking the frame. The frame must be evictable or absent.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        debug_assert!(!state.pinned.contains_key(&frame_id));
        if state.evictable.remove(&frame_id).is_some() {
            state.curr_size -= 1;
        }
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }

    /// Choose and remove a victim among the evictable frames, or None if
    /// there is none.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();

        // full: earliest K-th-most-recent access; partial: fewer than K
        // accesses, infinite backward distance
        let mut full_victim: Option<(u64, FrameId)> = None;
        let mut partial_victim: Option<(u64, FrameId)> = None;
        for (&frame_id, history) in &state.evictable {
            let front = match history.front() {
                Some(&ts) => ts,
                None => continue,
            };
            if history.len() == self.k {
                if full_victim.map_or(true, |(ts, _)| front < ts) {
                    full_victim = Some((front, frame_id));
                }
            } else if partial_victim.map_or(true, |(ts, _)| front < ts) {
                partial_victim = Some((front, frame_id));
            }
        }

        let (_, victim) = partial_victim.or(full_victim)?;
        state.evictable.remove(&victim);
        state.curr_size -= 1;
        Some(victim)
    }
}
