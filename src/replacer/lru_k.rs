use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::common::FrameId;

/// Access ticks retained per frame. The inline capacity covers the common
/// LRU-2 configuration without touching the heap.
type History = SmallVec<[u64; 2]>;

/// A thread-safe LRU-K frame replacer.
///
/// `LruKReplacer` ranks every evictable frame by its *backward K-distance*:
/// the time elapsed since the frame's K-th most recent access, measured on a
/// logical clock that advances once per recorded access. The frame with the
/// greatest distance is evicted first.
///
/// A frame with fewer than K recorded accesses has an infinite backward
/// K-distance and always outranks frames with a full history; among such
/// frames the victim is chosen by classical LRU on the first recorded
/// access.
///
/// Frames start out pinned. They enter the candidate set through
/// [`set_evictable`](Self::set_evictable) and leave it when pinned again,
/// evicted, or removed. All operations take `&self` and serialize on an
/// internal lock.
///
/// # Examples
///
/// ```rust
/// use bufcore::LruKReplacer;
///
/// let replacer = LruKReplacer::new(8, 2);
///
/// // Frame 0 is accessed twice, frame 1 once.
/// replacer.record_access(0);
/// replacer.record_access(1);
/// replacer.record_access(0);
///
/// replacer.set_evictable(0, true);
/// replacer.set_evictable(1, true);
///
/// // Frame 1 has fewer than 2 accesses, so it goes first.
/// assert_eq!(replacer.evict(), Some(1));
/// assert_eq!(replacer.evict(), Some(0));
/// assert_eq!(replacer.evict(), None);
/// ```
pub struct LruKReplacer {
    inner: Mutex<Inner>,
}

impl LruKReplacer {
    /// Creates a replacer for a pool of up to `capacity` frames, ranking
    /// victims by their `k`-th most recent access.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `k` is zero.
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(capacity >= 1, "capacity must be at least 1");
        assert!(k >= 1, "k must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                frames: HashMap::new(),
                tick: 0,
                evictable_count: 0,
                capacity,
                k,
            }),
        }
    }

    /// Records an access to `frame_id` at the current tick and advances the
    /// clock.
    ///
    /// The frame starts being tracked (pinned) on its first access. The
    /// evictable flag is not touched.
    pub fn record_access(&self, frame_id: FrameId) {
        self.inner.lock().record_access(frame_id);
    }

    /// Marks a tracked frame as evictable or pinned.
    ///
    /// Untracked frames are ignored. Re-asserting the current flag is a
    /// no-op.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.inner.lock().set_evictable(frame_id, evictable);
    }

    /// Drops `frame_id` from the replacer, erasing its access history.
    ///
    /// Only tracked, evictable frames are removed; calling this on a pinned
    /// frame is a caller error and leaves the frame untouched.
    pub fn remove(&self, frame_id: FrameId) {
        self.inner.lock().remove(frame_id);
    }

    /// Evicts the evictable frame with the greatest backward K-distance,
    /// erasing its history.
    ///
    /// Returns `None` when no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        self.inner.lock().evict()
    }

    /// Returns the number of frames currently evictable.
    pub fn evictable_count(&self) -> usize {
        self.inner.lock().evictable_count
    }

    /// Returns the maximum number of frames the replacer is sized for.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Returns the history length K used for ranking.
    pub fn k(&self) -> usize {
        self.inner.lock().k
    }
}

impl fmt::Debug for LruKReplacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruKReplacer")
            .field("capacity", &inner.capacity)
            .field("k", &inner.k)
            .field("tracked", &inner.frames.len())
            .field("evictable_count", &inner.evictable_count)
            .finish()
    }
}

struct Inner {
    frames: HashMap<FrameId, Frame>,
    tick: u64,
    evictable_count: usize,
    capacity: usize,
    k: usize,
}

/// Per-frame state. A tracked frame always has at least one recorded
/// access.
#[derive(Default)]
struct Frame {
    /// The most recent access ticks, oldest first. At most K are kept, so a
    /// saturated history starts at the K-th most recent access; an
    /// unsaturated one still starts at the frame's first access ever.
    history: History,
    evictable: bool,
}

/// Eviction rank of one evictable frame. Infinite K-distance always beats
/// finite.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Rank {
    /// Fewer than K accesses; classical LRU on the first recorded tick.
    Infinite { first_access: u64 },
    /// A full history; backward K-distance with the last access breaking
    /// ties.
    Finite { distance: u64, last_access: u64 },
}

impl Rank {
    fn outranks(self, other: Rank) -> bool {
        use Rank::*;
        match (self, other) {
            (Infinite { first_access: a }, Infinite { first_access: b }) => a < b,
            (Infinite { .. }, Finite { .. }) => true,
            (Finite { .. }, Infinite { .. }) => false,
            (
                Finite {
                    distance: a,
                    last_access: last_a,
                },
                Finite {
                    distance: b,
                    last_access: last_b,
                },
            ) => a > b || (a == b && last_a < last_b),
        }
    }
}

impl Inner {
    fn record_access(&mut self, frame_id: FrameId) {
        let frame = self.frames.entry(frame_id).or_default();
        if frame.history.len() == self.k {
            // Only the last K accesses take part in ranking.
            frame.history.remove(0);
        }
        frame.history.push(self.tick);
        self.tick += 1;
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(frame) = self.frames.get_mut(&frame_id) {
            if frame.evictable != evictable {
                frame.evictable = evictable;
                if evictable {
                    self.evictable_count += 1;
                } else {
                    self.evictable_count -= 1;
                }
                debug_assert!(self.evictable_count <= self.capacity);
            }
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(frame) = self.frames.get(&frame_id) {
            if frame.evictable {
                self.frames.remove(&frame_id);
                self.evictable_count -= 1;
            }
        }
    }

    fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, Rank)> = None;
        for (&frame_id, frame) in &self.frames {
            if !frame.evictable {
                continue;
            }
            let rank = self.rank(frame);
            let replace = match victim {
                None => true,
                Some((victim_id, victim_rank)) => {
                    // Equal ranks cannot happen while ticks are unique, but
                    // the frame-id order keeps selection deterministic.
                    rank.outranks(victim_rank) || (rank == victim_rank && frame_id < victim_id)
                }
            };
            if replace {
                victim = Some((frame_id, rank));
            }
        }

        let (frame_id, _) = victim?;
        self.frames.remove(&frame_id);
        self.evictable_count -= 1;
        Some(frame_id)
    }

    fn rank(&self, frame: &Frame) -> Rank {
        if frame.history.len() < self.k {
            Rank::Infinite {
                first_access: frame.history[0],
            }
        } else {
            Rank::Finite {
                distance: self.tick - frame.history[0],
                last_access: *frame.history.last().expect("history is never empty"),
            }
        }
    }
}

// Methods only available for testing.
#[cfg(test)]
impl LruKReplacer {
    /// Asserts the size equation and history monotonicity invariants.
    pub(crate) fn check_invariants(&self) {
        let inner = self.inner.lock();
        let evictable = inner.frames.values().filter(|f| f.evictable).count();
        assert_eq!(evictable, inner.evictable_count);

        let mut all_ticks = std::collections::HashSet::new();
        for frame in inner.frames.values() {
            assert!(!frame.history.is_empty());
            assert!(frame.history.len() <= inner.k);
            assert!(frame.history.windows(2).all(|pair| pair[0] < pair[1]));
            for &tick in &frame.history {
                assert!(tick < inner.tick);
                assert!(all_ticks.insert(tick), "tick recorded twice");
            }
        }
    }

    pub(crate) fn history_len(&self, frame_id: FrameId) -> Option<usize> {
        self.inner
            .lock()
            .frames
            .get(&frame_id)
            .map(|frame| frame.history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::LruKReplacer;

    #[test]
    fn evict_on_empty_returns_none() {
        let replacer = LruKReplacer::new(4, 2);
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.evictable_count(), 0);
    }

    #[test]
    #[should_panic(expected = "k must be at least 1")]
    fn zero_k_panics() {
        let _ = LruKReplacer::new(4, 0);
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn zero_capacity_panics() {
        let _ = LruKReplacer::new(0, 2);
    }

    #[test]
    fn accessors_report_configuration() {
        let replacer = LruKReplacer::new(16, 3);
        assert_eq!(replacer.capacity(), 16);
        assert_eq!(replacer.k(), 3);
    }

    // All frames below K accesses: classical LRU on the first access.
    #[test]
    fn short_histories_evict_in_lru_order() {
        let replacer = LruKReplacer::new(4, 2);
        for frame_id in 1..=3 {
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, true);
        }
        assert_eq!(replacer.evictable_count(), 3);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evictable_count(), 2);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), None);
        replacer.check_invariants();
    }

    // Access order 1, 2, 1, 2, 3, 1 with K = 2. Frame 3 has a single access
    // and goes first; frames 2 and 1 follow by backward K-distance (5 vs 4).
    #[test]
    fn full_histories_evict_by_k_distance() {
        let replacer = LruKReplacer::new(4, 2);
        for frame_id in [1, 2, 1, 2, 3, 1] {
            replacer.record_access(frame_id);
        }
        for frame_id in 1..=3 {
            replacer.set_evictable(frame_id, true);
        }

        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(1));
        replacer.check_invariants();
    }

    #[test]
    fn pinned_frames_are_skipped() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(7);
        replacer.set_evictable(7, false);
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(7, true);
        assert_eq!(replacer.evict(), Some(7));
    }

    #[test]
    fn set_evictable_is_idempotent() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(1);
        replacer.set_evictable(1, true);
        replacer.set_evictable(1, true);
        assert_eq!(replacer.evictable_count(), 1);

        replacer.set_evictable(1, false);
        replacer.set_evictable(1, false);
        assert_eq!(replacer.evictable_count(), 0);
        replacer.check_invariants();
    }

    #[test]
    fn set_evictable_ignores_untracked_frames() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.set_evictable(42, true);
        assert_eq!(replacer.evictable_count(), 0);
        assert_eq!(replacer.evict(), None);
        replacer.check_invariants();
    }

    #[test]
    fn remove_requires_an_evictable_frame() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(5);

        // Pinned: remove must not erase the history.
        replacer.remove(5);
        assert_eq!(replacer.history_len(5), Some(1));

        replacer.set_evictable(5, true);
        replacer.remove(5);
        assert_eq!(replacer.history_len(5), None);
        assert_eq!(replacer.evictable_count(), 0);

        // Untracked now: a second remove is a no-op.
        replacer.remove(5);
        replacer.check_invariants();
    }

    #[test]
    fn remove_then_re_record_starts_a_fresh_history() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(9);
        replacer.set_evictable(9, true);
        replacer.remove(9);

        replacer.record_access(9);
        assert_eq!(replacer.history_len(9), Some(1));
        replacer.check_invariants();
    }

    #[test]
    fn evicted_frame_is_forgotten() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(3);
        replacer.set_evictable(3, true);
        assert_eq!(replacer.evict(), Some(3));

        // The frame is absent again: flag changes and removal are no-ops.
        replacer.set_evictable(3, true);
        assert_eq!(replacer.evictable_count(), 0);
        replacer.remove(3);
        assert_eq!(replacer.evict(), None);
        replacer.check_invariants();
    }

    // An infinite-distance frame outranks every finite-distance frame even
    // when a finite frame is scanned first and has a huge distance.
    #[test]
    fn infinite_distance_dominates_finite() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(1);
        replacer.record_access(1);
        for _ in 0..10 {
            replacer.record_access(2);
        }
        replacer.record_access(3);

        for frame_id in 1..=3 {
            replacer.set_evictable(frame_id, true);
        }

        // Frame 3 has one access; frames 1 and 2 have full histories.
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
    }

    #[test]
    fn history_is_bounded_by_k() {
        let replacer = LruKReplacer::new(4, 3);
        for _ in 0..100 {
            replacer.record_access(1);
        }
        assert_eq!(replacer.history_len(1), Some(3));
        replacer.check_invariants();
    }

    #[test]
    fn concurrent_accesses_keep_ticks_unique() {
        use std::sync::Arc;

        const NUM_THREADS: u64 = 4;
        const FRAMES_PER_THREAD: u64 = 64;

        let replacer = Arc::new(LruKReplacer::new(
            (NUM_THREADS * FRAMES_PER_THREAD) as usize,
            2,
        ));

        let handles: Vec<_> = (0..NUM_THREADS)
            .map(|t| {
                let replacer = Arc::clone(&replacer);
                std::thread::spawn(move || {
                    let start = t * FRAMES_PER_THREAD;
                    for frame_id in start..start + FRAMES_PER_THREAD {
                        replacer.record_access(frame_id);
                        replacer.record_access(frame_id);
                        replacer.set_evictable(frame_id, true);
                    }
                })
            })
            .collect();

        handles.into_iter().for_each(|h| h.join().expect("Failed"));

        assert_eq!(
            replacer.evictable_count(),
            (NUM_THREADS * FRAMES_PER_THREAD) as usize
        );
        replacer.check_invariants();

        let mut evicted = std::collections::HashSet::new();
        while let Some(frame_id) = replacer.evict() {
            assert!(evicted.insert(frame_id));
        }
        assert_eq!(evicted.len(), (NUM_THREADS * FRAMES_PER_THREAD) as usize);
    }
}
