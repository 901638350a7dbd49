use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::common::frame::ScaledFrameSet;
use crate::config::ChannelSettings;

/// What `publish` does when a ring is already at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest item to admit the new one.
    LatestWins,
    /// Reject the new item and keep what is queued.
    DropNew,
}

/// Bounded frame ring shared between the capture thread and one consumer.
///
/// Both ends are non-blocking; the internal lock is held only for a
/// push or pop. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct FrameRing {
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
    items: Arc<Mutex<VecDeque<ScaledFrameSet>>>,
    dropped: Arc<AtomicU64>,
}

impl FrameRing {
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            policy,
            items: Arc::new(Mutex::new(VecDeque::new())),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Offer one frame set under this ring's overflow policy. Returns
    /// whether the item was admitted.
    pub fn publish(&self, set: ScaledFrameSet) -> bool {
        let evicted;
        {
            let mut items = self.items.lock().unwrap();
            if items.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::LatestWins => {
                        items.pop_front();
                        evicted = true;
                    }
                    OverflowPolicy::DropNew => {
                        drop(items);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!("Ring `{}` full, dropping frame {}", self.name, set.seq());
                        return false;
                    }
                }
            } else {
                evicted = false;
            }
            items.push_back(set);
        }
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Ring `{}` full, evicted oldest frame", self.name);
        }
        true
    }

    /// Take the most recent item and discard anything older. Never
    /// blocks; `None` when the ring is empty.
    pub fn consume_latest(&self) -> Option<ScaledFrameSet> {
        let mut items = self.items.lock().unwrap();
        let latest = items.pop_back();
        items.clear();
        latest
    }

    /// Take the oldest queued item, preserving the rest. This is the
    /// read side meant for `DropNew` rings where every admitted item
    /// must be observed.
    pub fn consume_next(&self) -> Option<ScaledFrameSet> {
        self.items.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Total items evicted or rejected since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// The per-consumer channel arena fed by the capture loop.
///
/// One ring per consumer so a slow display sink can never starve
/// recognition. Both default to latest-wins; a bot cares about the
/// current screen, not the history.
#[derive(Debug)]
pub struct FrameFanout {
    display: FrameRing,
    recognition: FrameRing,
}

impl FrameFanout {
    pub fn new(settings: &ChannelSettings) -> Self {
        Self {
            display: FrameRing::new(
                "display",
                settings.display_capacity,
                OverflowPolicy::LatestWins,
            ),
            recognition: FrameRing::new(
                "recognition",
                settings.recognition_capacity,
                OverflowPolicy::LatestWins,
            ),
        }
    }

    /// Fan one frame set out to every ring.
    pub fn publish(&self, set: &ScaledFrameSet) {
        self.display.publish(set.clone());
        self.recognition.publish(set.clone());
    }

    pub fn display(&self) -> &FrameRing {
        &self.display
    }

    pub fn recognition(&self) -> &FrameRing {
        &self.recognition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::frame::Frame;
    use chrono::Utc;
    use image::DynamicImage;

    fn set(seq: u64) -> ScaledFrameSet {
        let image = DynamicImage::new_rgb8(4, 4);
        ScaledFrameSet::native(Frame::new(seq, Utc::now(), image))
    }

    #[test]
    fn latest_wins_evicts_oldest_at_capacity() {
        let ring = FrameRing::new("test", 2, OverflowPolicy::LatestWins);
        assert!(ring.publish(set(1)));
        assert!(ring.publish(set(2)));
        assert!(ring.publish(set(3)));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.dropped(), 1);
        assert_eq!(ring.consume_next().unwrap().seq(), 2);
        assert_eq!(ring.consume_next().unwrap().seq(), 3);
    }

    #[test]
    fn drop_new_rejects_when_full() {
        let ring = FrameRing::new("test", 2, OverflowPolicy::DropNew);
        assert!(ring.publish(set(1)));
        assert!(ring.publish(set(2)));
        assert!(!ring.publish(set(3)));
        assert_eq!(ring.dropped(), 1);
        assert_eq!(ring.consume_next().unwrap().seq(), 1);
        assert_eq!(ring.consume_next().unwrap().seq(), 2);
        assert!(ring.consume_next().is_none());
    }

    #[test]
    fn consume_latest_returns_newest_and_clears() {
        let ring = FrameRing::new("test", 5, OverflowPolicy::LatestWins);
        for seq in 1..=4 {
            ring.publish(set(seq));
        }
        assert_eq!(ring.consume_latest().unwrap().seq(), 4);
        assert!(ring.is_empty());
        assert!(ring.consume_latest().is_none());
    }

    #[test]
    fn consume_latest_never_goes_backwards() {
        let ring = FrameRing::new("test", 3, OverflowPolicy::LatestWins);
        let mut last_seen = 0u64;
        let mut next_seq = 1u64;
        for round in 0..10 {
            for _ in 0..=(round % 3) {
                ring.publish(set(next_seq));
                next_seq += 1;
            }
            if let Some(observed) = ring.consume_latest() {
                assert!(observed.seq() > last_seen);
                last_seen = observed.seq();
            }
        }
    }

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let ring = FrameRing::new("test", 0, OverflowPolicy::LatestWins);
        assert_eq!(ring.capacity(), 1);
        assert!(ring.publish(set(1)));
        assert!(ring.publish(set(2)));
        assert_eq!(ring.consume_latest().unwrap().seq(), 2);
    }

    #[test]
    fn fanout_feeds_every_ring() {
        let fanout = FrameFanout::new(&ChannelSettings::default());
        fanout.publish(&set(9));
        assert_eq!(fanout.display().consume_latest().unwrap().seq(), 9);
        assert_eq!(fanout.recognition().consume_latest().unwrap().seq(), 9);
    }
}
