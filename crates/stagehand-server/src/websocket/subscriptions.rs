//! Reference counts for high-volume event categories.
//!
//! High-volume events are expensive to produce, so the producer is only
//! switched on while at least one identified session subscribes to them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use stagehand_core::subscriptions::HighVolumeCategory;
use tracing::{debug, warn};

/// Host component that produces high-volume events.
pub trait HighVolumeProducer: Send + Sync {
    /// Start or stop producing events for `category`.
    fn set_enabled(&self, category: HighVolumeCategory, enabled: bool);
}

/// Per-category subscriber counts.
#[derive(Default)]
pub struct HighVolumeTracker {
    counts: [AtomicU64; 4],
    producer: Option<Arc<dyn HighVolumeProducer>>,
}

impl HighVolumeTracker {
    /// Create a tracker notifying `producer` on 0↔1 transitions.
    pub fn new(producer: Option<Arc<dyn HighVolumeProducer>>) -> Self {
        Self {
            counts: Default::default(),
            producer,
        }
    }

    /// Count one more subscriber for every high-volume bit in `mask`.
    pub fn subscribe(&self, mask: u64) {
        for category in HighVolumeCategory::in_mask(mask) {
            let previous = self.counts[category.index()].fetch_add(1, Ordering::AcqRel);
            if previous == 0 {
                self.notify(category, true);
            }
        }
    }

    /// Count one fewer subscriber for every high-volume bit in `mask`.
    pub fn unsubscribe(&self, mask: u64) {
        for category in HighVolumeCategory::in_mask(mask) {
            let counter = &self.counts[category.index()];
            match counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1)) {
                Ok(1) => self.notify(category, false),
                Ok(_) => {}
                Err(_) => warn!(category = category.as_str(), "subscriber count underflow"),
            }
        }
    }

    /// Apply the difference between two masks.
    pub fn update(&self, old_mask: u64, new_mask: u64) {
        self.subscribe(new_mask & !old_mask);
        self.unsubscribe(old_mask & !new_mask);
    }

    /// Current subscriber count for `category`.
    pub fn count(&self, category: HighVolumeCategory) -> u64 {
        self.counts[category.index()].load(Ordering::Acquire)
    }

    fn notify(&self, category: HighVolumeCategory, enabled: bool) {
        debug!(category = category.as_str(), enabled, "high-volume producer toggled");
        if let Some(producer) = &self.producer {
            producer.set_enabled(category, enabled);
        }
    }
}
