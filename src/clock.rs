//! The engine clock.
//!
//! All debouncing, deduplication windows, and timeout deadlines read time
//! from a [`Clock`] instead of the system. The embedder advances it from
//! its frame loop; tests advance it manually, which makes every timing
//! path deterministic.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct Clock {
    now: Rc<Cell<Duration>>,
}

impl Clock {
    pub fn with_time(now: Duration) -> Self {
        Self {
            now: Rc::new(Cell::new(now)),
        }
    }

    pub fn now(&self) -> Duration {
        self.now.get()
    }

    pub fn now_millis(&self) -> u64 {
        self.now.get().as_millis() as u64
    }

    /// Sets absolute time. Time never goes backwards; stale updates from a
    /// reordered frame callback are ignored.
    pub fn set_time(&self, now: Duration) {
        if now > self.now.get() {
            self.now.set(now);
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}
