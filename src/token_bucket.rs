use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Bucket capacity that marks a bucket as unlimited.
pub const UNLIMITED: f64 = 0.0;

struct BucketState {
    content: f64,
    last_refill: Instant,
}

/// A continuously refilling token bucket.
///
/// `refill_rate` tokens are credited every `refill_period`, pro rata for
/// partial periods, up to `capacity`. A capacity of zero makes the bucket
/// unlimited. Timestamps come from `tokio::time`, so a paused test clock
/// drives refills deterministically.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    refill_period: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: f64, refill_rate: f64, refill_period: Duration) -> Self {
        Self {
            capacity,
            refill_rate,
            refill_period,
            state: Mutex::new(BucketState {
                content: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Create a bucket that never runs out.
    pub fn unlimited() -> Self {
        Self::new(UNLIMITED, 0.0, Duration::from_secs(1))
    }

    pub fn is_unlimited(&self) -> bool {
        self.capacity == UNLIMITED
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }

    /// Try to take `count` tokens out of the bucket.
    ///
    /// Returns `false` without touching the content when `count` is negative
    /// or NaN, exceeds the capacity, or fewer than `count` tokens are
    /// available after refilling.
    pub fn try_withdraw(&self, count: f64) -> bool {
        if self.is_unlimited() {
            return true;
        }
        if !(count >= 0.0) {
            return false;
        }

        let mut state = self.state.lock();
        self.refill_locked(&mut state);

        if count > self.capacity || state.content < count {
            return false;
        }

        state.content -= count;
        true
    }

    /// Credit the tokens accrued since the last refill.
    pub fn refill(&self) {
        let mut state = self.state.lock();
        self.refill_locked(&mut state);
    }

    /// Current content, without refilling first.
    pub fn content(&self) -> f64 {
        self.state.lock().content
    }

    /// Whole tokens available right now.
    pub fn available_tokens(&self) -> u64 {
        if self.is_unlimited() {
            return u64::MAX;
        }
        let mut state = self.state.lock();
        self.refill_locked(&mut state);
        state.content.floor() as u64
    }

    /// Refill the bucket to capacity and restart the refill clock.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.content = self.capacity;
        state.last_refill = state.last_refill.max(Instant::now());
    }

    /// Estimated wait before `count` tokens can be withdrawn.
    ///
    /// Returns `None` if they are available now, and `Duration::MAX` if they
    /// never will be.
    pub fn time_until_available(&self, count: f64) -> Option<Duration> {
        if self.is_unlimited() {
            return None;
        }
        if !(count >= 0.0) {
            return Some(Duration::MAX);
        }

        let mut state = self.state.lock();
        self.refill_locked(&mut state);

        if count > self.capacity {
            return Some(Duration::MAX);
        }
        if state.content >= count {
            return None;
        }

        if self.refill_rate <= 0.0 {
            return Some(Duration::MAX);
        }
        let deficit = count - state.content;
        let nanos = deficit * self.refill_period.as_nanos() as f64 / self.refill_rate;
        Some(Duration::from_nanos(nanos.ceil() as u64))
    }

    fn refill_locked(&self, state: &mut BucketState) {
        if self.is_unlimited() {
            return;
        }

        if self.refill_rate == 0.0 {
            state.content = self.capacity;
            return;
        }

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        if now > state.last_refill {
            state.last_refill = now;
        }

        let tokens_to_add =
            elapsed.as_nanos() as f64 * self.refill_rate / self.refill_period.as_nanos() as f64;
        state.content = (state.content + tokens_to_add).min(self.capacity);
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .field("refill_period", &self.refill_period)
            .field("content", &self.content())
            .finish()
    }
}
