use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonic-enough wall clock source for all `*_at` fields (§4.A).
///
/// Implementations must be cheap to call — every validated step event reads
/// the clock at least once — and must never go backwards for a single
/// process lifetime.
pub trait Clock: std::fmt::Debug + Send + Sync {
    /// Seconds since the Unix epoch, double precision, per §3.
    fn now_seconds(&self) -> f64;
}

/// The real clock: wall time via [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A settable clock for deterministic tests. Stored as bits of an `f64` in
/// an `AtomicU64` so it can be shared (`Arc<VirtualClock>`) and advanced from
/// outside the component under test without a lock.
#[derive(Debug)]
pub struct VirtualClock {
    now_bits: AtomicU64,
}

impl VirtualClock {
    #[must_use]
    pub fn new(start_seconds: f64) -> Arc<Self> {
        Arc::new(Self {
            now_bits: AtomicU64::new(start_seconds.to_bits()),
        })
    }

    pub fn set(&self, seconds: f64) {
        self.now_bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, delta_seconds: f64) {
        self.set(self.now_seconds() + delta_seconds);
    }
}

impl Clock for VirtualClock {
    fn now_seconds(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::SeqCst))
    }
}
