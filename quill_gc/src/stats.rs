//! GC statistics and metrics.
//!
//! [`GcStats`] accumulates over the lifetime of a heap. [`ScavengeResult`]
//! describes a single cycle; workers fill private copies and merge them at
//! the end of the cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lifetime statistics about scavenger activity.
#[derive(Debug)]
pub struct GcStats {
    // =========================================================================
    // Allocation Statistics
    // =========================================================================
    /// Total bytes allocated by the mutator.
    pub bytes_allocated: AtomicU64,
    /// Total objects allocated by the mutator.
    pub objects_allocated: AtomicU64,

    // =========================================================================
    // Collection Statistics
    // =========================================================================
    /// Number of scavenges.
    pub scavenges: AtomicU64,
    /// Total time spent scavenging (nanoseconds).
    pub scavenge_time_ns: AtomicU64,

    // =========================================================================
    // Evacuation Statistics
    // =========================================================================
    /// Total bytes copied within the young generation.
    pub bytes_copied: AtomicU64,
    /// Total objects copied within the young generation.
    pub objects_copied: AtomicU64,
    /// Total bytes promoted to the old generation.
    pub bytes_promoted: AtomicU64,
    /// Total objects promoted to the old generation.
    pub objects_promoted: AtomicU64,
    /// Bytes turned into filler after losing a forwarding race.
    pub bytes_abandoned: AtomicU64,
    /// Objects resolved through a kind-specific shortcut instead of copied.
    pub shortcuts: AtomicU64,
}

impl GcStats {
    /// Create new empty statistics.
    pub const fn new() -> Self {
        Self {
            bytes_allocated: AtomicU64::new(0),
            objects_allocated: AtomicU64::new(0),
            scavenges: AtomicU64::new(0),
            scavenge_time_ns: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            objects_copied: AtomicU64::new(0),
            bytes_promoted: AtomicU64::new(0),
            objects_promoted: AtomicU64::new(0),
            bytes_abandoned: AtomicU64::new(0),
            shortcuts: AtomicU64::new(0),
        }
    }

    /// Record a mutator allocation.
    #[inline]
    pub fn record_allocation(&self, size: usize) {
        self.bytes_allocated
            .fetch_add(size as u64, Ordering::Relaxed);
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a completed scavenge into the totals.
    pub fn record_scavenge(&self, result: &ScavengeResult) {
        self.scavenges.fetch_add(1, Ordering::Relaxed);
        self.scavenge_time_ns
            .fetch_add(result.duration.as_nanos() as u64, Ordering::Relaxed);
        self.bytes_copied
            .fetch_add(result.bytes_copied as u64, Ordering::Relaxed);
        self.objects_copied
            .fetch_add(result.objects_copied as u64, Ordering::Relaxed);
        self.bytes_promoted
            .fetch_add(result.bytes_promoted as u64, Ordering::Relaxed);
        self.objects_promoted
            .fetch_add(result.objects_promoted as u64, Ordering::Relaxed);
        self.bytes_abandoned
            .fetch_add(result.bytes_abandoned as u64, Ordering::Relaxed);
        self.shortcuts
            .fetch_add(result.shortcuts as u64, Ordering::Relaxed);
    }

    /// Get total scavenge time.
    pub fn total_gc_time(&self) -> Duration {
        Duration::from_nanos(self.scavenge_time_ns.load(Ordering::Relaxed))
    }

    /// Get average scavenge pause time.
    pub fn avg_pause(&self) -> Duration {
        let count = self.scavenges.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.scavenge_time_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / count)
    }

    /// Fraction of evacuated bytes that were promoted.
    pub fn promotion_rate(&self) -> f64 {
        let promoted = self.bytes_promoted.load(Ordering::Relaxed) as f64;
        let copied = self.bytes_copied.load(Ordering::Relaxed) as f64;
        if promoted + copied > 0.0 {
            promoted / (promoted + copied)
        } else {
            0.0
        }
    }

    /// Reset all statistics.
    pub fn reset(&self) {
        self.bytes_allocated.store(0, Ordering::Relaxed);
        self.objects_allocated.store(0, Ordering::Relaxed);
        self.scavenges.store(0, Ordering::Relaxed);
        self.scavenge_time_ns.store(0, Ordering::Relaxed);
        self.bytes_copied.store(0, Ordering::Relaxed);
        self.objects_copied.store(0, Ordering::Relaxed);
        self.bytes_promoted.store(0, Ordering::Relaxed);
        self.objects_promoted.store(0, Ordering::Relaxed);
        self.bytes_abandoned.store(0, Ordering::Relaxed);
        self.shortcuts.store(0, Ordering::Relaxed);
    }

    /// Log a summary of GC statistics at info level.
    pub fn log_summary(&self) {
        log::info!(
            "gc: {} scavenges, {:?} total ({:?} avg), allocated {} in {} objects",
            self.scavenges.load(Ordering::Relaxed),
            self.total_gc_time(),
            self.avg_pause(),
            format_bytes(self.bytes_allocated.load(Ordering::Relaxed)),
            self.objects_allocated.load(Ordering::Relaxed),
        );
        log::info!(
            "gc: copied {} in {} objects, promoted {} in {} objects ({:.1}%)",
            format_bytes(self.bytes_copied.load(Ordering::Relaxed)),
            self.objects_copied.load(Ordering::Relaxed),
            format_bytes(self.bytes_promoted.load(Ordering::Relaxed)),
            self.objects_promoted.load(Ordering::Relaxed),
            self.promotion_rate() * 100.0,
        );
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one scavenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScavengeResult {
    /// Objects copied within the young generation.
    pub objects_copied: usize,
    /// Bytes copied within the young generation.
    pub bytes_copied: usize,
    /// Objects promoted to old space.
    pub objects_promoted: usize,
    /// Bytes promoted to old space.
    pub bytes_promoted: usize,
    /// Bytes turned into filler after a lost forwarding race.
    pub bytes_abandoned: usize,
    /// Objects resolved through a kind-specific shortcut.
    pub shortcuts: usize,
    /// Root slots visited.
    pub roots_visited: usize,
    /// Remembered slots consumed at the start of the cycle.
    pub remembered_in: usize,
    /// Remembered slots present at the end of the cycle.
    pub remembered_out: usize,
    /// Promotion queue entries scanned.
    pub promotion_queue_processed: usize,
    /// Wall-clock pause.
    pub duration: Duration,
}

impl ScavengeResult {
    /// Add another worker's counters into this one.
    pub fn merge(&mut self, other: &ScavengeResult) {
        self.objects_copied += other.objects_copied;
        self.bytes_copied += other.bytes_copied;
        self.objects_promoted += other.objects_promoted;
        self.bytes_promoted += other.bytes_promoted;
        self.bytes_abandoned += other.bytes_abandoned;
        self.shortcuts += other.shortcuts;
        self.roots_visited += other.roots_visited;
        self.promotion_queue_processed += other.promotion_queue_processed;
    }

    /// Total objects that survived.
    #[inline]
    pub fn survivors(&self) -> usize {
        self.objects_copied + self.objects_promoted
    }
}

/// Format bytes in human-readable form.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Timer for measuring GC phases.
pub struct GcTimer {
    start: Instant,
    label: &'static str,
}

impl GcTimer {
    /// Start a new timer with the given label.
    pub fn start(label: &'static str) -> Self {
        Self {
            start: Instant::now(),
            label,
        }
    }

    /// Stop the timer and return the elapsed duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        log::trace!("gc {}: {:?}", self.label, elapsed);
        elapsed
    }
}
