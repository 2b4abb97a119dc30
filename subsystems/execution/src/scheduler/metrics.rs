//! # Scheduler Metrics
//!
//! Lifecycle counters for the cooperative core.

use core::sync::atomic::{AtomicU64, Ordering};

/// Scheduler metrics
pub struct SchedulerMetrics {
    /// Total thread creations
    creations: AtomicU64,
    /// Total thread exits
    exits: AtomicU64,
    /// Total voluntary yields
    voluntary_yields: AtomicU64,
    /// Total context switches
    context_switches: AtomicU64,
    /// Total migrations
    migrations: AtomicU64,
}

impl SchedulerMetrics {
    /// Create new metrics
    pub const fn new() -> Self {
        Self {
            creations: AtomicU64::new(0),
            exits: AtomicU64::new(0),
            voluntary_yields: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            migrations: AtomicU64::new(0),
        }
    }

    /// Record a thread creation
    pub fn record_creation(&self) {
        self.creations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a thread exit
    pub fn record_exit(&self) {
        self.exits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a voluntary yield
    pub fn record_yield(&self) {
        self.voluntary_yields.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a context switch
    pub fn record_context_switch(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a migration
    pub fn record_migration(&self) {
        self.migrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total creations
    pub fn creations(&self) -> u64 {
        self.creations.load(Ordering::Relaxed)
    }

    /// Get total exits
    pub fn exits(&self) -> u64 {
        self.exits.load(Ordering::Relaxed)
    }

    /// Get voluntary yields
    pub fn voluntary_yields(&self) -> u64 {
        self.voluntary_yields.load(Ordering::Relaxed)
    }

    /// Get total context switches
    pub fn context_switches(&self) -> u64 {
        self.context_switches.load(Ordering::Relaxed)
    }

    /// Get total migrations
    pub fn migrations(&self) -> u64 {
        self.migrations.load(Ordering::Relaxed)
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.creations.store(0, Ordering::Relaxed);
        self.exits.store(0, Ordering::Relaxed);
        self.voluntary_yields.store(0, Ordering::Relaxed);
        self.context_switches.store(0, Ordering::Relaxed);
        self.migrations.store(0, Ordering::Relaxed);
    }
}

/// Global scheduler metrics
static METRICS: SchedulerMetrics = SchedulerMetrics::new();

/// Get the scheduler metrics
pub fn metrics() -> &'static SchedulerMetrics {
    &METRICS
}
