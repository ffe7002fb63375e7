//! Allocation and collection metrics for the GC heap.
//!
//! Only compiled with the `gc-telemetry` feature; without it the heap carries
//! no instrumentation at all.

use std::{
    fmt::Write as _,
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::runtime::gc::heap_object::ObjectKind;

/// Cumulative counters for one object kind.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct KindStats {
    pub alloc_count: usize,
    pub alloc_bytes: usize,
    pub survival_count: usize,
    pub survival_bytes: usize,
}

/// What one collection cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleMetrics {
    pub cycle_index: usize,
    pub duration: Duration,
    pub live_before: usize,
    pub live_after: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub peak_mark_stack: usize,
    pub threshold_before: usize,
    pub threshold_after: usize,
}

impl CycleMetrics {
    pub fn collected(&self) -> usize {
        self.live_before.saturating_sub(self.live_after)
    }
}

/// Point-in-time view of the live heap.
#[derive(Debug, Clone, Default)]
pub struct HeapSnapshot {
    pub capacity: usize,
    pub live_count: usize,
    pub free_list_len: usize,
    pub total_live_bytes: usize,
    /// `(count, bytes)` indexed by `ObjectKind as usize`.
    pub by_kind: [(usize, usize); ObjectKind::COUNT],
    /// `(slot, kind, bytes)`, largest first.
    pub largest_objects: Vec<(u32, ObjectKind, usize)>,
}

struct PendingCycle {
    start: Instant,
    threshold: usize,
    bytes: usize,
    live: usize,
    peak_mark_stack: usize,
}

#[derive(Default)]
pub struct GcTelemetry {
    kinds: [KindStats; ObjectKind::COUNT],
    cycles: Vec<CycleMetrics>,
    pending: Option<PendingCycle>,
}

impl GcTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_alloc(&mut self, kind: ObjectKind, bytes: usize) {
        let stats = &mut self.kinds[kind as usize];
        stats.alloc_count += 1;
        stats.alloc_bytes += bytes;
    }

    #[inline]
    pub fn record_survival(&mut self, kind: ObjectKind, bytes: usize) {
        let stats = &mut self.kinds[kind as usize];
        stats.survival_count += 1;
        stats.survival_bytes += bytes;
    }

    pub fn begin_cycle(&mut self, threshold: usize, bytes: usize, live: usize) {
        self.pending = Some(PendingCycle {
            start: Instant::now(),
            threshold,
            bytes,
            live,
            peak_mark_stack: 0,
        });
    }

    #[inline]
    pub fn update_peak_mark_stack(&mut self, depth: usize) {
        if let Some(pending) = &mut self.pending {
            pending.peak_mark_stack = pending.peak_mark_stack.max(depth);
        }
    }

    pub fn end_cycle(&mut self, live_after: usize, bytes_after: usize, threshold_after: usize) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.cycles.push(CycleMetrics {
            cycle_index: self.cycles.len(),
            duration: pending.start.elapsed(),
            live_before: pending.live,
            live_after,
            bytes_before: pending.bytes,
            bytes_after,
            peak_mark_stack: pending.peak_mark_stack,
            threshold_before: pending.threshold,
            threshold_after,
        });
    }

    pub fn kind_stats(&self, kind: ObjectKind) -> &KindStats {
        &self.kinds[kind as usize]
    }

    pub fn cycles(&self) -> &[CycleMetrics] {
        &self.cycles
    }

    pub fn total_alloc_bytes(&self) -> usize {
        self.kinds.iter().map(|s| s.alloc_bytes).sum()
    }

    /// Plain-text report of per-kind allocation counters, the cycle history
    /// and `snapshot`.
    pub fn report(&self, snapshot: &HeapSnapshot) -> String {
        let mut out = String::from("=== Allocations ===\n");
        let _ = writeln!(
            out,
            "{:<12} {:>9} {:>11} {:>9} {:>11}",
            "Kind", "Allocs", "Bytes", "Survived", "SurvBytes"
        );
        for kind in ObjectKind::ALL {
            let s = self.kind_stats(kind);
            if s.alloc_count == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "{:<12} {:>9} {:>11} {:>9} {:>11}",
                kind, s.alloc_count, s.alloc_bytes, s.survival_count, s.survival_bytes
            );
        }

        out.push_str("\n=== Cycles ===\n");
        if self.cycles.is_empty() {
            out.push_str("none\n");
        }
        for c in &self.cycles {
            let _ = writeln!(
                out,
                "#{:<4} {:>7}us  live {} -> {}  bytes {} -> {}  next {}",
                c.cycle_index,
                c.duration.as_micros(),
                c.live_before,
                c.live_after,
                c.bytes_before,
                c.bytes_after,
                c.threshold_after
            );
        }

        out.push_str("\n=== Heap ===\n");
        let _ = writeln!(
            out,
            "slots {}  live {}  free {}  bytes {}",
            snapshot.capacity, snapshot.live_count, snapshot.free_list_len, snapshot.total_live_bytes
        );
        for kind in ObjectKind::ALL {
            let (count, bytes) = snapshot.by_kind[kind as usize];
            if count > 0 {
                let _ = writeln!(out, "  {:<12} {:>8} {:>11}", kind, count, bytes);
            }
        }
        for (slot, kind, bytes) in &snapshot.largest_objects {
            let _ = writeln!(out, "  slot {:>6}  {:<12} {} bytes", slot, kind, bytes);
        }
        out
    }
}
