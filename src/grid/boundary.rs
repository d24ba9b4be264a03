//! Boundary search over one grid axis.
//!
//! Index 0 is known to exist (the resolver found tile `(level, 0, 0)`).
//! The search probes 1, 2, 3, ... and stops once `misses_to_confirm`
//! consecutive probes miss; the boundary is the last index that hit. A single
//! miss followed by a hit is treated as transient and the search continues.
//!
//! The sentinel bounds the number of probes. Reaching an index past the
//! sentinel while the latest probe was a hit means the axis is unbounded.
//! Past the sentinel the search only keeps going to confirm a pending miss.

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStep {
    /// Probe this index and report the result with [`BoundarySearch::record`]
    Probe(u32),

    /// Boundary confirmed; the value is the last index that exists
    Found(u32),

    /// Sentinel exceeded without a confirmed boundary
    Unbounded,
}

/// State of an incremental boundary search.
#[derive(Debug, Clone)]
pub struct BoundarySearch {
    last_hit: u32,
    next: u32,
    consecutive_misses: u32,
    misses_to_confirm: u32,
    sentinel: u32,
}

impl BoundarySearch {
    /// `misses_to_confirm` is clamped to at least 1.
    pub fn new(misses_to_confirm: u32, sentinel: u32) -> Self {
        Self {
            last_hit: 0,
            next: 1,
            consecutive_misses: 0,
            misses_to_confirm: misses_to_confirm.max(1),
            sentinel,
        }
    }

    pub fn next_step(&self) -> BoundaryStep {
        if self.consecutive_misses >= self.misses_to_confirm {
            return BoundaryStep::Found(self.last_hit);
        }
        if self.next > self.sentinel && self.consecutive_misses == 0 {
            return BoundaryStep::Unbounded;
        }
        BoundaryStep::Probe(self.next)
    }

    /// Record the outcome of probing the index returned by the last
    /// [`next_step`](Self::next_step).
    pub fn record(&mut self, hit: bool) {
        if hit {
            self.last_hit = self.next;
            self.consecutive_misses = 0;
        } else {
            self.consecutive_misses += 1;
        }
        self.next += 1;
    }

    /// Last index that was seen to exist.
    pub fn last_hit(&self) -> u32 {
        self.last_hit
    }
}
