//! IdGenerator port.
//!
//! Attempt and run ids are ULIDs stamped from the injected [`Clock`], so a
//! `FixedClock` gives ids with a deterministic timestamp part.

use ulid::Ulid;

use crate::domain::{AttemptId, RunId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn attempt_id(&self) -> AttemptId;

    fn run_id(&self) -> RunId;
}

/// ULID generator: clock timestamp plus 80 random bits.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn attempt_id(&self) -> AttemptId {
        AttemptId::from(self.next_ulid())
    }

    fn run_id(&self) -> RunId {
        RunId::from(self.next_ulid())
    }
}
