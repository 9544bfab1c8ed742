//! Unique number generation for business documents (transfer numbers).
//!
//! Generators are constructed explicitly and injected into the components that
//! need them; there is no process-global instance.

use std::sync::Mutex;

use chrono::Utc;

use crate::error::{EngineError, EngineResult};

/// Source of unique, monotonically increasing 63-bit numbers.
pub trait SequenceGenerator: Send + Sync {
    fn next_id(&self) -> EngineResult<u64>;
}

impl<G> SequenceGenerator for std::sync::Arc<G>
where
    G: SequenceGenerator + ?Sized,
{
    fn next_id(&self) -> EngineResult<u64> {
        (**self).next_id()
    }
}

/// Custom epoch (2024-01-01T00:00:00Z) in unix milliseconds.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_704_067_200_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: i64,
    sequence: u64,
}

/// Snowflake-style generator: `timestamp(41) | node(10) | sequence(12)`.
///
/// A clock moving backwards never produces a smaller id: the generator keeps
/// issuing from the last seen millisecond. Sequence exhaustion within one
/// millisecond advances the logical millisecond instead of spinning.
pub struct SnowflakeGenerator {
    node_id: u16,
    clock: Clock,
    state: Mutex<SnowflakeState>,
}

impl core::fmt::Debug for SnowflakeGenerator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SnowflakeGenerator")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl SnowflakeGenerator {
    pub fn new(node_id: u16) -> EngineResult<Self> {
        Self::with_clock(node_id, || Utc::now().timestamp_millis())
    }

    pub fn with_clock(
        node_id: u16,
        clock: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> EngineResult<Self> {
        if node_id > MAX_NODE_ID {
            return Err(EngineError::invalid(format!(
                "node id {node_id} exceeds {MAX_NODE_ID}"
            )));
        }
        Ok(Self {
            node_id,
            clock: Box::new(clock),
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }
}

impl SequenceGenerator for SnowflakeGenerator {
    fn next_id(&self) -> EngineResult<u64> {
        let now = (self.clock)() - SNOWFLAKE_EPOCH_MS;
        if now < 0 {
            return Err(EngineError::internal("clock is before generator epoch"));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::internal("sequence generator lock poisoned"))?;

        if now > state.last_ms {
            state.last_ms = now;
            state.sequence = 0;
        } else if state.sequence == MAX_SEQUENCE {
            state.last_ms += 1;
            state.sequence = 0;
        } else {
            state.sequence += 1;
        }

        Ok(((state.last_ms as u64) << (NODE_BITS + SEQUENCE_BITS))
            | ((self.node_id as u64) << SEQUENCE_BITS)
            | state.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn fixed_clock(ms: i64) -> (Arc<AtomicI64>, impl Fn() -> i64 + Send + Sync + 'static) {
        let cell = Arc::new(AtomicI64::new(ms));
        let reader = cell.clone();
        (cell, move || reader.load(Ordering::SeqCst))
    }

    #[test]
    fn ids_increase_within_one_millisecond() {
        let (_, clock) = fixed_clock(SNOWFLAKE_EPOCH_MS + 1_000);
        let generator = SnowflakeGenerator::with_clock(3, clock).unwrap();

        let a = generator.next_id().unwrap();
        let b = generator.next_id().unwrap();
        assert!(b > a);
    }

    #[test]
    fn clock_regression_keeps_ids_monotonic() {
        let (cell, clock) = fixed_clock(SNOWFLAKE_EPOCH_MS + 5_000);
        let generator = SnowflakeGenerator::with_clock(1, clock).unwrap();

        let before = generator.next_id().unwrap();
        cell.store(SNOWFLAKE_EPOCH_MS + 10, Ordering::SeqCst);
        let after = generator.next_id().unwrap();
        assert!(after > before);
    }

    #[test]
    fn sequence_exhaustion_rolls_into_next_millisecond() {
        let (_, clock) = fixed_clock(SNOWFLAKE_EPOCH_MS + 7);
        let generator = SnowflakeGenerator::with_clock(0, clock).unwrap();

        let mut last = 0;
        for _ in 0..(MAX_SEQUENCE + 10) {
            let id = generator.next_id().unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn node_id_is_encoded() {
        let (_, clock) = fixed_clock(SNOWFLAKE_EPOCH_MS + 1);
        let generator = SnowflakeGenerator::with_clock(513, clock).unwrap();
        let id = generator.next_id().unwrap();
        assert_eq!((id >> SEQUENCE_BITS) & MAX_NODE_ID as u64, 513);
    }

    #[test]
    fn rejects_out_of_range_node() {
        assert!(SnowflakeGenerator::new(MAX_NODE_ID + 1).is_err());
    }
}
