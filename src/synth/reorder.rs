//! Out-of-order arrival buffer between synthesis workers and playback
//!
//! Workers insert finished [`AudioUnit`]s in whatever order synthesis
//! completes; the single playback consumer blocks on [`take_next`] and only
//! ever receives units in strictly increasing sequence order starting at 0.
//! The buffer is internally synchronized; workers and the consumer never
//! coordinate through anything else (besides the turn's cancel token).

use crate::synth::AudioUnit;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;

/// What the consumer gets from [`ReorderBuffer::take_next`]
#[derive(Debug)]
pub enum NextUnit {
    /// The next in-order unit
    Unit(AudioUnit),

    /// Every expected unit has been taken; the turn's audio is complete
    Finished,

    /// The turn was cancelled; any buffered units were discarded
    Cancelled,
}

#[derive(Default)]
struct Inner {
    /// Units that arrived ahead of their release slot, keyed by sequence
    units: BTreeMap<u64, AudioUnit>,

    /// Next sequence the consumer will release
    next: u64,

    /// Total number of units this turn will produce, once known
    expected_total: Option<u64>,

    cancelled: bool,
}

/// Arrival buffer keyed by unit sequence
#[derive(Default)]
pub struct ReorderBuffer {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl ReorderBuffer {
    /// Create an empty buffer expecting sequence 0 first
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a finished unit
    ///
    /// Returns `false` when the unit was discarded: the turn is cancelled
    /// (a late completion racing the cancellation) or the sequence was
    /// already released.
    pub fn insert(&self, unit: AudioUnit) -> bool {
        let mut inner = self.inner.lock();
        if inner.cancelled || unit.sequence < inner.next {
            return false;
        }
        inner.units.insert(unit.sequence, unit);
        self.available.notify_all();
        true
    }

    /// Declare the total number of units for this turn
    ///
    /// After this call the consumer sees [`NextUnit::Finished`] once it has
    /// taken all `total` units.
    pub fn finish(&self, total: u64) {
        let mut inner = self.inner.lock();
        inner.expected_total = Some(total);
        self.available.notify_all();
    }

    /// Cancel the turn: discard everything buffered and wake the consumer
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancelled = true;
        inner.units.clear();
        self.available.notify_all();
    }

    /// Take the next in-order unit, suspending until it is available
    ///
    /// Blocks only on the next expected sequence, never on later ones: an
    /// early-arriving unit N+2 is held until N and N+1 have been taken.
    pub fn take_next(&self) -> NextUnit {
        let mut inner = self.inner.lock();
        loop {
            if inner.cancelled {
                return NextUnit::Cancelled;
            }
            let next = inner.next;
            if let Some(unit) = inner.units.remove(&next) {
                inner.next += 1;
                return NextUnit::Unit(unit);
            }
            if let Some(total) = inner.expected_total {
                if next >= total {
                    return NextUnit::Finished;
                }
            }
            self.available.wait(&mut inner);
        }
    }

    /// Number of units currently buffered
    pub fn len(&self) -> usize {
        self.inner.lock().units.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn unit(sequence: u64) -> AudioUnit {
        AudioUnit {
            sequence,
            text: format!("unit {}", sequence),
            samples: vec![sequence as f32; 160],
            sample_rate: 16_000,
            expression_events: Vec::new(),
            failed: false,
        }
    }

    #[test]
    fn test_releases_in_order_from_reversed_arrival() {
        let buffer = ReorderBuffer::new();
        for seq in (0..4).rev() {
            assert!(buffer.insert(unit(seq)));
        }
        buffer.finish(4);

        for expected in 0..4 {
            match buffer.take_next() {
                NextUnit::Unit(u) => assert_eq!(u.sequence, expected),
                other => panic!("expected unit {}, got {:?}", expected, other),
            }
        }
        assert!(matches!(buffer.take_next(), NextUnit::Finished));
    }

    #[test]
    fn test_blocks_until_gap_fills() {
        let buffer = Arc::new(ReorderBuffer::new());
        buffer.insert(unit(1));

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut taken = Vec::new();
                loop {
                    match buffer.take_next() {
                        NextUnit::Unit(u) => taken.push(u.sequence),
                        NextUnit::Finished => return taken,
                        NextUnit::Cancelled => panic!("unexpected cancel"),
                    }
                }
            })
        };

        // the consumer must be suspended on sequence 0, not releasing 1
        thread::sleep(Duration::from_millis(50));
        buffer.insert(unit(0));
        buffer.finish(2);

        assert_eq!(consumer.join().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_cancel_wakes_consumer_and_discards() {
        let buffer = Arc::new(ReorderBuffer::new());
        buffer.insert(unit(2));

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.take_next())
        };

        thread::sleep(Duration::from_millis(20));
        buffer.cancel();

        assert!(matches!(consumer.join().unwrap(), NextUnit::Cancelled));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_late_insert_after_cancel_is_discarded() {
        let buffer = ReorderBuffer::new();
        buffer.cancel();
        assert!(!buffer.insert(unit(0)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_finish_with_zero_units() {
        let buffer = ReorderBuffer::new();
        buffer.finish(0);
        assert!(matches!(buffer.take_next(), NextUnit::Finished));
    }

    #[test]
    fn test_concurrent_inserters_still_strictly_ordered() {
        let buffer = Arc::new(ReorderBuffer::new());
        let total = 16u64;

        let mut producers = Vec::new();
        for seq in 0..total {
            let buffer = Arc::clone(&buffer);
            producers.push(thread::spawn(move || {
                // scatter arrival order
                thread::sleep(Duration::from_millis((seq * 7) % 13));
                buffer.insert(unit(seq));
            }));
        }

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut taken = Vec::new();
                loop {
                    match buffer.take_next() {
                        NextUnit::Unit(u) => taken.push(u.sequence),
                        NextUnit::Finished => return taken,
                        NextUnit::Cancelled => panic!("unexpected cancel"),
                    }
                }
            })
        };

        for p in producers {
            p.join().unwrap();
        }
        buffer.finish(total);

        let taken = consumer.join().unwrap();
        assert_eq!(taken, (0..total).collect::<Vec<_>>());
    }
}
