//! Time-ordered 63-bit id generation for wallet and vault rows.
//!
//! Layout: 41 bits of milliseconds since [`EPOCH_MS`], 10 bits of process
//! entropy, 12 bits of per-millisecond sequence. Ids sort by creation time,
//! which the repositories rely on for keyset pagination.

use once_cell::sync::Lazy;
use rand::Rng;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch (2020-01-01T00:00:00Z) to keep ids well inside i64 range.
const EPOCH_MS: u64 = 1_577_836_800_000;

const NODE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

struct Generator {
    node: u64,
    last_ms: u64,
    sequence: u64,
}

static GENERATOR: Lazy<Mutex<Generator>> = Lazy::new(|| {
    Mutex::new(Generator {
        node: rand::thread_rng().gen_range(0..(1 << NODE_BITS)),
        last_ms: 0,
        sequence: 0,
    })
});

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Produce the next id. Monotone within a process.
pub fn next_id() -> i64 {
    let mut generator = GENERATOR.lock().expect("snowflake lock poisoned");
    let mut ms = now_ms().saturating_sub(EPOCH_MS);
    if ms < generator.last_ms {
        // Clock went backwards; keep issuing from the last observed tick.
        ms = generator.last_ms;
    }
    if ms == generator.last_ms {
        generator.sequence = (generator.sequence + 1) & SEQUENCE_MASK;
        if generator.sequence == 0 {
            // Sequence exhausted for this millisecond; move to the next tick.
            ms += 1;
        }
    } else {
        generator.sequence = 0;
    }
    generator.last_ms = ms;
    let id = (ms << (NODE_BITS + SEQUENCE_BITS)) | (generator.node << SEQUENCE_BITS) | generator.sequence;
    id as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let ids: Vec<i64> = (0..4096).map(|_| next_id()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn ids_are_positive() {
        for _ in 0..64 {
            assert!(next_id() > 0);
        }
    }
}
