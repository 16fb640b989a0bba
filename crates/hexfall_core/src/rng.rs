//! Random number port.
//!
//! Trait rolls, gender rolls and name generation must be reproducible in
//! synchronized (multiplayer/replay) contexts. Callers there inject a
//! [`SeededRng`] fed from the shared game seed; when no source is supplied
//! the engine falls back to a process-local nondeterministic stream.
//! Mixing the two within one decision is a correctness bug, so every
//! operation takes the optional source once and threads it through.

use std::cell::RefCell;

/// Source of random integers for the engine.
///
/// The engine never seeds or owns the injected source; it only draws.
pub trait RandomSource {
    /// Next raw random value.
    fn next_random(&mut self) -> u32;
}

/// Simple deterministic RNG (splitmix-style multiply/add stream).
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    /// Create a stream from a seed. Equal seeds give equal streams.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(0x9E37_79B9_7F4A_7C15),
        }
    }

    fn next(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(0x5_DEEC_E66D).wrapping_add(11);
        self.state
    }
}

impl RandomSource for SeededRng {
    fn next_random(&mut self) -> u32 {
        (self.next() >> 16) as u32
    }
}

thread_local! {
    static FALLBACK: RefCell<SeededRng> = RefCell::new(SeededRng::new(time_seed()));
}

fn time_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as u64,
        Err(_) => 0x5EED,
    }
}

/// Draw from the process-local fallback stream.
///
/// Only for convenience paths where no deterministic source was injected
/// (single-player scripting); never valid in a synchronized context.
#[must_use]
pub fn fallback_random() -> u32 {
    FALLBACK.with(|rng| rng.borrow_mut().next_random())
}

/// Draw from `rng` when present, the fallback stream otherwise.
#[must_use]
pub fn draw(rng: Option<&mut (dyn RandomSource + '_)>) -> u32 {
    match rng {
        Some(r) => r.next_random(),
        None => fallback_random(),
    }
}
