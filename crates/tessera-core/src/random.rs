//! Process-seeded thread-local randomness.
//!
//! Each thread owns its own small PRNG seeded from the process seed plus
//! a per-thread counter, so samplers never contend on shared state and a
//! fixed seed reproduces each thread's sequence.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

static PROCESS_SEED: AtomicU64 = AtomicU64::new(0x7e55_e7a5_eed0_0001);
static THREAD_COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_RNG: RefCell<SmallRng> = RefCell::new(new_thread_rng());
}

fn new_thread_rng() -> SmallRng {
    let seed = PROCESS_SEED.load(Ordering::Relaxed);
    let thread_id = THREAD_COUNTER.fetch_add(1, Ordering::Relaxed);
    SmallRng::seed_from_u64(seed ^ thread_id.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

/// Set the process seed. Only affects threads whose RNG has not been
/// created yet, so call it before spawning workers.
pub fn set_process_seed(seed: u64) {
    PROCESS_SEED.store(seed, Ordering::Relaxed);
}

/// Uniform draw in `[0, 1)` from the calling thread's PRNG.
pub fn thread_uniform() -> f32 {
    THREAD_RNG.with(|rng| rng.borrow_mut().gen::<f32>())
}

/// Uniform draw in `[0, n)`.
pub fn thread_index(n: usize) -> usize {
    THREAD_RNG.with(|rng| rng.borrow_mut().gen_range(0..n))
}

/// Pick a bucket from a running prefix-sum weight array restricted to
/// `[begin, end]` (inclusive). Draws r uniform in the covered weight
/// range and binary-searches the interval containing it. Ties at
/// interval boundaries resolve to the leftmost bucket because intervals
/// are half-open on the right.
pub fn random_select(sum_weights: &[f32], begin: usize, end: usize) -> usize {
    let limit_begin = if begin == 0 {
        0.0
    } else {
        sum_weights[begin - 1]
    };
    let limit_end = sum_weights[end];
    let r = thread_uniform() * (limit_end - limit_begin) + limit_begin;
    let (mut low, mut high) = (begin, end);
    let mut mid = begin;
    while low <= high {
        mid = (low + high) / 2;
        let interval_begin = if mid == 0 { 0.0 } else { sum_weights[mid - 1] };
        let interval_end = sum_weights[mid];
        if interval_begin <= r && r < interval_end {
            break;
        } else if interval_begin > r {
            if mid == 0 {
                break;
            }
            high = mid - 1;
        } else {
            low = mid + 1;
        }
    }
    mid
}
