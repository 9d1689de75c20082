//! Processor wake/park round-trip latency.
//!
//! `harness = false`: this crate depends on neither `criterion` nor
//! `test::Bencher`, so the bench is a plain `main` that times itself,
//! mirroring the teacher's own zero-extra-dependency bench setup.

use std::time::Instant;

use async_rt::options::RuntimeOptions;
use async_rt::rt;

const ROUND_TRIPS: u32 = 10_000;

fn main() {
    rt::setup(RuntimeOptions::new().with_virtual_numa_nodes(1)).expect("setup");

    // Warm up: let the processor thread reach its park loop once before
    // timing starts.
    rt::spawn(|| ()).get().unwrap();

    let start = Instant::now();
    for _ in 0..ROUND_TRIPS {
        let result = rt::spawn(|| 1u32 + 1);
        assert_eq!(result.get().unwrap(), 2);
    }
    let elapsed = start.elapsed();

    rt::terminate();

    println!(
        "{ROUND_TRIPS} spawn/resume round trips in {elapsed:?} ({:.3} us/trip)",
        elapsed.as_secs_f64() * 1_000_000.0 / f64::from(ROUND_TRIPS)
    );
}
