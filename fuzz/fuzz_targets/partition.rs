#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&workers, rest)) = data.split_first() else {
        return;
    };
    let mut pool: Vec<u64> = rest.iter().map(|byte| u64::from(*byte)).collect();
    pool.sort_unstable();
    pool.dedup();

    let assignments = dirtysoap_coord::fuzzing::partition_input(&pool, usize::from(workers % 16));
    let mut covered = 0u64;
    let mut previous_end: Option<u64> = None;
    for (_, range) in &assignments {
        for index in range.indices() {
            debug_assert!(pool.binary_search(&index).is_ok());
        }
        if let Some(end) = previous_end {
            debug_assert!(range.start() > end);
        }
        previous_end = Some(range.end());
        covered = covered.saturating_add(range.len());
    }
    debug_assert!(covered <= pool.len() as u64);
    if workers % 16 > 0 && !pool.is_empty() {
        debug_assert!(!assignments.is_empty());
    }
});
