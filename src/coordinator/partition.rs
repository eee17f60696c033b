use crate::protocol::IterationRange;

/// Splits the ascending `pool` across `workers` in the order given.
///
/// Chunks are `floor(n/k)` or `ceil(n/k)` long with the first `n mod k`
/// workers taking the extra index. A worker owns one contiguous range, so a
/// chunk that spans a gap in the pool only yields its leading contiguous
/// run; the remainder stays in the pool for the next pass. Workers whose
/// chunk is empty get no entry.
///
/// A fragmented pool therefore drains one contiguous run per worker per
/// assign round trip. A pool of scattered single indices, left behind by
/// lost workers, costs one round trip per index for a lone worker.
#[must_use]
pub fn partition<W: Clone>(pool: &[u64], workers: &[W]) -> Vec<(W, IterationRange)> {
    let total = pool.len();
    let Some(base) = total.checked_div(workers.len()) else {
        return Vec::new();
    };
    let extra = total.checked_rem(workers.len()).unwrap_or(0);

    let mut assignments = Vec::with_capacity(workers.len().min(total));
    let mut offset = 0usize;
    for (position, worker) in workers.iter().enumerate() {
        let size = if position < extra {
            base.saturating_add(1)
        } else {
            base
        };
        let chunk_end = offset.saturating_add(size).min(total);
        let chunk = pool.get(offset..chunk_end).unwrap_or_default();
        offset = chunk_end;
        if let Some(range) = leading_run(chunk) {
            assignments.push((worker.clone(), range));
        }
    }
    assignments
}

fn leading_run(chunk: &[u64]) -> Option<IterationRange> {
    let (&first, rest) = chunk.split_first()?;
    let mut last = first;
    for &index in rest {
        if Some(index) != last.checked_add(1) {
            break;
        }
        last = index;
    }
    IterationRange::new(first, last).ok()
}
