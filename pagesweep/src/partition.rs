use crate::types::{PageRange, UnitId};

/// Split pages `1..=total_pages` into contiguous ranges, one per worker.
///
/// Never yields more ranges than pages. The first `total_pages % workers`
/// ranges get one extra page, so range sizes differ by at most one.
/// Zero pages yields no ranges.
pub fn partition(unit_id: &UnitId, total_pages: u32, worker_budget: usize) -> Vec<PageRange> {
    if total_pages == 0 {
        return Vec::new();
    }

    let workers = u32::try_from(worker_budget.max(1)).unwrap_or(u32::MAX).min(total_pages);
    let base = total_pages / workers;
    let remainder = total_pages % workers;

    let mut ranges = Vec::with_capacity(workers as usize);
    let mut start = 1;
    for index in 0..workers {
        let size = base + u32::from(index < remainder);
        let end = start + (size - 1);
        ranges.push(PageRange { unit_id: unit_id.clone(), start_page: start, end_page: end, worker_id: index as usize + 1 });
        // the last range may end on u32::MAX
        start = end.saturating_add(1);
    }
    ranges
}
