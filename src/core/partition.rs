use crate::types::{CwcError, CwcResult, LineRange};

/// Split `[0, lines)` at `breakpoints` evenly spaced integer positions.
///
/// Breakpoint `i` sits at `floor(i * lines / (breakpoints - 1))`, so the
/// first is 0 and the last is `lines`; consecutive breakpoints bound one
/// range, and the final range absorbs any remainder. Ranges that would be
/// empty (only when `lines < breakpoints - 1`) are dropped. The result is
/// ordered, contiguous, non-overlapping and covers every line exactly once.
pub fn partition_lines(lines: usize, breakpoints: usize) -> CwcResult<Vec<LineRange>> {
    if breakpoints < 2 {
        return Err(CwcError::Config(format!(
            "At least 2 breakpoints are needed to partition lines, got {}",
            breakpoints
        )));
    }
    if lines == 0 {
        return Err(CwcError::Config("Cannot partition an image with 0 lines".to_string()));
    }

    let intervals = breakpoints - 1;
    let breaks: Vec<usize> = (0..breakpoints)
        .map(|i| (i as u128 * lines as u128 / intervals as u128) as usize)
        .collect();

    Ok(breaks
        .windows(2)
        .map(|w| LineRange::new(w[0], w[1]))
        .filter(|range| !range.is_empty())
        .collect())
}

/// One partition per worker: plans with `workers + 1` breakpoints
pub fn plan_partitions(lines: usize, workers: usize) -> CwcResult<Vec<LineRange>> {
    if workers == 0 {
        return Err(CwcError::Config("Worker count must be at least 1".to_string()));
    }
    partition_lines(lines, workers + 1)
}
