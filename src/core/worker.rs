use crate::core::inversion::Inversion;
use crate::io::cube::{is_no_data, SpectralCube};
use crate::io::output::OutputRaster;
use crate::types::{CwcError, CwcResult, LineRange, PartitionReport, FILL_VALUE};
use ndarray::{s, Array3, ArrayView1};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

const NO_FAILURE: usize = usize::MAX;

/// Run-wide stop signals shared by all workers, checked between lines
#[derive(Debug)]
pub struct RunControl {
    cancelled: AtomicBool,
    first_failure: AtomicUsize,
    deadline: Option<Instant>,
}

impl RunControl {
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            first_failure: AtomicUsize::new(NO_FAILURE),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Remember `partition` if no other partition has failed yet
    pub fn record_failure(&self, partition: usize) {
        let _ = self.first_failure.compare_exchange(
            NO_FAILURE,
            partition,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Index of the partition that failed first, if any
    pub fn first_failure(&self) -> Option<usize> {
        match self.first_failure.load(Ordering::SeqCst) {
            NO_FAILURE => None,
            idx => Some(idx),
        }
    }

    /// Boundary check performed before each line
    pub fn check(&self, range: LineRange, line: usize) -> CwcResult<()> {
        if self.is_cancelled() {
            return Err(CwcError::Cancelled { range, line });
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CwcError::DeadlineExceeded { range, line });
            }
        }
        Ok(())
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Everything a worker needs besides its line range; all shared read-only
pub struct WorkerContext<'a, I: Inversion> {
    pub input: &'a Path,
    pub output: &'a OutputRaster,
    pub wavelengths: ArrayView1<'a, f64>,
    pub inversion: &'a I,
    pub calibration: Option<&'a I::Calibration>,
    pub control: &'a RunControl,
}

/// Process one partition end to end.
///
/// Opens its own mapping of the input and its own write handle on the
/// output, inverts every valid spectrum in `range`, and writes each line as
/// soon as it is done. Errors are wrapped with the partition's range.
pub fn run_partition<I: Inversion>(ctx: &WorkerContext<'_, I>, range: LineRange) -> CwcResult<PartitionReport> {
    process_lines(ctx, range).map_err(|e| CwcError::Worker {
        range,
        source: Box::new(e),
    })
}

fn process_lines<I: Inversion>(ctx: &WorkerContext<'_, I>, range: LineRange) -> CwcResult<PartitionReport> {
    log::debug!("Worker {} reading input {}", range, ctx.input.display());
    let cube = SpectralCube::open(ctx.input)?;
    let shape = cube.shape();
    let out_shape = ctx.output.shape();

    if range.stop > shape.lines {
        return Err(CwcError::OutOfRange {
            line: range.stop - 1,
            range: LineRange::new(0, shape.lines),
        });
    }
    if out_shape.lines != shape.lines || out_shape.samples != shape.samples {
        return Err(CwcError::InvalidFormat(format!(
            "Output raster {} does not match input {}",
            out_shape, shape
        )));
    }
    if ctx.wavelengths.len() != shape.bands {
        return Err(CwcError::InvalidFormat(format!(
            "{} wavelengths for a {}-band input",
            ctx.wavelengths.len(),
            shape.bands
        )));
    }

    let mut writer = ctx.output.line_writer(range)?;
    let mut block = Array3::from_elem((range.height(), shape.samples, 1), FILL_VALUE);
    let mut report = PartitionReport {
        range,
        inverted: 0,
        skipped: 0,
    };

    for line in range.start..range.stop {
        ctx.control.check(range, line)?;
        let row = line - range.start;
        let spectra = cube.line(line)?;

        for (sample, spectrum) in spectra.outer_iter().enumerate() {
            if is_no_data(spectrum.iter()) {
                report.skipped += 1;
                continue;
            }
            let estimate = ctx
                .inversion
                .invert(spectrum, ctx.wavelengths, ctx.calibration)
                .map_err(|e| CwcError::Inversion {
                    line,
                    sample,
                    message: e.to_string(),
                })?;
            block[[row, sample, 0]] = estimate.value as f32;
            report.inverted += 1;
        }

        log::info!("CWC writing line {}", line);
        writer.write_line(line, block.slice(s![row, .., 0]))?;
    }

    log::debug!(
        "Worker {} done: {} inverted, {} no-data",
        range,
        report.inverted,
        report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_control_cancellation() {
        let control = RunControl::default();
        let range = LineRange::new(0, 4);
        assert!(control.check(range, 0).is_ok());
        control.cancel();
        assert!(matches!(
            control.check(range, 2),
            Err(CwcError::Cancelled { line: 2, .. })
        ));
    }

    #[test]
    fn test_control_deadline() {
        let past = Instant::now() - Duration::from_millis(1);
        let control = RunControl::new(Some(past));
        assert!(matches!(
            control.check(LineRange::new(0, 1), 0),
            Err(CwcError::DeadlineExceeded { .. })
        ));
    }

    #[test]
    fn test_first_failure_wins() {
        let control = RunControl::default();
        assert_eq!(control.first_failure(), None);
        control.record_failure(3);
        control.record_failure(1);
        assert_eq!(control.first_failure(), Some(3));
    }
}
