use crate::core::inversion::Inversion;
use crate::core::partition::plan_partitions;
use crate::core::worker::{run_partition, RunControl, WorkerContext};
use crate::io::cube::{is_no_data, SpectralCube};
use crate::io::output::{derive_output_header, fill_status, OutputRaster};
use crate::types::{CwcError, CwcResult, LineRange, PartitionReport, RunDiagnostics, RunOutcome};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

/// Default size of the worker pool
pub const DEFAULT_WORKERS: usize = 40;

pub const DEFAULT_DESCRIPTION: &str = "L2A Canopy Water Content / Equivalent Water Thickness";

/// Orchestration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalParams {
    /// Pool size and number of line partitions
    pub workers: usize,
    /// Stop sibling workers at their next line once one worker fails
    pub cancel_on_failure: bool,
    /// Optional wall-clock limit for the parallel phase
    pub deadline: Option<Duration>,
    /// Written to the output header
    pub description: String,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cancel_on_failure: true,
            deadline: None,
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

/// Runs an [`Inversion`] over every pixel of a reflectance cube
pub struct RetrievalPipeline<I: Inversion> {
    params: RetrievalParams,
    inversion: I,
}

impl<I: Inversion> RetrievalPipeline<I> {
    pub fn new(inversion: I) -> Self {
        Self::with_params(inversion, RetrievalParams::default())
    }

    pub fn with_params(inversion: I, params: RetrievalParams) -> Self {
        Self { params, inversion }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn inversion(&self) -> &I {
        &self.inversion
    }

    /// Retrieve `input` into `output`.
    ///
    /// Returns [`RunOutcome::AlreadyComplete`] without touching the input when
    /// `output` already holds no fill values. Lines written before a failure
    /// stay on disk; a rerun recomputes because fill values remain.
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> CwcResult<RunOutcome> {
        let input = input.as_ref();
        let output = output.as_ref();

        if self.params.workers == 0 {
            return Err(CwcError::Config("Worker count must be at least 1".to_string()));
        }

        if output_is_complete(output) {
            log::info!("Existing CWC file found at {}, terminating", output.display());
            return Ok(RunOutcome::AlreadyComplete);
        }

        let cube = SpectralCube::open(input)?;
        let shape = cube.shape();
        let wavelengths = cube.wavelengths()?;
        log::info!("Reflectance {} is {}", input.display(), shape);

        let calibration = self.seed_calibration(&cube, wavelengths.view())?;

        let header = derive_output_header(cube.header(), &self.params.description);
        drop(cube);
        let raster = OutputRaster::create(output, &header)?;
        log::info!("init cwc created");

        let partitions = plan_partitions(shape.lines, self.params.workers)?;
        log::info!(
            "Planned {} partitions over {} lines for {} workers",
            partitions.len(),
            shape.lines,
            self.params.workers
        );

        let start = Instant::now();
        let control = RunControl::new(self.params.deadline.map(|d| start + d));
        let ctx = WorkerContext {
            input,
            output: &raster,
            wavelengths: wavelengths.view(),
            inversion: &self.inversion,
            calibration: calibration.as_ref(),
            control: &control,
        };

        log::info!("Beginning parallel CWC inversions");
        let results = self.dispatch(&ctx, &partitions)?;
        let reports = collect_reports(results, &control)?;

        let diagnostics = RunDiagnostics::from_reports(&reports, self.params.workers, start.elapsed());
        log::info!(
            "CWC inversions complete.  {:.2}s total, {:.4} spectra/s, {:.4} spectra/s/core",
            diagnostics.elapsed.as_secs_f64(),
            diagnostics.spectra_per_second,
            diagnostics.spectra_per_second_per_worker
        );
        Ok(RunOutcome::Completed(diagnostics))
    }

    /// Invert pixel (0, 0) twice: once to build the calibration, once to exercise it.
    pub fn seed_calibration(
        &self,
        cube: &SpectralCube,
        wavelengths: ArrayView1<f64>,
    ) -> CwcResult<Option<I::Calibration>> {
        log::info!("init inversion");
        let seed = cube.spectrum(0, 0)?;
        if is_no_data(seed.iter()) {
            return Err(CwcError::Calibration(
                "seed pixel (0, 0) holds a no-data spectrum".to_string(),
            ));
        }

        let first = self
            .inversion
            .invert(seed.view(), wavelengths, None)
            .map_err(|e| CwcError::Calibration(e.to_string()))?;
        let calibration = first.calibration;

        let second = self
            .inversion
            .invert(seed.view(), wavelengths, calibration.as_ref())
            .map_err(|e| CwcError::Calibration(e.to_string()))?;
        log::debug!(
            "Seed estimates: uncalibrated {}, calibrated {}",
            first.value,
            second.value
        );

        log::info!("init inversion complete");
        Ok(calibration)
    }

    #[cfg(feature = "parallel")]
    fn dispatch(
        &self,
        ctx: &WorkerContext<'_, I>,
        partitions: &[LineRange],
    ) -> CwcResult<Vec<CwcResult<PartitionReport>>> {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.workers)
            .thread_name(|i| format!("cwc-worker-{}", i))
            .build()
            .map_err(|e| CwcError::Config(format!("Failed to build worker pool: {}", e)))?;

        Ok(pool.install(|| {
            partitions
                .par_iter()
                .with_max_len(1)
                .enumerate()
                .map(|(idx, &range)| self.run_worker(ctx, idx, range))
                .collect()
        }))
    }

    #[cfg(not(feature = "parallel"))]
    fn dispatch(
        &self,
        ctx: &WorkerContext<'_, I>,
        partitions: &[LineRange],
    ) -> CwcResult<Vec<CwcResult<PartitionReport>>> {
        Ok(partitions
            .iter()
            .enumerate()
            .map(|(idx, &range)| self.run_worker(ctx, idx, range))
            .collect())
    }

    fn run_worker(&self, ctx: &WorkerContext<'_, I>, idx: usize, range: LineRange) -> CwcResult<PartitionReport> {
        let result = run_partition(ctx, range);
        if let Err(e) = &result {
            if !e.is_cancellation() {
                log::error!("{}", e);
                ctx.control.record_failure(idx);
                if self.params.cancel_on_failure {
                    ctx.control.cancel();
                }
            }
        }
        result
    }
}

/// Existing output counts as complete only if it is readable and holds no fill values
fn output_is_complete(output: &Path) -> bool {
    if !output.exists() {
        return false;
    }
    match fill_status(output) {
        Ok(status) => {
            log::info!(
                "Existing output {} has {} of {} values unfilled",
                output.display(),
                status.filled,
                status.total
            );
            status.is_complete()
        }
        Err(e) => {
            log::warn!("Existing output {} is unreadable ({}), recomputing", output.display(), e);
            false
        }
    }
}

/// Reports of all partitions, or the failure that happened first
fn collect_reports(
    results: Vec<CwcResult<PartitionReport>>,
    control: &RunControl,
) -> CwcResult<Vec<PartitionReport>> {
    let mut reports = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (idx, result) in results.into_iter().enumerate() {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => failures.push((idx, e)),
        }
    }

    if failures.is_empty() {
        return Ok(reports);
    }

    log::error!(
        "{} of {} partitions did not complete",
        failures.len(),
        failures.len() + reports.len()
    );
    let pos = control
        .first_failure()
        .and_then(|first| failures.iter().position(|(idx, _)| *idx == first))
        .unwrap_or(0);
    Err(failures.swap_remove(pos).1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = RetrievalParams::default();
        assert_eq!(params.workers, 40);
        assert!(params.cancel_on_failure);
        assert_eq!(params.deadline, None);
    }

    #[test]
    fn test_params_from_partial_json() {
        let params: RetrievalParams = serde_json::from_str(r#"{"workers": 3}"#).unwrap();
        assert_eq!(params.workers, 3);
        assert_eq!(params.description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn test_collect_prefers_first_recorded_failure() {
        let control = RunControl::default();
        control.record_failure(2);
        let a = LineRange::new(0, 1);
        let b = LineRange::new(1, 2);
        let c = LineRange::new(2, 3);
        let results = vec![
            Ok(PartitionReport { range: a, inverted: 1, skipped: 0 }),
            Err(CwcError::Worker { range: b, source: Box::new(CwcError::Cancelled { range: b, line: 1 }) }),
            Err(CwcError::Worker { range: c, source: Box::new(CwcError::Config("boom".to_string())) }),
        ];
        let err = collect_reports(results, &control).unwrap_err();
        assert!(matches!(err, CwcError::Worker { range, .. } if range == c));
    }
}
