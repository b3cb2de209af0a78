//! Liquid water retrieval from the 970 nm absorption feature.
//!
//! Within a window bounded by two spectral shoulders, reflectance is modelled
//! with Beer-Lambert attenuation over a linear continuum:
//!
//! `rho(wl) = (a + b * wl) * exp(-ewt * 1e7 * alpha(wl))`
//!
//! where `alpha = 4 * pi * k / wl` is the absorption coefficient of liquid
//! water in nm^-1, `ewt` is the equivalent water thickness in cm, and the
//! factor `1e7` converts cm to nm. The parameters are found by a bounded
//! Levenberg-Marquardt least-squares fit.

use crate::core::inversion::{Estimate, Inversion};
use crate::types::{CwcError, CwcResult};
use ndarray::{s, Array1, Array2, ArrayView1};
use num_traits::Float;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

/// Centimetres to nanometres
const PATH_SCALE: f64 = 1e7;

const DEFAULT_WAVELENGTH_COLUMN: &str = "wvl_6";
const DEFAULT_K_COLUMN: &str = "T = 20°C";

/// Fit window and solver settings
#[derive(Debug, Clone, PartialEq)]
pub struct WaterFitParams {
    /// Left shoulder of the absorption feature (nm)
    pub left_shoulder: f64,
    /// Right shoulder of the absorption feature (nm)
    pub right_shoulder: f64,
    /// Starting point [ewt, offset, slope]
    pub initial: [f64; 3],
    /// Upper bound on the retrieved ewt (cm)
    pub ewt_detection_limit: f64,
    pub offset_bounds: (f64, f64),
    pub slope_bounds: (f64, f64),
    /// Cap on residual evaluations per spectrum
    pub max_evaluations: usize,
}

impl Default for WaterFitParams {
    fn default() -> Self {
        Self {
            left_shoulder: 850.0,
            right_shoulder: 1100.0,
            initial: [0.02, 0.3, 0.0002],
            ewt_detection_limit: 0.5,
            offset_bounds: (0.0, 1.0),
            slope_bounds: (-0.0004, 0.0004),
            max_evaluations: 15,
        }
    }
}

impl WaterFitParams {
    fn bounds(&self) -> [(f64, f64); 3] {
        [
            (0.0, self.ewt_detection_limit),
            self.offset_bounds,
            self.slope_bounds,
        ]
    }
}

/// Imaginary part of the refractive index of liquid water over wavelength (nm)
#[derive(Debug, Clone, PartialEq)]
pub struct RefractiveIndexTable {
    wavelengths: Vec<f64>,
    k: Vec<f64>,
}

impl RefractiveIndexTable {
    pub fn new(wavelengths: Vec<f64>, k: Vec<f64>) -> CwcResult<Self> {
        if wavelengths.len() != k.len() || wavelengths.len() < 2 {
            return Err(CwcError::Config(format!(
                "Refractive index table needs at least 2 matching rows, got {} wavelengths and {} k values",
                wavelengths.len(),
                k.len()
            )));
        }
        let mut rows: Vec<(f64, f64)> = wavelengths.into_iter().zip(k).collect();
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (wavelengths, k) = rows.into_iter().unzip();
        Ok(Self { wavelengths, k })
    }

    /// Load from a CSV using the default column names
    pub fn from_csv<P: AsRef<Path>>(path: P) -> CwcResult<Self> {
        Self::from_csv_columns(path, DEFAULT_WAVELENGTH_COLUMN, DEFAULT_K_COLUMN)
    }

    pub fn from_csv_columns<P: AsRef<Path>>(
        path: P,
        wavelength_column: &str,
        k_column: &str,
    ) -> CwcResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading refractive index table: {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::parse_csv(&text, wavelength_column, k_column)
    }

    /// Rows are read until the first one with an empty or non-numeric cell in either column
    pub fn parse_csv(text: &str, wavelength_column: &str, k_column: &str) -> CwcResult<Self> {
        let mut lines = text.lines();
        let header: Vec<&str> = lines
            .next()
            .ok_or_else(|| CwcError::Config("Refractive index table is empty".to_string()))?
            .split(',')
            .map(|c| c.trim().trim_matches('"'))
            .collect();

        let column = |name: &str| {
            header.iter().position(|c| *c == name).ok_or_else(|| {
                CwcError::Config(format!("Refractive index table has no column '{}'", name))
            })
        };
        let wl_idx = column(wavelength_column)?;
        let k_idx = column(k_column)?;

        let mut wavelengths = Vec::new();
        let mut k = Vec::new();
        for line in lines {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            let parsed = (
                cells.get(wl_idx).and_then(|c| c.parse::<f64>().ok()),
                cells.get(k_idx).and_then(|c| c.parse::<f64>().ok()),
            );
            match parsed {
                (Some(w), Some(kv)) => {
                    wavelengths.push(w);
                    k.push(kv);
                }
                _ => break,
            }
        }

        Self::new(wavelengths, k)
    }

    /// Linear interpolation of k, clamped to the table's end values
    pub fn k_at(&self, wavelength: f64) -> f64 {
        interp(wavelength, &self.wavelengths, &self.k)
    }
}

/// Piecewise-linear interpolation over ascending `xp`, clamped outside its range
pub fn interp<T: Float>(x: T, xp: &[T], fp: &[T]) -> T {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return T::nan();
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    let hi = xp[..n].partition_point(|&v| v <= x);
    let lo = hi - 1;
    let span = xp[hi] - xp[lo];
    if span == T::zero() {
        return fp[lo];
    }
    fp[lo] + (fp[hi] - fp[lo]) * (x - xp[lo]) / span
}

/// Absorption coefficients over the fit window, reused across spectra
#[derive(Debug, Clone, PartialEq)]
pub struct AbsorptionCoefficients {
    /// Band index range `[start, stop)` of the fit window
    pub start: usize,
    pub stop: usize,
    /// alpha per band in the window (nm^-1)
    pub alpha: Array1<f64>,
}

/// Outcome of the bounded fit
#[derive(Debug, Clone, PartialEq)]
pub struct WaterFit {
    pub ewt: f64,
    pub offset: f64,
    pub slope: f64,
    pub cost: f64,
    pub evaluations: usize,
}

/// Equivalent water thickness retrieval
#[derive(Debug, Clone)]
pub struct LiquidWaterInversion {
    params: WaterFitParams,
    table: RefractiveIndexTable,
}

impl LiquidWaterInversion {
    pub fn new(table: RefractiveIndexTable) -> Self {
        Self::with_params(table, WaterFitParams::default())
    }

    pub fn with_params(table: RefractiveIndexTable, params: WaterFitParams) -> Self {
        Self { params, table }
    }

    pub fn params(&self) -> &WaterFitParams {
        &self.params
    }

    /// Band window between the bands nearest each shoulder, inclusive
    pub fn window(&self, wavelengths: ArrayView1<f64>) -> CwcResult<(usize, usize)> {
        let nearest = |target: f64| {
            wavelengths
                .iter()
                .enumerate()
                .fold(None, |best: Option<(usize, f64)>, (i, &w)| {
                    let d = (w - target).abs();
                    match best {
                        Some((_, bd)) if bd <= d => best,
                        _ => Some((i, d)),
                    }
                })
                .map(|(i, _)| i)
        };

        let (Some(left), Some(right)) = (
            nearest(self.params.left_shoulder),
            nearest(self.params.right_shoulder),
        ) else {
            return Err(CwcError::InvalidFormat("Empty wavelength grid".to_string()));
        };

        let stop = right + 1;
        if stop <= left || stop - left < 3 {
            return Err(CwcError::InvalidFormat(format!(
                "Fit window {}..{} nm covers too few bands ({}..={})",
                self.params.left_shoulder, self.params.right_shoulder, left, right
            )));
        }
        Ok((left, stop))
    }

    /// alpha = 4 pi k / wl over the fit window
    pub fn absorption(&self, wavelengths: ArrayView1<f64>) -> CwcResult<AbsorptionCoefficients> {
        let (start, stop) = self.window(wavelengths)?;
        let alpha = wavelengths
            .slice(s![start..stop])
            .mapv(|wl| 4.0 * PI * self.table.k_at(wl) / wl);
        Ok(AbsorptionCoefficients { start, stop, alpha })
    }

    /// Fit all three model parameters to a spectrum
    pub fn fit_spectrum(
        &self,
        spectrum: ArrayView1<f32>,
        wavelengths: ArrayView1<f64>,
        absorption: &AbsorptionCoefficients,
    ) -> CwcResult<WaterFit> {
        if spectrum.len() != wavelengths.len() {
            return Err(CwcError::InvalidFormat(format!(
                "Spectrum has {} bands but the wavelength grid has {}",
                spectrum.len(),
                wavelengths.len()
            )));
        }
        let AbsorptionCoefficients { start, stop, alpha } = absorption;
        let width = stop.checked_sub(*start);
        if *stop > spectrum.len() || width != Some(alpha.len()) {
            return Err(CwcError::InvalidFormat(format!(
                "Absorption window {}..{} ({} values) does not fit a {}-band spectrum",
                start,
                stop,
                alpha.len(),
                spectrum.len()
            )));
        }

        let wl = wavelengths.slice(s![*start..*stop]).to_owned();
        let measured = spectrum.slice(s![*start..*stop]).mapv(f64::from);
        Ok(self.least_squares(&wl, &measured, alpha))
    }

    fn least_squares(&self, wl: &Array1<f64>, measured: &Array1<f64>, alpha: &Array1<f64>) -> WaterFit {
        let bounds = self.params.bounds();
        let mut x = clamp(self.params.initial, &bounds);
        let mut resid = residuals(&x, wl, measured, alpha);
        let mut cost = 0.5 * resid.dot(&resid);
        let mut evaluations = 1;
        let mut lambda = 1e-3;

        while evaluations < self.params.max_evaluations {
            let jac = jacobian(&x, wl, alpha);
            let jtj = jac.t().dot(&jac);
            let grad = jac.t().dot(&resid);

            let mut lhs = [[0.0; 3]; 3];
            let mut rhs = [0.0; 3];
            for i in 0..3 {
                for k in 0..3 {
                    lhs[i][k] = jtj[[i, k]];
                }
                lhs[i][i] += lambda * jtj[[i, i]].max(1e-12);
                rhs[i] = -grad[i];
            }

            let Some(step) = solve3(lhs, rhs) else {
                lambda *= 10.0;
                if lambda > 1e10 {
                    break;
                }
                continue;
            };

            let candidate = clamp([x[0] + step[0], x[1] + step[1], x[2] + step[2]], &bounds);
            if candidate == x {
                break;
            }

            let trial = residuals(&candidate, wl, measured, alpha);
            evaluations += 1;
            let trial_cost = 0.5 * trial.dot(&trial);

            if trial_cost < cost {
                let improvement = cost - trial_cost;
                let moved = (0..3)
                    .map(|i| (candidate[i] - x[i]).abs() / (x[i].abs() + 1e-8))
                    .fold(0.0, f64::max);
                x = candidate;
                resid = trial;
                cost = trial_cost;
                lambda = (lambda * 0.3).max(1e-12);
                if improvement < 1e-10 * cost || moved < 1e-10 {
                    break;
                }
            } else {
                lambda *= 10.0;
                if lambda > 1e10 {
                    break;
                }
            }
        }

        WaterFit {
            ewt: x[0],
            offset: x[1],
            slope: x[2],
            cost,
            evaluations,
        }
    }
}

impl Inversion for LiquidWaterInversion {
    type Calibration = AbsorptionCoefficients;

    fn invert(
        &self,
        spectrum: ArrayView1<f32>,
        wavelengths: ArrayView1<f64>,
        calibration: Option<&AbsorptionCoefficients>,
    ) -> CwcResult<Estimate<AbsorptionCoefficients>> {
        match calibration {
            Some(absorption) => {
                let fit = self.fit_spectrum(spectrum, wavelengths, absorption)?;
                Ok(Estimate::new(fit.ewt, None))
            }
            None => {
                let absorption = self.absorption(wavelengths)?;
                let fit = self.fit_spectrum(spectrum, wavelengths, &absorption)?;
                Ok(Estimate::new(fit.ewt, Some(absorption)))
            }
        }
    }
}

fn clamp(x: [f64; 3], bounds: &[(f64, f64); 3]) -> [f64; 3] {
    let mut out = x;
    for (v, (lo, hi)) in out.iter_mut().zip(bounds.iter()) {
        *v = v.clamp(*lo, *hi);
    }
    out
}

fn residuals(x: &[f64; 3], wl: &Array1<f64>, measured: &Array1<f64>, alpha: &Array1<f64>) -> Array1<f64> {
    let attenuation = alpha.mapv(|a| (-x[0] * PATH_SCALE * a).exp());
    (wl * x[2] + x[1]) * &attenuation - measured
}

fn jacobian(x: &[f64; 3], wl: &Array1<f64>, alpha: &Array1<f64>) -> Array2<f64> {
    let n = wl.len();
    let mut jac = Array2::zeros((n, 3));
    for i in 0..n {
        let attenuation = (-x[0] * PATH_SCALE * alpha[i]).exp();
        let continuum = x[1] + x[2] * wl[i];
        jac[[i, 0]] = -continuum * attenuation * PATH_SCALE * alpha[i];
        jac[[i, 1]] = attenuation;
        jac[[i, 2]] = wl[i] * attenuation;
    }
    jac
}

/// Gaussian elimination with partial pivoting; None when singular
fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}
