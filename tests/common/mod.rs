#![allow(dead_code)]

use cwc_retrieval::core::{Estimate, Inversion};
use cwc_retrieval::io::{envi_header, EnviHeader, HeaderValue};
use cwc_retrieval::{CwcError, CwcResult};
use ndarray::ArrayView1;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Write a float32 BIP reflectance cube whose values come from `value(line, sample, band)`
pub fn write_cube<F>(dir: &Path, name: &str, lines: usize, samples: usize, bands: usize, value: F) -> PathBuf
where
    F: Fn(usize, usize, usize) -> f32,
{
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    for l in 0..lines {
        for s in 0..samples {
            for b in 0..bands {
                file.write_all(&value(l, s, b).to_le_bytes()).unwrap();
            }
        }
    }

    let mut header = EnviHeader::new();
    header.set("description", HeaderValue::List(vec!["synthetic reflectance".to_string()]));
    header.set("samples", samples.to_string());
    header.set("lines", lines.to_string());
    header.set("bands", bands.to_string());
    header.set("header offset", "0");
    header.set("data type", "4");
    header.set("interleave", "bip");
    header.set("byte order", "0");
    header.set(
        "wavelength",
        HeaderValue::List((0..bands).map(|b| format!("{:.1}", wavelength(b, bands))).collect()),
    );
    header.set("emit pge input files", HeaderValue::List(vec!["granule.nc".to_string()]));
    header.write(envi_header(&path)).unwrap();
    path
}

/// Evenly spaced grid from 800 to 1200 nm
pub fn wavelength(band: usize, bands: usize) -> f64 {
    if bands < 2 {
        return 1000.0;
    }
    800.0 + 400.0 * band as f64 / (bands - 1) as f64
}

/// Smooth positive spectrum that differs per pixel
pub fn reflectance(line: usize, sample: usize, band: usize) -> f32 {
    0.1 + 0.05 * line as f32 + 0.01 * sample as f32 + 0.001 * band as f32
}

/// Read a float32 output raster as a flat vector
pub fn read_output(path: &Path) -> Vec<f32> {
    std::fs::read(path)
        .unwrap()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Mean of the spectrum, scaled by the calibration when one is passed.
///
/// An uncalibrated call returns the bare mean and hands back `1 + mean` as
/// the calibration, so a dropped calibration changes the output.
#[derive(Default)]
pub struct MeanInversion {
    pub calls: AtomicUsize,
    pub uncalibrated: AtomicUsize,
    /// Calibration passed to every calibrated call, in call order
    pub received: Mutex<Vec<f64>>,
    /// Fail on any spectrum whose first band equals this value
    pub fail_on: Option<f32>,
}

impl MeanInversion {
    pub fn failing_on(value: f32) -> Self {
        Self {
            fail_on: Some(value),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn uncalibrated_calls(&self) -> usize {
        self.uncalibrated.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<f64> {
        self.received.lock().unwrap().clone()
    }
}

impl Inversion for MeanInversion {
    type Calibration = f64;

    fn invert(
        &self,
        spectrum: ArrayView1<f32>,
        wavelengths: ArrayView1<f64>,
        calibration: Option<&f64>,
    ) -> CwcResult<Estimate<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match calibration {
            Some(&scale) => self.received.lock().unwrap().push(scale),
            None => {
                self.uncalibrated.fetch_add(1, Ordering::SeqCst);
            }
        }
        assert!(spectrum.iter().any(|&v| v >= 0.0), "no-data spectrum reached the inversion");
        if spectrum.len() != wavelengths.len() {
            return Err(CwcError::InvalidFormat("band mismatch".to_string()));
        }
        if Some(spectrum[0]) == self.fail_on {
            return Err(CwcError::InvalidFormat("synthetic failure".to_string()));
        }

        let mean = spectrum.iter().map(|&v| v as f64).sum::<f64>() / spectrum.len() as f64;
        match calibration {
            Some(scale) => Ok(Estimate::new(mean * scale, None)),
            None => Ok(Estimate::new(mean, Some(1.0 + mean))),
        }
    }
}
