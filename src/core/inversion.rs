use crate::types::CwcResult;
use ndarray::ArrayView1;
use std::fmt::Debug;

/// Primary estimate plus an optional reusable calibration artifact
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate<C> {
    pub value: f64,
    pub calibration: Option<C>,
}

impl<C> Estimate<C> {
    pub fn new(value: f64, calibration: Option<C>) -> Self {
        Self { value, calibration }
    }
}

/// Per-spectrum retrieval of a scalar quantity.
///
/// Implementations must be deterministic for identical inputs. Callers
/// filter out no-data spectra before invoking them.
pub trait Inversion: Sync {
    /// Setup value produced by one call and handed back to later calls
    type Calibration: Clone + Send + Sync + Debug;

    fn invert(
        &self,
        spectrum: ArrayView1<f32>,
        wavelengths: ArrayView1<f64>,
        calibration: Option<&Self::Calibration>,
    ) -> CwcResult<Estimate<Self::Calibration>>;
}
