//! Canopy water content retrieval for imaging spectroscopy
//!
//! Runs a per-spectrum liquid water inversion over every pixel of an ENVI
//! reflectance cube. Lines are split into disjoint partitions that are
//! processed concurrently, each worker streaming its finished lines straight
//! into a shared single-band output raster.

pub mod types;
pub mod io;
pub mod core;
pub mod logging;

// Re-export main types and functions for easier access
pub use types::{
    CwcError, CwcResult, LineRange, PartitionReport, RasterShape, RunDiagnostics, RunOutcome,
    FILL_VALUE,
};

pub use crate::io::{OutputRaster, RunPaths, SpectralCube};
pub use crate::core::{
    Inversion, LiquidWaterInversion, RefractiveIndexTable, RetrievalParams, RetrievalPipeline,
    WaterFitParams,
};
