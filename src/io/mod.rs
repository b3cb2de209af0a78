//! Raster store and run directory I/O

pub mod envi;
pub mod cube;
pub mod output;
pub mod run_config;

pub use envi::{envi_header, DataType, EnviHeader, HeaderValue, Interleave};
pub use cube::{is_no_data, SpectralCube};
pub use output::{derive_output_header, fill_status, FillStatus, LineWriter, OutputRaster};
pub use run_config::RunPaths;
