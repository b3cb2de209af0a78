//! Core retrieval modules

pub mod partition;
pub mod inversion;
pub mod water;
pub mod worker;
pub mod pipeline;

// Re-export main types
pub use partition::{partition_lines, plan_partitions};
pub use inversion::{Estimate, Inversion};
pub use water::{AbsorptionCoefficients, LiquidWaterInversion, RefractiveIndexTable, WaterFit, WaterFitParams};
pub use worker::{run_partition, RunControl, WorkerContext};
pub use pipeline::{RetrievalParams, RetrievalPipeline, DEFAULT_DESCRIPTION, DEFAULT_WORKERS};
