// Declare submodules for the compression domain
pub mod types;
pub mod policy;
pub mod transform;
mod images;
pub mod convergence;
pub mod compressors;
pub mod settings;
pub mod service;

#[cfg(test)]
mod fixtures;

pub use types::{
    CancellationFlag, CompressionMethod, CompressionProfile, CompressionRequest,
    CompressionResult, CompressionStats, CompressionTier,
};
pub use policy::select_profile;
pub use transform::{PageTransformEngine, TransformPlan, TransformReport};
pub use convergence::{ConvergenceOutcome, MAX_ITERATIONS};
pub use compressors::{ExternalCompressor, GhostscriptCompressor, UnavailableCompressor};
pub use settings::CompressionSettings;
pub use service::{compress_pdf, BatchReport, CompressionService, CompressionServiceImpl};
