//! Size-targeting PDF compression for uploaded tender documents.
//!
//! The engine picks a target from the file size and a tier, optionally hands
//! the file to Ghostscript, and shrinks it in process until the target is met
//! or the iteration cap is reached.

pub mod domains;
pub mod errors;

pub use domains::compression::{
    compress_pdf, select_profile, CancellationFlag, CompressionMethod, CompressionProfile,
    CompressionRequest, CompressionResult, CompressionService, CompressionServiceImpl,
    CompressionSettings, CompressionStats, CompressionTier,
};
pub use errors::{DomainError, DomainResult, ValidationError};

/// Initialize logging for binaries and embedders that do not set up their own
/// logger. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
