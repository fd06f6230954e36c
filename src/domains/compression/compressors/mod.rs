//! External document compressors the orchestrator can delegate to.

pub mod ghostscript;

use async_trait::async_trait;
use std::path::Path;
use crate::errors::{DomainError, DomainResult};
use super::types::CompressionTier;

pub use ghostscript::GhostscriptCompressor;

/// A host-installed compressor invoked out of process
#[async_trait]
pub trait ExternalCompressor: Send + Sync {
    /// Check the host. Never fails: anything unexpected means unavailable.
    async fn is_available(&self) -> bool;

    /// Compress `input_path` into `output_path` and return the bytes written there.
    async fn compress(
        &self,
        input_path: &Path,
        output_path: &Path,
        tier: CompressionTier,
    ) -> DomainResult<Vec<u8>>;

    /// Name used in log lines
    fn compressor_name(&self) -> &'static str;
}

/// Stand-in for hosts without any external tool
pub struct UnavailableCompressor;

#[async_trait]
impl ExternalCompressor for UnavailableCompressor {
    async fn is_available(&self) -> bool {
        false
    }

    async fn compress(
        &self,
        _input_path: &Path,
        _output_path: &Path,
        _tier: CompressionTier,
    ) -> DomainResult<Vec<u8>> {
        Err(DomainError::ToolFailure("no external compressor configured".to_string()))
    }

    fn compressor_name(&self) -> &'static str {
        "UnavailableCompressor"
    }
}
