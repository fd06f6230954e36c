//! Type definitions for the compression domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;
use crate::errors::{DomainError, DomainResult, ValidationError};

/// Named aggressiveness level chosen by the uploader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CompressionTier {
    /// Keep visual fidelity, strip nothing
    Light,

    /// Default balance between size and quality
    Recommended,

    /// Smallest output, lowest fidelity
    Extreme,
}

impl CompressionTier {
    pub const ALL: [CompressionTier; 3] = [
        CompressionTier::Light,
        CompressionTier::Recommended,
        CompressionTier::Extreme,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionTier::Light => "light",
            CompressionTier::Recommended => "recommended",
            CompressionTier::Extreme => "extreme",
        }
    }
}

impl Default for CompressionTier {
    fn default() -> Self {
        CompressionTier::Recommended
    }
}

impl fmt::Display for CompressionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionTier {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(CompressionTier::Light),
            "recommended" => Ok(CompressionTier::Recommended),
            "extreme" => Ok(CompressionTier::Extreme),
            _ => Err(DomainError::Validation(ValidationError::invalid_value(
                "tier",
                &format!("'{}' is not one of light, recommended, extreme", s),
            ))),
        }
    }
}

/// How the final bytes were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionMethod {
    /// Produced entirely by the external tool
    #[serde(rename = "external-tool")]
    ExternalTool,

    /// Produced by the in-process transform loop
    #[serde(rename = "in-process")]
    InProcess,

    /// External tool output refined by the in-process loop
    #[serde(rename = "hybrid")]
    Hybrid,
}

impl CompressionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::ExternalTool => "external-tool",
            CompressionMethod::InProcess => "in-process",
            CompressionMethod::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied compression job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionRequest {
    pub request_id: Uuid,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub tier: CompressionTier,
}

impl CompressionRequest {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        tier: CompressionTier,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            tier,
        }
    }
}

/// Numeric parameters derived from a tier and the original size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionProfile {
    pub tier: CompressionTier,
    pub target_size_kb: u64,
    pub quality: u8,
    pub scale: f32,
    pub remove_metadata: bool,
    pub remove_annotations: bool,
    pub recompress_images: bool,
    pub max_page_width: f32,
    pub max_page_height: f32,
}

impl CompressionProfile {
    pub fn target_size_bytes(&self) -> u64 {
        self.target_size_kb * 1024
    }
}

/// Result from a compression operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionResult {
    pub request_id: Uuid,
    pub tier: CompressionTier,
    pub original_size_bytes: u64,
    pub compressed_size_bytes: u64,
    pub original_size_kb: f64,
    pub compressed_size_kb: f64,
    pub target_size_kb: u64,
    pub compression_ratio: i64,
    pub output_path: PathBuf,
    pub output_sha256: String,
    pub method_used: CompressionMethod,
    pub iterations: u32,
    pub target_reached: bool,
    pub duration_ms: i64,
    pub completed_at: DateTime<Utc>,
}

/// Percentage saved, rounded to the nearest whole percent.
pub fn compression_ratio(original_bytes: u64, compressed_bytes: u64) -> i64 {
    if original_bytes == 0 {
        return 0;
    }
    let saved = original_bytes as f64 - compressed_bytes as f64;
    (saved / original_bytes as f64 * 100.0).round() as i64
}

pub fn bytes_to_kb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

/// Aggregate over a batch of results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionStats {
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    pub space_saved: u64,
    pub compression_ratio: i64,
    pub total_files_compressed: u64,
    pub total_files_failed: u64,
    pub total_files_target_reached: u64,
    pub external_tool_count: u64,
    pub in_process_count: u64,
    pub hybrid_count: u64,
}

impl CompressionStats {
    pub fn from_results(results: &[DomainResult<CompressionResult>]) -> Self {
        let mut stats = CompressionStats::default();
        for outcome in results {
            match outcome {
                Ok(result) => {
                    stats.total_files_compressed += 1;
                    stats.total_original_size += result.original_size_bytes;
                    stats.total_compressed_size += result.compressed_size_bytes;
                    if result.target_reached {
                        stats.total_files_target_reached += 1;
                    }
                    match result.method_used {
                        CompressionMethod::ExternalTool => stats.external_tool_count += 1,
                        CompressionMethod::InProcess => stats.in_process_count += 1,
                        CompressionMethod::Hybrid => stats.hybrid_count += 1,
                    }
                }
                Err(_) => stats.total_files_failed += 1,
            }
        }
        stats.space_saved = stats.total_original_size.saturating_sub(stats.total_compressed_size);
        stats.compression_ratio = compression_ratio(stats.total_original_size, stats.total_compressed_size);
        stats
    }
}

/// Cooperative cancellation shared between a caller and a running request.
/// The engine checks it between steps; a cancelled request writes nothing.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            Err(DomainError::Cancelled)
        } else {
            Ok(())
        }
    }
}
