use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;

use crate::errors::{DomainError, DomainResult};
use super::compressors::ExternalCompressor;
use super::convergence::{self, ConvergenceOutcome};
use super::policy::select_profile;
use super::settings::CompressionSettings;
use super::types::{
    bytes_to_kb, compression_ratio, CancellationFlag, CompressionMethod, CompressionProfile,
    CompressionRequest, CompressionResult, CompressionStats, CompressionTier,
};

/// Results of a batch, in request order, with their aggregate
#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<DomainResult<CompressionResult>>,
    pub stats: CompressionStats,
}

#[async_trait]
pub trait CompressionService: Send + Sync {
    /// Compress one PDF toward the size target of its tier
    async fn compress_pdf(&self, request: CompressionRequest) -> DomainResult<CompressionResult>;

    /// Same as `compress_pdf`, stopping early once `cancel` is raised.
    /// A cancelled or timed out request writes nothing.
    async fn compress_pdf_with_cancel(
        &self,
        request: CompressionRequest,
        cancel: CancellationFlag,
    ) -> DomainResult<CompressionResult>;

    /// Run independent requests with at most `max_concurrent` in flight,
    /// `max_concurrent_jobs` from the settings when `None`
    async fn compress_batch(
        &self,
        requests: Vec<CompressionRequest>,
        max_concurrent: Option<usize>,
    ) -> BatchReport;
}

pub struct CompressionServiceImpl {
    compressor: Arc<dyn ExternalCompressor>,
    settings: CompressionSettings,
}

impl CompressionServiceImpl {
    pub fn new(compressor: Arc<dyn ExternalCompressor>, settings: CompressionSettings) -> Self {
        Self { compressor, settings }
    }

    /// Service wired to the compressor the settings describe
    pub fn from_settings(settings: CompressionSettings) -> Self {
        Self::new(settings.build_compressor(), settings)
    }

    pub fn settings(&self) -> &CompressionSettings {
        &self.settings
    }

    async fn read_input(path: &Path) -> DomainResult<Vec<u8>> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| DomainError::InputRead(format!("{}: {}", path.display(), e)))?;

        let is_pdf = infer::get(&data)
            .map(|kind| kind.mime_type() == "application/pdf")
            .unwrap_or(false);
        if !is_pdf {
            return Err(DomainError::InputRead(format!("{} is not a PDF", path.display())));
        }
        Ok(data)
    }

    /// Run the external tool into a scratch file next to the output.
    /// The scratch file is removed on every path.
    async fn try_external(&self, request: &CompressionRequest) -> DomainResult<Vec<u8>> {
        let scratch = tempfile::Builder::new()
            .prefix(".squidjob-gs-")
            .suffix(".pdf")
            .tempfile_in(output_dir(&request.output_path))
            .map_err(|e| DomainError::ToolFailure(format!("could not create scratch file: {}", e)))?;

        self.compressor
            .compress(&request.input_path, scratch.path(), request.tier)
            .await
    }

    /// In-process loop on the blocking pool
    async fn converge(
        seed: Vec<u8>,
        profile: CompressionProfile,
        cancel: &CancellationFlag,
    ) -> DomainResult<ConvergenceOutcome> {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || convergence::run_in_process(&seed, &profile, &cancel))
            .await
            .map_err(|e| DomainError::Internal(format!("compression task failed: {}", e)))?
    }

    /// Tool output that met the target still goes through the metadata step
    /// when the tier removes metadata.
    async fn scrub_tool_output(bytes: Vec<u8>, profile: &CompressionProfile) -> DomainResult<Vec<u8>> {
        if !profile.remove_metadata {
            return Ok(bytes);
        }
        tokio::task::spawn_blocking(move || convergence::strip_metadata_only(&bytes))
            .await
            .map_err(|e| DomainError::Internal(format!("metadata task failed: {}", e)))?
    }

    async fn run(
        &self,
        request: &CompressionRequest,
        cancel: &CancellationFlag,
    ) -> DomainResult<CompressionResult> {
        let started = Instant::now();
        log::info!(
            "[{}] Compressing {} ({})",
            request.request_id,
            request.input_path.display(),
            request.tier
        );

        cancel.check()?;
        let original = Self::read_input(&request.input_path).await?;
        let original_size = original.len() as u64;
        let profile = select_profile(original_size, request.tier);
        let target = profile.target_size_bytes();
        log::debug!(
            "[{}] {} bytes, target {} KB, quality {}, scale {:.2}",
            request.request_id,
            original_size,
            profile.target_size_kb,
            profile.quality,
            profile.scale
        );

        let mut external_seed = None;
        if self.settings.use_external_tool && self.compressor.is_available().await {
            cancel.check()?;
            match self.try_external(request).await {
                Ok(bytes) if bytes.len() as u64 <= target => {
                    log::info!(
                        "[{}] {} reached target: {} bytes",
                        request.request_id,
                        self.compressor.compressor_name(),
                        bytes.len()
                    );
                    cancel.check()?;
                    match Self::scrub_tool_output(bytes, &profile).await {
                        Ok(bytes) => {
                            return self.finish(request, &profile, original_size, bytes, CompressionMethod::ExternalTool, 0, started, cancel);
                        }
                        Err(e) => {
                            log::warn!("[{}] Tool output unreadable ({}), compressing in process", request.request_id, e);
                        }
                    }
                }
                Ok(bytes) if bytes.len() < original.len() => {
                    log::info!(
                        "[{}] {} output above target ({} bytes), continuing in process",
                        request.request_id,
                        self.compressor.compressor_name(),
                        bytes.len()
                    );
                    external_seed = Some(bytes);
                }
                Ok(bytes) => {
                    log::info!(
                        "[{}] {} did not shrink the file ({} bytes), ignoring its output",
                        request.request_id,
                        self.compressor.compressor_name(),
                        bytes.len()
                    );
                }
                Err(e) => {
                    log::warn!("[{}] Falling back to in-process compression: {}", request.request_id, e);
                }
            }
        } else {
            log::debug!("[{}] No external compressor available", request.request_id);
        }

        cancel.check()?;
        let (outcome, method) = match external_seed {
            Some(seed) => match Self::converge(seed, profile, cancel).await {
                Ok(outcome) => (outcome, CompressionMethod::Hybrid),
                Err(DomainError::InputRead(message)) => {
                    log::warn!("[{}] Tool output unreadable ({}), starting from the original", request.request_id, message);
                    (Self::converge(original.clone(), profile, cancel).await?, CompressionMethod::InProcess)
                }
                Err(e) => return Err(e),
            },
            None => (Self::converge(original.clone(), profile, cancel).await?, CompressionMethod::InProcess),
        };

        let bytes = if outcome.bytes.len() < original.len() {
            outcome.bytes
        } else {
            log::info!("[{}] No strategy produced a smaller file, keeping the original bytes", request.request_id);
            original
        };

        self.finish(request, &profile, original_size, bytes, method, outcome.iterations, started, cancel)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        request: &CompressionRequest,
        profile: &CompressionProfile,
        original_size: u64,
        bytes: Vec<u8>,
        method: CompressionMethod,
        iterations: u32,
        started: Instant,
        cancel: &CancellationFlag,
    ) -> DomainResult<CompressionResult> {
        cancel.check()?;
        // synchronous so a request timeout cannot land between write and rename
        persist_atomically(&request.output_path, &bytes)?;

        let compressed_size = bytes.len() as u64;
        let result = CompressionResult {
            request_id: request.request_id,
            tier: request.tier,
            original_size_bytes: original_size,
            compressed_size_bytes: compressed_size,
            original_size_kb: bytes_to_kb(original_size),
            compressed_size_kb: bytes_to_kb(compressed_size),
            target_size_kb: profile.target_size_kb,
            compression_ratio: compression_ratio(original_size, compressed_size),
            output_path: request.output_path.clone(),
            output_sha256: hex::encode(Sha256::digest(&bytes)),
            method_used: method,
            iterations,
            target_reached: compressed_size <= profile.target_size_bytes(),
            duration_ms: started.elapsed().as_millis() as i64,
            completed_at: Utc::now(),
        };

        log::info!(
            "[{}] Done: {:.1} KB -> {:.1} KB ({}%), method {}, {} iterations, {} ms",
            result.request_id,
            result.original_size_kb,
            result.compressed_size_kb,
            result.compression_ratio,
            result.method_used.as_str(),
            result.iterations,
            result.duration_ms
        );
        Ok(result)
    }
}

fn output_dir(output_path: &Path) -> &Path {
    match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Write through a temp file in the destination directory, then rename.
fn persist_atomically(output_path: &Path, bytes: &[u8]) -> DomainResult<()> {
    let describe = |e: std::io::Error| DomainError::OutputWrite(format!("{}: {}", output_path.display(), e));

    let mut staged = NamedTempFile::new_in(output_dir(output_path)).map_err(describe)?;
    staged.write_all(bytes).map_err(describe)?;
    staged.as_file().sync_all().map_err(describe)?;
    staged.persist(output_path).map_err(|e| describe(e.error))?;
    Ok(())
}

#[async_trait]
impl CompressionService for CompressionServiceImpl {
    async fn compress_pdf(&self, request: CompressionRequest) -> DomainResult<CompressionResult> {
        self.compress_pdf_with_cancel(request, CancellationFlag::new()).await
    }

    async fn compress_pdf_with_cancel(
        &self,
        request: CompressionRequest,
        cancel: CancellationFlag,
    ) -> DomainResult<CompressionResult> {
        let limit = self.settings.request_timeout();
        match tokio::time::timeout(limit, self.run(&request, &cancel)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                log::error!("[{}] Compression failed: {}", request.request_id, e);
                Err(e)
            }
            Err(_) => {
                // stops the blocking loop at its next check
                cancel.cancel();
                log::error!(
                    "[{}] Compression timed out after {}s",
                    request.request_id,
                    limit.as_secs()
                );
                Err(DomainError::TimedOut(limit.as_secs()))
            }
        }
    }

    async fn compress_batch(
        &self,
        requests: Vec<CompressionRequest>,
        max_concurrent: Option<usize>,
    ) -> BatchReport {
        let limit = max_concurrent.unwrap_or(self.settings.max_concurrent_jobs).max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        log::info!("Compressing batch of {} PDFs, {} at a time", requests.len(), limit);

        let jobs = requests.into_iter().map(|request| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| DomainError::Internal(format!("batch semaphore closed: {}", e)))?;
                self.compress_pdf(request).await
            }
        });

        let results = join_all(jobs).await;
        let stats = CompressionStats::from_results(&results);
        log::info!(
            "Batch finished: {} compressed, {} failed, {} bytes saved",
            stats.total_files_compressed,
            stats.total_files_failed,
            stats.space_saved
        );
        BatchReport { results, stats }
    }
}

/// Compress one file with settings taken from the environment
pub async fn compress_pdf(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    tier: CompressionTier,
) -> DomainResult<CompressionResult> {
    let service = CompressionServiceImpl::from_settings(CompressionSettings::from_env());
    service
        .compress_pdf(CompressionRequest::new(input_path.as_ref(), output_path.as_ref(), tier))
        .await
}
