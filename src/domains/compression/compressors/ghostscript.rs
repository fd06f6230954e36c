//! Ghostscript-backed PDF compression

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::errors::{DomainError, DomainResult};
use crate::domains::compression::types::CompressionTier;
use super::ExternalCompressor;

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+(\.\d+)?").expect("version pattern is a valid regex"));

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// PDF compressor using external tools (gs)
pub struct GhostscriptCompressor {
    ghostscript_path: String,
    timeout: Duration,
}

impl GhostscriptCompressor {
    pub fn new(ghostscript_path: Option<String>, timeout: Duration) -> Self {
        Self {
            ghostscript_path: ghostscript_path.unwrap_or_else(|| "gs".to_string()),
            timeout,
        }
    }

    /// `PDFSETTINGS` preset and output resolution for a tier
    pub fn tier_parameters(tier: CompressionTier) -> (&'static str, u32) {
        match tier {
            CompressionTier::Light => ("/printer", 200),
            CompressionTier::Recommended => ("/ebook", 150),
            CompressionTier::Extreme => ("/screen", 72),
        }
    }

    /// Arguments for one invocation. Deployment scripts depend on this shape.
    pub fn command_args(input_path: &Path, output_path: &Path, tier: CompressionTier) -> Vec<String> {
        let (preset, dpi) = Self::tier_parameters(tier);
        vec![
            "-sDEVICE=pdfwrite".to_string(),
            format!("-dPDFSETTINGS={}", preset),
            format!("-r{}", dpi),
            "-dCompatibilityLevel=1.4".to_string(),
            "-dNOPAUSE".to_string(),
            "-dQUIET".to_string(),
            "-dBATCH".to_string(),
            format!("-sOutputFile={}", output_path.to_string_lossy()),
            input_path.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl ExternalCompressor for GhostscriptCompressor {
    async fn is_available(&self) -> bool {
        let mut command = Command::new(&self.ghostscript_path);
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let check = command.output();

        match timeout(VERSION_CHECK_TIMEOUT, check).await {
            Ok(Ok(output)) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                let version = version.trim();
                if VERSION_PATTERN.is_match(version) {
                    log::debug!("Found {} version {}", self.ghostscript_path, version);
                    true
                } else {
                    log::debug!("{} --version printed unexpected output: {}", self.ghostscript_path, version);
                    false
                }
            }
            Ok(Ok(output)) => {
                log::debug!("{} --version exited with {}", self.ghostscript_path, output.status);
                false
            }
            Ok(Err(e)) => {
                log::debug!("{} not usable: {}", self.ghostscript_path, e);
                false
            }
            Err(_) => {
                log::debug!("{} --version timed out", self.ghostscript_path);
                false
            }
        }
    }

    async fn compress(
        &self,
        input_path: &Path,
        output_path: &Path,
        tier: CompressionTier,
    ) -> DomainResult<Vec<u8>> {
        let mut command = Command::new(&self.ghostscript_path);
        command
            .args(Self::command_args(input_path, output_path, tier))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let invocation = command.output();

        // dropping the future on timeout kills the child
        let output = timeout(self.timeout, invocation)
            .await
            .map_err(|_| DomainError::ToolFailure(format!(
                "{} did not finish within {}s",
                self.ghostscript_path,
                self.timeout.as_secs()
            )))?
            .map_err(|e| DomainError::ToolFailure(format!("Failed to execute ghostscript: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::ToolFailure(format!("Ghostscript error ({}): {}", output.status, error.trim())));
        }

        let bytes = tokio::fs::read(output_path)
            .await
            .map_err(|e| DomainError::ToolFailure(format!("Failed to read compressed PDF: {}", e)))?;
        if bytes.is_empty() {
            return Err(DomainError::ToolFailure("Ghostscript produced an empty file".to_string()));
        }
        Ok(bytes)
    }

    fn compressor_name(&self) -> &'static str {
        "GhostscriptCompressor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::compression::fixtures::write_fake_tool;

    #[test]
    fn tier_presets_match_deployment_contract() {
        let args = GhostscriptCompressor::command_args(
            Path::new("/tmp/in.pdf"),
            Path::new("/tmp/out.pdf"),
            CompressionTier::Extreme,
        );
        assert_eq!(args[0], "-sDEVICE=pdfwrite");
        assert_eq!(args[1], "-dPDFSETTINGS=/screen");
        assert_eq!(args[2], "-r72");
        assert_eq!(args[args.len() - 2], "-sOutputFile=/tmp/out.pdf");
        assert_eq!(args[args.len() - 1], "/tmp/in.pdf");

        assert_eq!(GhostscriptCompressor::tier_parameters(CompressionTier::Recommended), ("/ebook", 150));
        assert_eq!(GhostscriptCompressor::tier_parameters(CompressionTier::Light), ("/printer", 200));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let compressor = GhostscriptCompressor::new(
            Some("/nonexistent/squidjob-gs".to_string()),
            Duration::from_secs(5),
        );
        assert!(!compressor.is_available().await);

        let result = compressor
            .compress(Path::new("a.pdf"), Path::new("b.pdf"), CompressionTier::Recommended)
            .await;
        assert!(matches!(result, Err(DomainError::ToolFailure(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fake_tool_output_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(dir.path(), "printf 'compressed' > \"$out\"");
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();
        let output = dir.path().join("out.pdf");

        let compressor = GhostscriptCompressor::new(Some(tool.to_string_lossy().into_owned()), Duration::from_secs(10));
        assert!(compressor.is_available().await);
        let bytes = compressor.compress(&input, &output, CompressionTier::Light).await.unwrap();
        assert_eq!(bytes, b"compressed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(dir.path(), "echo 'Unrecoverable error' >&2; exit 1");
        let compressor = GhostscriptCompressor::new(Some(tool.to_string_lossy().into_owned()), Duration::from_secs(10));

        let err = compressor
            .compress(&dir.path().join("in.pdf"), &dir.path().join("out.pdf"), CompressionTier::Extreme)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unrecoverable error"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_tool_is_killed_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(dir.path(), "sleep 30");
        let compressor = GhostscriptCompressor::new(Some(tool.to_string_lossy().into_owned()), Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = compressor
            .compress(&dir.path().join("in.pdf"), &dir.path().join("out.pdf"), CompressionTier::Recommended)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ToolFailure(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
