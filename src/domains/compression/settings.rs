//! Engine configuration read from the environment.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ValidationError;
use super::compressors::{ExternalCompressor, GhostscriptCompressor, UnavailableCompressor};

pub const ENV_GS_PATH: &str = "SQUIDJOB_GS_PATH";
pub const ENV_TOOL_TIMEOUT_SECS: &str = "SQUIDJOB_TOOL_TIMEOUT_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "SQUIDJOB_REQUEST_TIMEOUT_SECS";
pub const ENV_USE_EXTERNAL_TOOL: &str = "SQUIDJOB_USE_EXTERNAL_TOOL";
pub const ENV_MAX_CONCURRENT_JOBS: &str = "SQUIDJOB_MAX_CONCURRENT_JOBS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub ghostscript_path: String,
    pub tool_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub use_external_tool: bool,
    pub max_concurrent_jobs: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            ghostscript_path: "gs".to_string(),
            tool_timeout_secs: 120,
            request_timeout_secs: 300,
            use_external_tool: true,
            max_concurrent_jobs: 2,
        }
    }
}

impl CompressionSettings {
    /// Read `SQUIDJOB_*` variables. Anything unparsable keeps its default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            ghostscript_path: lookup(ENV_GS_PATH)
                .map(|raw| raw.trim().to_string())
                .filter(|path| !path.is_empty())
                .unwrap_or(defaults.ghostscript_path),
            tool_timeout_secs: parse_var(&lookup, ENV_TOOL_TIMEOUT_SECS, defaults.tool_timeout_secs),
            request_timeout_secs: parse_var(&lookup, ENV_REQUEST_TIMEOUT_SECS, defaults.request_timeout_secs),
            use_external_tool: parse_flag(&lookup, ENV_USE_EXTERNAL_TOOL, defaults.use_external_tool),
            max_concurrent_jobs: parse_var(&lookup, ENV_MAX_CONCURRENT_JOBS, defaults.max_concurrent_jobs),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ghostscript_path.trim().is_empty() {
            return Err(ValidationError::required("ghostscript_path"));
        }
        if !(1..=3600).contains(&self.tool_timeout_secs) {
            return Err(ValidationError::range("tool_timeout_secs", 1, 3600));
        }
        if !(1..=86_400).contains(&self.request_timeout_secs) {
            return Err(ValidationError::range("request_timeout_secs", 1, 86_400));
        }
        if !(1..=64).contains(&self.max_concurrent_jobs) {
            return Err(ValidationError::range("max_concurrent_jobs", 1, 64));
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The external compressor these settings describe
    pub fn build_compressor(&self) -> Arc<dyn ExternalCompressor> {
        if self.use_external_tool {
            Arc::new(GhostscriptCompressor::new(
                Some(self.ghostscript_path.clone()),
                self.tool_timeout(),
            ))
        } else {
            Arc::new(UnavailableCompressor)
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring {}={:?}, using default {}", key, raw, default);
                default
            }
        },
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|raw| raw.trim().to_ascii_lowercase()) {
        None => default,
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                log::warn!("Ignoring {}={:?}, using default {}", key, raw, default);
                default
            }
        },
    }
}
