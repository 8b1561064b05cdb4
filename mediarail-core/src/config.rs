//! Centralized configuration for Mediarail.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Mediarail components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct MediarailConfig {
    pub ingest: IngestConfig,
    pub network: NetworkConfig,
    pub transcode: TranscodeConfig,
}

/// Ingestion pipeline configuration.
///
/// Controls the size gate and listing behavior for the asset pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Maximum allowed byte length for an upload, post-compression
    pub size_ceiling: u64,
    /// Page size requested when listing the catalog
    pub listing_limit: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            size_ceiling: 5 * 1024 * 1024, // 5 MiB
            listing_limit: 1000,
        }
    }
}

/// Network communication configuration.
///
/// Controls the backend base URL, HTTP timeouts and endpoint names.
/// Endpoint names are configurable because deployments differ in which
/// storage routes they expose.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Backend API base URL, with trailing slash
    pub base_url: String,
    /// HTTP request timeout for all backend calls
    pub request_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
    /// Bearer token attached to every request, if set
    pub auth_token: Option<String>,
    /// Generic object-storage upload endpoint (multipart)
    pub upload_endpoint: &'static str,
    /// Object-storage listing endpoint
    pub list_endpoint: &'static str,
    /// Catalog CRUD endpoint for asset metadata records
    pub catalog_endpoint: &'static str,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/v1/".to_string(),
            request_timeout: Duration::from_secs(120),
            user_agent: "mediarail/0.1.0",
            auth_token: None,
            upload_endpoint: "s3/upload",
            list_endpoint: "s3/list",
            catalog_endpoint: "mindfulness-videos",
        }
    }
}

/// Transcoding engine configuration.
///
/// Fixed encode parameters for the one-shot compression pass. These are
/// deliberately not adaptive: a file that is still over the ceiling after
/// one pass is rejected, never re-encoded with different settings.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Scratch directory for engine working files (None = system temp)
    pub scratch_dir: Option<PathBuf>,
    /// Maximum output width; taller sources are scaled down, never up
    pub max_width: u32,
    /// x264 constant rate factor for the compression pass
    pub crf: u32,
    /// x264 preset name
    pub preset: &'static str,
    /// Audio bitrate for re-encoded audio
    pub audio_bitrate: &'static str,
    /// Maximum wall-clock time for one compression job
    pub job_timeout: Duration,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            max_width: 1280,
            crf: 28,
            preset: "faster",
            audio_bitrate: "128k",
            job_timeout: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl MediarailConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("MEDIARAIL_BASE_URL") {
            config.network.base_url = base_url;
        }

        if let Ok(token) = std::env::var("MEDIARAIL_AUTH_TOKEN")
            && !token.is_empty()
        {
            config.network.auth_token = Some(token);
        }

        if let Ok(timeout) = std::env::var("MEDIARAIL_HTTP_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.network.request_timeout = Duration::from_secs(seconds);
        }

        if let Ok(ceiling) = std::env::var("MEDIARAIL_SIZE_CEILING")
            && let Ok(bytes) = ceiling.parse::<u64>()
        {
            config.ingest.size_ceiling = bytes;
        }

        if let Ok(dir) = std::env::var("MEDIARAIL_SCRATCH_DIR") {
            config.transcode.scratch_dir = Some(PathBuf::from(dir));
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Uses a tiny size ceiling so gate branches are exercised without
    /// multi-megabyte fixtures, and a short job timeout.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.ingest.size_ceiling = 1024;
        config.transcode.job_timeout = Duration::from_secs(5);
        config.network.request_timeout = Duration::from_secs(5);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = MediarailConfig::default();

        assert_eq!(config.ingest.size_ceiling, 5 * 1024 * 1024);
        assert_eq!(config.network.upload_endpoint, "s3/upload");
        assert_eq!(config.network.request_timeout, Duration::from_secs(120));
        assert_eq!(config.transcode.max_width, 1280);
        assert_eq!(config.transcode.crf, 28);
        assert!(config.network.auth_token.is_none());
    }

    #[test]
    fn testing_preset_shrinks_ceiling() {
        let config = MediarailConfig::for_testing();
        assert_eq!(config.ingest.size_ceiling, 1024);
        assert!(config.transcode.job_timeout < Duration::from_secs(60));
    }

    #[test]
    fn env_override() {
        unsafe {
            std::env::set_var("MEDIARAIL_BASE_URL", "https://example.test/api/");
            std::env::set_var("MEDIARAIL_SIZE_CEILING", "2048");
            std::env::set_var("MEDIARAIL_HTTP_TIMEOUT", "30");
        }

        let config = MediarailConfig::from_env();

        assert_eq!(config.network.base_url, "https://example.test/api/");
        assert_eq!(config.ingest.size_ceiling, 2048);
        assert_eq!(config.network.request_timeout, Duration::from_secs(30));

        // Cleanup
        unsafe {
            std::env::remove_var("MEDIARAIL_BASE_URL");
            std::env::remove_var("MEDIARAIL_SIZE_CEILING");
            std::env::remove_var("MEDIARAIL_HTTP_TIMEOUT");
        }
    }
}
