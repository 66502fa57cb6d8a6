use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// HTTP listen address (default: 127.0.0.1:8000).
    pub listen_addr: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Directory of reference face images.
    pub reference_dir: PathBuf,
    /// Path to the patient registry TOML file.
    pub registry_path: PathBuf,
    /// Cosine-distance threshold for a confident match.
    pub match_threshold: f32,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum request body size in megabytes.
    pub max_body_mb: usize,
}

impl Config {
    /// Load configuration from `MIEND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("MIEND_LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            model_dir: std::env::var("MIEND_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| mien_extract::OnnxExtractor::default_model_dir()),
            reference_dir: std::env::var("MIEND_REFERENCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("references")),
            registry_path: std::env::var("MIEND_REGISTRY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("patients.toml")),
            match_threshold: env_f32("MIEND_MATCH_THRESHOLD", 0.40),
            request_timeout_secs: env_u64("MIEND_REQUEST_TIMEOUT_SECS", 30),
            max_body_mb: env_usize("MIEND_MAX_BODY_MB", 10),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
