//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

use lilyframe_core::command::{
    DEFAULT_ARTIFACT_ROOT, DEFAULT_INPUT_NAME, DEFAULT_MODULE, DEFAULT_PROGRAM,
    DEFAULT_SECRET_VAR,
};
use lilyframe_core::{AspectRatio, CommandConfig, EvictionPolicy, StderrPolicy};

/// Runtime configuration for lilyframe-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set. The Lilypad private key itself is
/// never stored here; it is read from the environment on every run.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// Public origin used in frame image and post URLs.
    pub base_url: String,

    /// Directory served as static files; results land in `<public_dir>/results`.
    pub public_dir: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated CORS allow-list; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// How to invoke the Lilypad CLI.
    pub command: CommandConfig,

    /// Extra fonts for the renderer, on top of the system fonts.
    pub font_dir: Option<PathBuf>,

    /// Bounds on the in-memory request table. Unbounded by default.
    pub eviction: EvictionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_owned(),
            base_url: "http://localhost:3000".to_owned(),
            public_dir: PathBuf::from("public"),
            log_level: "info".to_owned(),
            log_json: false,
            cors_allowed_origins: None,
            command: CommandConfig::default(),
            font_dir: None,
            eviction: EvictionPolicy::unbounded(),
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("LILYFRAME_BIND", "0.0.0.0:3000"),
            base_url: env_or("LILYFRAME_BASE_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_owned(),
            public_dir: PathBuf::from(env_or("LILYFRAME_PUBLIC_DIR", "public")),
            log_level: env_or("LILYFRAME_LOG", "info"),
            log_json: std::env::var("LILYFRAME_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cors_allowed_origins: std::env::var("LILYFRAME_CORS_ORIGINS").ok(),
            command: CommandConfig {
                program: env_or("LILYFRAME_LILYPAD_BIN", DEFAULT_PROGRAM),
                module: env_or("LILYFRAME_MODULE", DEFAULT_MODULE),
                input_name: env_or("LILYFRAME_INPUT_NAME", DEFAULT_INPUT_NAME),
                secret_var: env_or("LILYFRAME_SECRET_VAR", DEFAULT_SECRET_VAR),
                artifact_root: env_or("LILYFRAME_ARTIFACT_ROOT", DEFAULT_ARTIFACT_ROOT),
                stderr_policy: parse_env("LILYFRAME_STDERR_POLICY", StderrPolicy::Strict),
                aspect_ratio: AspectRatio::Landscape,
            },
            font_dir: std::env::var("LILYFRAME_FONT_DIR").ok().map(PathBuf::from),
            eviction: EvictionPolicy {
                max_entries: parse_opt_env("LILYFRAME_TRACKER_MAX_ENTRIES"),
                ttl: parse_opt_env("LILYFRAME_TRACKER_TTL_SECS").map(Duration::from_secs),
            },
        }
    }

    /// Where rendered results are written.
    pub fn results_dir(&self) -> PathBuf {
        self.public_dir.join("results")
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    parse_opt_env(key).unwrap_or(default)
}

fn parse_opt_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
