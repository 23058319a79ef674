//! TOML configuration for starcharter.
//!
//! Layered model: an explicit path (CLI flag), the `STARCHARTER_CONFIG`
//! environment variable, `./starcharter.toml`, then compiled-in defaults.
//! Every section is optional and falls back to its defaults field by field.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "STARCHARTER_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG: &str = "starcharter.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration for the process.
    ///
    /// An explicit path must load; the environment and local fallbacks only
    /// warn when broken and move on to the next layer.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{} set but file could not be loaded, trying fallback",
                        CONFIG_ENV
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Remote API
// ---------------------------------------------------------------------------

/// Remote service endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every endpoint is joined onto. Must end with `/`.
    pub base_url: String,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.spacetraders.io/v2/".to_string(),
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Pacing policy for the request dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Calls admitted per sustained window.
    pub rate_limit: usize,
    /// Extra calls admitted per burst window once the sustained window is full.
    pub burst_limit: usize,
    pub sustained_window_ms: u64,
    pub burst_window_ms: u64,
    /// Attempts per request while the remote keeps answering 429.
    pub max_attempts: u32,
}

impl DispatchConfig {
    pub fn sustained_window(&self) -> Duration {
        Duration::from_millis(self.sustained_window_ms)
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit: 2,
            burst_limit: 10,
            sustained_window_ms: 1_000,
            burst_window_ms: 10_000,
            max_attempts: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Per-agent navigation worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Longest arrival wait a worker blocks on before suspending.
    pub suspension_horizon_secs: u64,
    /// Corrective actions allowed per travel request.
    pub max_corrective_retries: u32,
    /// Full passes (travel + verification) before a worker defers to the next cycle.
    pub max_verification_passes: u32,
    /// Appended to the agent id to form its ship symbol.
    pub ship_suffix: String,
    /// Page size when listing a system's waypoints.
    pub page_limit: u32,
}

impl WorkerConfig {
    pub fn suspension_horizon(&self) -> Duration {
        Duration::from_secs(self.suspension_horizon_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            suspension_horizon_secs: 4 * 3600 + 20 * 60,
            max_corrective_retries: 5,
            max_verification_passes: 3,
            ship_suffix: "-1".to_string(),
            page_limit: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Orchestration cycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// How often running workers are counted and reported.
    pub poll_interval_secs: u64,
    /// Upper bound on workers executing at once.
    pub max_concurrent_workers: usize,
    /// Pause between cycles when running forever.
    pub cycle_delay_secs: u64,
    pub agent_prefix: String,
    /// Used when the primary agent name is already claimed.
    pub fallback_agent_prefix: String,
    /// Faction for systems with no recorded closest faction.
    pub default_faction: String,
    /// Pause after each registration.
    pub registration_delay_ms: u64,
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    pub fn registration_delay(&self) -> Duration {
        Duration::from_millis(self.registration_delay_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_concurrent_workers: 64,
            cycle_delay_secs: 5,
            agent_prefix: "ZCHART".to_string(),
            fallback_agent_prefix: "ZCHAR2".to_string(),
            default_faction: "COSMIC".to_string(),
            registration_delay_ms: 1_500,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/starcharter.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
