//! Configuration management for dontcare.
//!
//! Configuration can be set via environment variables:
//! - `API_BASE_URL` - Optional. Backend origin. Defaults to `http://localhost:8000`.
//! - `API_TIMEOUT_MS` - Optional. Per-attempt request timeout. Defaults to `10000`.
//! - `API_RETRY_ATTEMPTS` - Optional. Retries after the first attempt. Defaults to `3`.
//! - `API_RETRY_DELAY_MS` - Optional. Exponential backoff base delay. Defaults to `1000`.
//! - `TOKEN_CLOCK_SKEW_SECS` - Optional. Leeway applied to token expiry. Defaults to `30`.
//! - `TOKEN_REFRESH_LEAD_SECS` - Optional. How long before expiry to refresh. Defaults to `300`.
//! - `LOGIN_PATH` - Optional. Login entry point used for redirects. Defaults to `/login`.
//! - `SIM_FAILURE_PROBABILITY` - Optional. Branch failure injection rate. Defaults to `0.12`.
//! - `SIM_SEED` - Optional. Seeds the simulation random source.
//! - `SESSION_STATE_PATH` - Optional. JSON file holding session-scoped workbench state.
//! - `DEV_MODE` - Optional. Verbose request logging. Defaults to `true` in debug builds.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// HTTP pipeline configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Backend origin, without a trailing slash
    pub base_url: String,

    /// Timeout applied to each individual attempt
    pub timeout: Duration,

    /// Retries after the first attempt (total attempts = retry_attempts + 1)
    pub retry_attempts: u32,

    /// Base delay for exponential backoff
    pub retry_delay: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_millis(10_000),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1_000),
        }
    }
}

/// Token lifecycle configuration.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// A token expiring within this window counts as already expired
    pub clock_skew: Duration,

    /// Proactive refresh happens this long before expiry
    pub refresh_lead: Duration,

    /// Maximum refresh retries for retryable failures
    pub max_refresh_retries: u32,

    /// Base delay for refresh backoff
    pub refresh_retry_delay: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_secs(30),
            refresh_lead: Duration::from_secs(5 * 60),
            max_refresh_retries: 3,
            refresh_retry_delay: Duration::from_millis(1_000),
        }
    }
}

/// Simulation worker configuration.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Probability that one branch step ends in error
    pub failure_probability: f64,

    /// Seed for the random source (entropy when unset)
    pub seed: Option<u64>,

    /// Delay range (ms, inclusive) for `router.plan`
    pub plan_delay_ms: (u64, u64),

    /// Delay range (ms, inclusive) for each branch step
    pub branch_delay_ms: (u64, u64),

    /// Delay range (ms, inclusive) for `strategy.compose`
    pub compose_delay_ms: (u64, u64),

    /// Delay range (ms, inclusive) for `report.build`
    pub build_delay_ms: (u64, u64),
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            failure_probability: 0.12,
            seed: None,
            plan_delay_ms: (350, 700),
            branch_delay_ms: (600, 1200),
            compose_delay_ms: (500, 900),
            build_delay_ms: (400, 800),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP pipeline settings
    pub api: ApiConfig,

    /// Token manager and scheduler settings
    pub token: TokenConfig,

    /// Simulation worker settings
    pub simulation: SimulationConfig,

    /// Path the client is redirected to on terminal auth failure
    pub login_path: String,

    /// Where session-scoped workbench state is mirrored (memory-only when unset)
    pub session_state_path: Option<PathBuf>,

    /// Development mode (verbose request logging)
    pub dev_mode: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("API_BASE_URL")
            .map(|v| normalize_base_url(&v))
            .unwrap_or_else(|_| Ok(ApiConfig::default().base_url))?;

        let api = ApiConfig {
            base_url,
            timeout: Duration::from_millis(parse_env("API_TIMEOUT_MS", 10_000u64)?),
            retry_attempts: parse_env("API_RETRY_ATTEMPTS", 3u32)?,
            retry_delay: Duration::from_millis(parse_env("API_RETRY_DELAY_MS", 1_000u64)?),
        };

        let token = TokenConfig {
            clock_skew: Duration::from_secs(parse_env("TOKEN_CLOCK_SKEW_SECS", 30u64)?),
            refresh_lead: Duration::from_secs(parse_env("TOKEN_REFRESH_LEAD_SECS", 300u64)?),
            ..TokenConfig::default()
        };

        let failure_probability: f64 = parse_env("SIM_FAILURE_PROBABILITY", 0.12f64)?;
        if !(0.0..=1.0).contains(&failure_probability) {
            return Err(ConfigError::InvalidValue(
                "SIM_FAILURE_PROBABILITY".to_string(),
                format!("{} is outside 0..=1", failure_probability),
            ));
        }

        let seed = std::env::var("SIM_SEED")
            .ok()
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidValue("SIM_SEED".to_string(), format!("{}", e)))
            })
            .transpose()?;

        let simulation = SimulationConfig {
            failure_probability,
            seed,
            ..SimulationConfig::default()
        };

        let login_path = std::env::var("LOGIN_PATH").unwrap_or_else(|_| "/login".to_string());

        let session_state_path = std::env::var("SESSION_STATE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let dev_mode = std::env::var("DEV_MODE")
            .ok()
            .map(|v| parse_bool(&v).map_err(|e| ConfigError::InvalidValue("DEV_MODE".to_string(), e)))
            .transpose()?
            // In debug builds, default to dev_mode=true; in release, default to false.
            .unwrap_or(cfg!(debug_assertions));

        Ok(Self {
            api,
            token,
            simulation,
            login_path,
            session_state_path,
            dev_mode,
        })
    }

    /// Create a config with default values pointing at `base_url` (useful for testing).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiConfig {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                ..ApiConfig::default()
            },
            token: TokenConfig::default(),
            simulation: SimulationConfig::default(),
            login_path: "/login".to_string(),
            session_state_path: None,
            dev_mode: true,
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

/// Trim the base URL, drop trailing slashes and require an http(s) origin.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| ConfigError::InvalidValue("API_BASE_URL".to_string(), format!("{}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::InvalidValue(
            "API_BASE_URL".to_string(),
            format!("expected an http(s) origin, got: {}", trimmed),
        ));
    }
    Ok(trimmed.to_string())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
