//! Multi-tier TOML configuration for Quill.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use quill_api::{DEFAULT_API_VERSION, Deployment, Deployments};
use quill_context::token::{DEFAULT_ENCODING, DEFAULT_MARGIN_PERCENT};
use quill_core::TierPolicy;
use quill_types::{ConfigError, ModelTier, TokenBudget};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Azure resource used when none is configured.
pub const DEFAULT_RESOURCE: &str = "mt-gpt4at";

/// Address the server binds when none is configured.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

/// Upstream call timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Retries for establishing an upstream call.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Resolved configuration for a Quill server.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
    pub deployments: Deployments,
    pub tiers: TierPolicy,
    pub token_budget: TokenBudget,
    pub encoding: String,
    pub margin_percent: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub listen: SocketAddr,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub deployments: DeploymentSettings,
    #[serde(default)]
    pub routing: RoutingSettings,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    /// Azure resource name; expands to `https://<resource>.openai.azure.com`.
    pub resource: Option<String>,
    /// Full base URL; wins over `resource`.
    pub base_url: Option<String>,
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentSettings {
    pub fast: Option<Deployment>,
    pub best: Option<Deployment>,
}

/// Tier names per call kind, validated on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingSettings {
    pub dispatch: Option<String>,
    pub structure_dispatch: Option<String>,
    pub classify: Option<String>,
    pub elaborate: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowSettings {
    pub token_budget: Option<usize>,
    pub encoding: Option<String>,
    pub margin_percent: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamSettings {
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettings {
    pub listen: Option<String>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Explicit config file; it must exist.
    pub config_path: Option<PathBuf>,
    pub api_key: Option<String>,
    pub listen: Option<String>,
    pub token_budget: Option<usize>,
}

impl GatewayConfig {
    /// Load configuration from the process environment and config file.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Load configuration, reading environment variables through `env`.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (`--config`, else `<config dir>/config.toml`)
    /// 4. Defaults
    pub fn resolve(
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config_dir = env("QUILL_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_config_dir);
        let settings = match &overrides.config_path {
            Some(path) => load_settings_file(path, true)?,
            None => load_settings_file(&config_dir.join("config.toml"), false)?,
        };

        // Resolve API key: CLI > env > config file
        let api_key = overrides
            .api_key
            .or_else(|| env("AZURE_API_KEY"))
            .or(settings.api.api_key)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey {
                key: "api_key (set AZURE_API_KEY or add [api] api_key to config.toml)".into(),
            })?;

        // Resolve base URL: explicit URL > resource name > default resource
        let base_url = match env("QUILL_BASE_URL").or(settings.api.base_url) {
            Some(url) => url,
            None => {
                let resource = env("QUILL_RESOURCE")
                    .or(settings.api.resource)
                    .unwrap_or_else(|| DEFAULT_RESOURCE.to_string());
                format!("https://{resource}.openai.azure.com")
            }
        };
        let api_version = settings
            .api
            .api_version
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let deployments = Deployments::new(
            settings
                .deployments
                .fast
                .unwrap_or_else(|| Deployment::new("gpt35", "gpt-3.5-turbo")),
            settings
                .deployments
                .best
                .unwrap_or_else(|| Deployment::new("gpt4", "gpt-4")),
        );

        let defaults = TierPolicy::default();
        let routing = settings.routing;
        let tiers = TierPolicy {
            dispatch: parse_tier("routing.dispatch", routing.dispatch, defaults.dispatch)?,
            structure_dispatch: parse_tier(
                "routing.structure_dispatch",
                routing.structure_dispatch,
                defaults.structure_dispatch,
            )?,
            classify: parse_tier("routing.classify", routing.classify, defaults.classify)?,
            elaborate: parse_tier("routing.elaborate", routing.elaborate, defaults.elaborate)?,
        };

        // Resolve token budget: CLI > env > config file > default
        let env_budget = env("QUILL_TOKEN_BUDGET")
            .map(|raw| {
                raw.trim()
                    .parse::<usize>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "QUILL_TOKEN_BUDGET".into(),
                        message: e.to_string(),
                    })
            })
            .transpose()?;
        let token_budget = overrides
            .token_budget
            .or(env_budget)
            .or(settings.window.token_budget)
            .map(TokenBudget)
            .unwrap_or_default();
        if token_budget.get() == 0 {
            return Err(ConfigError::InvalidValue {
                key: "window.token_budget".into(),
                message: "must be greater than zero".into(),
            });
        }

        let listen_raw = overrides
            .listen
            .or_else(|| env("QUILL_LISTEN"))
            .or(settings.server.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen = listen_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "server.listen".into(),
                message: format!("'{listen_raw}': {e}"),
            })?;

        Ok(GatewayConfig {
            api_key,
            base_url,
            api_version,
            deployments,
            tiers,
            token_budget,
            encoding: settings
                .window
                .encoding
                .unwrap_or_else(|| DEFAULT_ENCODING.to_string()),
            margin_percent: settings
                .window
                .margin_percent
                .unwrap_or(DEFAULT_MARGIN_PERCENT),
            timeout: Duration::from_secs(
                settings.upstream.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            max_retries: settings.upstream.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            listen,
            config_dir,
        })
    }
}

fn parse_tier(key: &str, raw: Option<String>, default: ModelTier) -> Result<ModelTier, ConfigError> {
    match raw {
        None => Ok(default),
        Some(name) => name.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("unknown model tier '{name}' (expected 'fast' or 'best')"),
        }),
    }
}

/// Get the default Quill config directory path (~/.quill/).
pub fn default_config_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".quill")
}

/// Load and parse a TOML settings file.
///
/// A missing file yields defaults unless `required` is set. A file that
/// exists but does not parse is always an error.
fn load_settings_file(path: &Path, required: bool) -> Result<SettingsFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            tracing::debug!("Loading settings from {}", path.display());
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        }
        Err(e) if required => Err(ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(SettingsFile::default()),
    }
}
