//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `FORMGATE_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `FORMGATE_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `FORMGATE_AUTH__KEY__SECRET=...` sets the `auth.key.secret` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use formgate::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Tokens**: `auth.key` (`secret` or `jwks`), `auth.issuer`, `auth.audience`, `auth.leeway`
//! - **Directory**: `directory.type` (`static` fixture file or `http` forms API)
//! - **Limits**: `limits.max_body_bytes` - Largest request body a gate will read
//! - **Telemetry**: `enable_otel_export` - OTLP trace export
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! FORMGATE_PORT=8080
//!
//! # Point at the forms API
//! FORMGATE_DIRECTORY__TYPE=http
//! FORMGATE_DIRECTORY__BASE_URL=http://forms-api:8080
//! FORMGATE_DIRECTORY__API_KEY=internal-key
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FORMGATE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults; only `auth.key` needs to be set for a usable configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Bearer token validation
    pub auth: AuthConfig,
    /// Where users, forms and submissions are looked up
    pub directory: DirectoryConfig,
    pub limits: LimitsConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
            auth: AuthConfig::default(),
            directory: DirectoryConfig::default(),
            limits: LimitsConfig::default(),
            enable_otel_export: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Verification key source
    pub key: TokenKeyConfig,
    /// Required `iss` claim, if set
    pub issuer: Option<String>,
    /// Required `aud` claim, if set
    pub audience: Option<String>,
    /// Clock skew tolerated on `exp`/`nbf`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            key: TokenKeyConfig::default(),
            issuer: None,
            audience: None,
            leeway: Duration::from_secs(60),
        }
    }
}

/// How token signatures are verified.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TokenKeyConfig {
    /// HMAC shared secret
    Secret { secret: String },
    /// Remote JSON Web Key Set
    Jwks {
        url: Url,
        /// How long a fetched key set is reused (default: 10m)
        #[serde(with = "humantime_serde", default = "default_jwks_cache_ttl")]
        cache_ttl: Duration,
    },
}

impl Default for TokenKeyConfig {
    fn default() -> Self {
        TokenKeyConfig::Secret { secret: String::new() }
    }
}

fn default_jwks_cache_ttl() -> Duration {
    Duration::from_secs(600)
}

/// Collaborator backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum DirectoryConfig {
    /// YAML fixture with users, forms and submissions. For development and tests.
    Static { path: PathBuf },
    /// The forms API's internal endpoints
    Http {
        base_url: Url,
        /// Sent as `x-api-key` on every request
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        #[serde(with = "humantime_serde", default = "default_request_timeout")]
        request_timeout: Duration,
    },
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig::Static {
            path: PathBuf::from("fixtures.yaml"),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest request body buffered for gates that read the payload
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> anyhow::Result<()> {
        match &self.auth.key {
            TokenKeyConfig::Secret { secret } if secret.is_empty() => {
                anyhow::bail!(
                    "Config validation: auth.key.secret is empty. \
                     Please set FORMGATE_AUTH__KEY__SECRET or configure a jwks key source."
                );
            }
            TokenKeyConfig::Jwks { cache_ttl, .. } if cache_ttl.is_zero() => {
                anyhow::bail!("Config validation: auth.key.cache_ttl must be greater than zero");
            }
            _ => {}
        }

        if matches!(&self.directory, DirectoryConfig::Http { request_timeout, .. } if request_timeout.is_zero()) {
            anyhow::bail!("Config validation: directory.request_timeout must be greater than zero");
        }

        if self.limits.max_body_bytes == 0 {
            anyhow::bail!("Config validation: limits.max_body_bytes must be greater than zero");
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            // FORMGATE_CONFIG names the file itself and is not a config key
            .merge(Env::prefixed("FORMGATE_").ignore(&["CONFIG"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
