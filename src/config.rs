//! Configuration surface: CLI flags (highest precedence), environment
//! variables, and an optional TOML file overlay (lowest precedence) —
//! grounded on the teacher's `clap` derive + `env` attribute style.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug, Clone)]
#[command(name = "authgate", about = "External auth endpoint for reverse-proxy auth_request")]
pub struct Cli {
    /// Optional TOML config file; values here are overridden by matching env
    /// vars or CLI flags.
    #[arg(long, env = "AUTHGATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "AUTHGATE_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "AUTHGATE_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "AUTHGATE_ORIGINAL_URL_HEADER")]
    pub original_url_header: Option<String>,

    #[arg(long, env = "AUTHGATE_STATIC_CERTS_URL")]
    pub static_certs_url: Option<String>,

    #[arg(long, env = "AUTHGATE_PUBLIC_CERTS_REFRESH_SECS")]
    pub public_certs_refresh_secs: Option<u64>,

    #[arg(long, env = "AUTHGATE_JWKS_CACHE_CLEAN_SECS")]
    pub jwks_cache_clean_secs: Option<u64>,

    #[arg(long, env = "AUTHGATE_JWT_CACHE_CLEAN_SECS")]
    pub jwt_cache_clean_secs: Option<u64>,

    #[arg(long, env = "AUTHGATE_POLICY_REFRESH_SECS")]
    pub policy_binding_refresh_secs: Option<u64>,

    #[arg(long, env = "AUTHGATE_JWT_LEEWAY_SECS")]
    pub jwt_leeway_secs: Option<i64>,

    #[arg(long, env = "AUTHGATE_REQUIRED_ROLE")]
    pub required_role: Option<String>,

    #[arg(long, env = "AUTHGATE_PROJECT")]
    pub project: Option<String>,

    /// Path to a JSON file of role bindings/groups; see `policy_source`.
    /// When absent, the service runs with an empty policy (every request
    /// denied past authentication).
    #[arg(long, env = "AUTHGATE_POLICY_FILE")]
    pub policy_file: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    original_url_header: Option<String>,
    static_certs_url: Option<String>,
    public_certs_refresh_secs: Option<u64>,
    jwks_cache_clean_secs: Option<u64>,
    jwt_cache_clean_secs: Option<u64>,
    policy_binding_refresh_secs: Option<u64>,
    jwt_leeway_secs: Option<i64>,
    required_role: Option<String>,
    project: Option<String>,
    policy_file: Option<PathBuf>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub original_url_header: String,
    pub static_certs_url: String,
    pub public_certs_refresh_interval: Duration,
    pub jwks_cache_clean_interval: Duration,
    pub jwt_cache_clean_interval: Duration,
    pub policy_binding_refresh_interval: Duration,
    pub jwt_leeway_seconds: i64,
    pub required_role: String,
    pub project: String,
    pub policy_file: Option<PathBuf>,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loads config-file values, then overlays CLI/env values (`clap` has
    /// already merged CLI flags over env vars at this point).
    pub fn load(cli: Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)?
            }
            None => FileConfig::default(),
        };

        Ok(Config {
            host: cli.host.or(file.host).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: cli.port.or(file.port).unwrap_or(8080),
            original_url_header: cli
                .original_url_header
                .or(file.original_url_header)
                .unwrap_or_else(|| "X-Original-URL".to_string()),
            static_certs_url: cli
                .static_certs_url
                .or(file.static_certs_url)
                .unwrap_or_else(|| "https://www.googleapis.com/oauth2/v1/certs".to_string()),
            public_certs_refresh_interval: Duration::from_secs(
                cli.public_certs_refresh_secs.or(file.public_certs_refresh_secs).unwrap_or(300),
            ),
            jwks_cache_clean_interval: Duration::from_secs(
                cli.jwks_cache_clean_secs.or(file.jwks_cache_clean_secs).unwrap_or(60),
            ),
            jwt_cache_clean_interval: Duration::from_secs(
                cli.jwt_cache_clean_secs.or(file.jwt_cache_clean_secs).unwrap_or(60),
            ),
            policy_binding_refresh_interval: Duration::from_secs(
                cli.policy_binding_refresh_secs.or(file.policy_binding_refresh_secs).unwrap_or(300),
            ),
            jwt_leeway_seconds: cli.jwt_leeway_secs.or(file.jwt_leeway_secs).unwrap_or(60),
            required_role: cli
                .required_role
                .or(file.required_role)
                .unwrap_or_else(|| "httpsResourceAccessor".to_string()),
            project: cli.project.or(file.project).unwrap_or_default(),
            policy_file: cli.policy_file.or(file.policy_file),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cli = Cli {
            config: None,
            host: None,
            port: None,
            original_url_header: None,
            static_certs_url: None,
            public_certs_refresh_secs: None,
            jwks_cache_clean_secs: None,
            jwt_cache_clean_secs: None,
            policy_binding_refresh_secs: None,
            jwt_leeway_secs: None,
            required_role: None,
            project: None,
            policy_file: None,
        };
        let config = Config::load(cli).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt_leeway_seconds, 60);
        assert_eq!(config.original_url_header, "X-Original-URL");
    }
}
