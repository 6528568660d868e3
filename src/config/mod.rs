// Configuration module for the chat relay
//
// Loaded once at startup and shared read-only for the life of the process.

pub mod provider;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use provider::{builtin_profiles, ProviderProfile, DEFAULT_ALIAS};

#[derive(Debug, Parser)]
#[command(name = "chat-relay", version, about = "OpenAI-compatible chat completion relay")]
pub struct Cli {
    /// YAML config file
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Upstream profile (deepseek-chat, deepseek-coder, openrouter, ollama, or a custom one)
    #[arg(short = 'm', long, alias = "model", env = "RELAY_PROVIDER")]
    pub provider: Option<String>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Accepted inbound bearer secrets.
    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Injected only when the client leaves the field unset.
    #[serde(default)]
    pub default_params: Option<DefaultParams>,

    /// Custom profiles; a name matching a built-in replaces it.
    #[serde(default)]
    pub providers: Vec<ProviderProfile>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DefaultParams {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_provider() -> String {
    "deepseek-chat".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_keys: Vec::new(),
            provider: default_provider(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            default_params: None,
            providers: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config")
    }

    /// Missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::warn!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config = Self::from_yaml(&content)?;
        tracing::info!("Config loaded from {:?}", path);
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(provider) = &cli.provider {
            self.provider = provider.clone();
        }
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
    }

    pub fn find_profile<F>(&self, name: &str, env: F) -> Option<ProviderProfile>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = provider::canonical_profile_name(name);
        self.providers
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .or_else(|| builtin_profiles(env).into_iter().find(|p| p.name == name))
    }

    /// Resolve the selected profile and read secrets from `env`.
    pub fn resolve<F>(self, env: F) -> Result<RelayConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = self.find_profile(&self.provider, &env).ok_or_else(|| {
            anyhow!(
                "Unknown provider '{}'. Available: {}",
                self.provider,
                self.available_profiles().join(", ")
            )
        })?;

        if provider.models.is_empty() {
            return Err(anyhow!("Provider '{}' has no models configured", provider.name));
        }

        let upstream_key = match &provider.api_key_env {
            Some(var) => {
                let key = env(var)
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| anyhow!("{} environment variable is required", var))?;
                Some(key)
            }
            None => None,
        };

        let mut api_keys = self.api_keys;
        if let Some(extra) = env("RELAY_API_KEYS") {
            api_keys.extend(
                extra
                    .split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty()),
            );
        }

        Ok(RelayConfig {
            listen_addr: format!("{}:{}", self.host, self.port),
            api_keys,
            provider,
            upstream_key,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            default_params: self.default_params,
        })
    }

    fn available_profiles(&self) -> Vec<String> {
        let mut names: Vec<String> = builtin_profiles(|_| None).into_iter().map(|p| p.name).collect();
        for p in &self.providers {
            if !names.contains(&p.name) {
                names.push(p.name.clone());
            }
        }
        names
    }
}

/// Immutable runtime configuration, built once at startup.
#[derive(Clone)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub api_keys: Vec<String>,
    pub provider: ProviderProfile,
    pub upstream_key: Option<String>,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    pub default_params: Option<DefaultParams>,
}

// Secrets stay out of logs.
impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("listen_addr", &self.listen_addr)
            .field("api_keys", &format_args!("[{} redacted]", self.api_keys.len()))
            .field("provider", &self.provider.name)
            .field("upstream_key", &self.upstream_key.as_ref().map(|_| "<redacted>"))
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("default_params", &self.default_params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.provider, "deepseek-chat");
        assert_eq!(config.heartbeat_interval_secs, 15);
        assert!(config.default_params.is_none());
    }

    #[test]
    fn test_kebab_case_keys() {
        let config = AppConfig::from_yaml(
            r#"
port: 8080
api-keys: ["client-secret"]
provider: openrouter
heartbeat-interval-secs: 5
default-params:
  temperature: 0.7
  max-tokens: 4096
"#,
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.api_keys, vec!["client-secret"]);
        assert_eq!(
            config.default_params,
            Some(DefaultParams {
                temperature: Some(0.7),
                max_tokens: Some(4096)
            })
        );
    }

    #[test]
    fn test_resolve_requires_upstream_key() {
        let err = AppConfig::default().resolve(env_with(&[])).unwrap_err();
        assert!(err.to_string().contains("DEEPSEEK_API_KEY"));

        let resolved = AppConfig::default()
            .resolve(env_with(&[("DEEPSEEK_API_KEY", "sk-up"), ("RELAY_API_KEYS", "a, b,")]))
            .unwrap();
        assert_eq!(resolved.upstream_key.as_deref(), Some("sk-up"));
        assert_eq!(resolved.api_keys, vec!["a", "b"]);
        assert_eq!(resolved.provider.name, "deepseek-chat");
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let config = AppConfig {
            provider: "nope".into(),
            ..AppConfig::default()
        };
        let err = config.resolve(env_with(&[])).unwrap_err();
        assert!(err.to_string().contains("Unknown provider 'nope'"));
    }

    #[test]
    fn test_custom_profile_overrides_builtin() {
        let config = AppConfig::from_yaml(
            r#"
provider: coder
providers:
  - name: deepseek-coder
    base-url: http://127.0.0.1:1234
    models:
      my-alias: local-model
"#,
        )
        .unwrap();
        let resolved = config.resolve(env_with(&[])).unwrap();
        assert_eq!(resolved.provider.base_url, "http://127.0.0.1:1234");
        assert_eq!(resolved.provider.models["my-alias"], "local-model");
        assert!(resolved.upstream_key.is_none());
    }

    #[test]
    fn test_ollama_endpoint_override_uses_resolve_env() {
        let config = AppConfig {
            provider: "ollama".into(),
            ..AppConfig::default()
        };
        let resolved = config
            .resolve(env_with(&[("OLLAMA_API_ENDPOINT", "http://10.0.0.5:11434/v1")]))
            .unwrap();
        assert_eq!(resolved.provider.base_url, "http://10.0.0.5:11434/v1");
        assert!(resolved.upstream_key.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let resolved = AppConfig {
            api_keys: vec!["client-secret".into()],
            ..AppConfig::default()
        }
        .resolve(env_with(&[("DEEPSEEK_API_KEY", "sk-upstream-secret")]))
        .unwrap();
        let printed = format!("{:?}", resolved);
        assert!(!printed.contains("client-secret"));
        assert!(!printed.contains("sk-upstream-secret"));
    }
}
