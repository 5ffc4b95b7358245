//! Gateway configuration (SPEC_FULL.md §12). Loaded once at startup from a
//! YAML file, matching the donor's `Configuration` loading in its `main.rs`
//! but scoped to what a single-upstream proxy actually needs.

use std::env;
use std::fs;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "./config.yaml";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config field `{field}` must not be empty")]
    MissingField { field: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub upstream_base_url: String,
    pub upstream_model: String,
    pub upstream_api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl GatewayConfig {
    /// Loads from the path named by `BRIDGE_CONFIG_PATH`, defaulting to
    /// `./config.yaml`, then applies the `BIND_ADDRESS` env override
    /// (SPEC_FULL.md §12) the same way the donor overrides its bind address.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("BRIDGE_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config: GatewayConfig =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;

        if let Ok(bind_address) = env::var("BIND_ADDRESS") {
            config.bind_address = bind_address;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_base_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "upstream_base_url",
            });
        }
        if self.upstream_model.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "upstream_model",
            });
        }
        Ok(())
    }
}
