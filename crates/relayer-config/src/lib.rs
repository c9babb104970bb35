//! Configuration loading for the gas station.
//!
//! A configuration file goes through four stages: `${VAR}` environment
//! substitution, structural schema validation of the raw TOML, typed
//! deserialization with defaults, and finally environment overrides plus
//! semantic checks that need the typed values.

mod schema;
pub mod serde_helpers;
mod types;

pub use schema::GasStationConfigSchema;
pub use types::{
	Config, EndpointConfig, FeeConfig, PreflightConfig, RelayerConfig, RetryConfig,
	ServiceConfig, TimeoutConfig,
};

use relayer_types::ConfigSchema;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

impl From<relayer_types::ValidationError> for ConfigError {
	fn from(err: relayer_types::ValidationError) -> Self {
		ConfigError::ValidationError(err.to_string())
	}
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "GAS_STATION_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let file_path = self.file_path.as_ref().ok_or_else(|| {
			ConfigError::FileNotFound("No configuration file specified".to_string())
		})?;

		if !Path::new(file_path).exists() {
			return Err(ConfigError::FileNotFound(file_path.clone()));
		}

		debug!(path = %file_path, "Reading configuration file");
		let content = tokio::fs::read_to_string(file_path).await?;
		self.load_str(&content)
	}

	/// Runs every loading stage on an in-memory document.
	pub fn load_str(&self, content: &str) -> Result<Config, ConfigError> {
		let substituted = self.substitute_env_vars(content)?;

		let raw: toml::Value =
			toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))?;
		GasStationConfigSchema.validate(&raw)?;

		let mut config: Config = raw
			.try_into()
			.map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;

		self.apply_env_overrides(&mut config)?;
		self.validate_config(&config)?;

		Ok(config)
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let mut result = content.to_string();

		let re = regex::Regex::new(r"\$\{([^}]+)\}")
			.map_err(|e| ConfigError::ParseError(e.to_string()))?;

		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			config.service.log_level = log_level;
		}

		if let Ok(http_port) = env::var(format!("{}HTTP_PORT", self.env_prefix)) {
			config.service.http_port = http_port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid HTTP port: {}", e)))?;
		}

		if let Ok(private_key) = env::var(format!("{}PRIVATE_KEY", self.env_prefix)) {
			debug!("Overriding relayer private key from environment");
			config.relayer.private_key = private_key;
		}

		Ok(())
	}

	fn validate_config(&self, config: &Config) -> Result<(), ConfigError> {
		if config.retry.max_delay_ms < config.retry.initial_delay_ms {
			return Err(ConfigError::ValidationError(
				"retry.max_delay_ms must not be less than retry.initial_delay_ms".to_string(),
			));
		}

		if config.retry.multiplier.is_nan() || config.retry.multiplier < 1.0 {
			return Err(ConfigError::ValidationError(
				"retry.multiplier must be at least 1.0".to_string(),
			));
		}

		for endpoint in config.endpoints() {
			if endpoint.read_timeout > endpoint.write_timeout {
				return Err(ConfigError::ValidationError(format!(
					"Endpoint {} has a read timeout longer than its write timeout",
					endpoint.display_url()
				)));
			}
		}

		let mut seen = std::collections::HashSet::new();
		for endpoint in &config.endpoints {
			if !seen.insert(endpoint.url.as_str()) {
				return Err(ConfigError::ValidationError(format!(
					"Duplicate endpoint URL: {}",
					endpoint.url
				)));
			}
		}

		Ok(())
	}
}
