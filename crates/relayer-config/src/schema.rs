//! Structural schema for the gas station configuration file.

use relayer_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};

fn wei_amount(value: &toml::Value) -> Result<(), String> {
	let raw = value.as_str().unwrap_or_default().trim();
	if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
		return Err(format!("Amount '{}' must be a string of base units (wei)", raw));
	}
	Ok(())
}

fn timeout_ms() -> FieldType {
	FieldType::Integer {
		min: Some(100),
		max: Some(120_000),
	}
}

/// Schema of the whole configuration document.
pub struct GasStationConfigSchema;

impl ConfigSchema for GasStationConfigSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let service = Schema::new(
			vec![],
			vec![
				Field::new("name", FieldType::String),
				Field::new(
					"http_port",
					FieldType::Integer {
						min: Some(1),
						max: Some(65535),
					},
				),
				Field::new("log_level", FieldType::String),
			],
		);

		let relayer = Schema::new(
			vec![
				Field::new("private_key", FieldType::String).with_validator(|value| {
					let key = value.as_str().unwrap_or_default();
					let key_without_prefix = key.strip_prefix("0x").unwrap_or(key);

					if key_without_prefix.len() != 64 {
						return Err("Private key must be 64 hex characters (32 bytes)".to_string());
					}
					if hex_digits(key_without_prefix) {
						Ok(())
					} else {
						Err("Private key must be valid hexadecimal".to_string())
					}
				}),
				Field::new(
					"chain_id",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
				Field::new("token_address", FieldType::Address),
			],
			vec![Field::new(
				"token_decimals",
				FieldType::Integer {
					min: Some(0),
					max: Some(36),
				},
			)],
		);

		let endpoint = Schema::new(
			vec![Field::new("url", FieldType::Url)],
			vec![
				Field::new("kind", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some("primary") | Some("fallback") => Ok(()),
						_ => Err("kind must be 'primary' or 'fallback'".to_string()),
					}
				}),
				Field::new("read_timeout_ms", timeout_ms()),
				Field::new("write_timeout_ms", timeout_ms()),
			],
		);

		let fees = Schema::new(
			vec![],
			vec![
				Field::new(
					"gas_price_wei",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
				Field::new(
					"transfer_gas_limit",
					FieldType::Integer {
						min: Some(21_000),
						max: None,
					},
				),
				Field::new(
					"funding_gas_limit",
					FieldType::Integer {
						min: Some(21_000),
						max: None,
					},
				),
				Field::new(
					"approval_gas_limit",
					FieldType::Integer {
						min: Some(21_000),
						max: None,
					},
				),
				Field::new("approval_safety_margin_wei", FieldType::String).with_validator(wei_amount),
				Field::new("minimum_reserve_wei", FieldType::String).with_validator(wei_amount),
			],
		);

		let retry = Schema::new(
			vec![],
			vec![
				Field::new(
					"max_attempts",
					FieldType::Integer {
						min: Some(1),
						max: Some(20),
					},
				),
				Field::new(
					"initial_delay_ms",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
				Field::new(
					"max_delay_ms",
					FieldType::Integer {
						min: Some(0),
						max: None,
					},
				),
			],
		);

		let timeouts = Schema::new(
			vec![],
			vec![
				Field::new("read_ms", timeout_ms()),
				Field::new("write_ms", timeout_ms()),
				Field::new("preflight_ms", timeout_ms()),
				Field::new(
					"endpoint_reset_secs",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
			],
		);

		let preflight = Schema::new(
			vec![],
			vec![Field::new("assume_ready_on_timeout", FieldType::Boolean)],
		);

		let schema = Schema::new(
			vec![
				Field::new("relayer", FieldType::Table(relayer)),
				Field::new("endpoints", FieldType::Array(Box::new(FieldType::Table(endpoint))))
					.with_validator(|value| match value.as_array() {
						Some(list) if !list.is_empty() => Ok(()),
						_ => Err("At least one endpoint must be configured".to_string()),
					}),
			],
			vec![
				Field::new("service", FieldType::Table(service)),
				Field::new("fees", FieldType::Table(fees)),
				Field::new("retry", FieldType::Table(retry)),
				Field::new("timeouts", FieldType::Table(timeouts)),
				Field::new("preflight", FieldType::Table(preflight)),
			],
		);

		schema.validate(config)
	}
}

fn hex_digits(value: &str) -> bool {
	!value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}
