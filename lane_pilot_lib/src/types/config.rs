use crate::CommandLimits;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;
use tracing::warn;

/// Environment variable naming the TOML config file
pub const CONFIG_PATH_ENV: &str = "PILOT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub vehicle_name: String,
    pub mapper: MapperConfig,
    pub limits: CommandLimits,
    pub model: ModelConfig,
    pub encoder: EncoderConfig,
    pub gate: GateConfig,
}

/// Scaling from the model's symbolic output to actuator units
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub base_forward_speed: f64, // m/s
    pub velocity_gain: f64,      // applied to the parsed velocity before scaling
    pub max_angular_speed: f64,  // rad/s
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String, // name of the variable holding the key
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub resize: u32, // square edge in pixels, 0 keeps the source size
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub skip_inference_when_stopped: bool,
    pub cancel_on_stop: bool,
    pub shutdown_grace_ms: u64,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            vehicle_name: "duckiebot".to_string(),
            mapper: MapperConfig::default(),
            limits: CommandLimits::default(),
            model: ModelConfig::default(),
            encoder: EncoderConfig::default(),
            gate: GateConfig::default(),
        }
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            base_forward_speed: 0.083,
            velocity_gain: 25.0,
            max_angular_speed: 1.0,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4-turbo".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: 200,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            timeout_ms: 10_000,
            max_retries: 1,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self { resize: 64 }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            skip_inference_when_stopped: true,
            cancel_on_stop: true,
            shutdown_grace_ms: 500,
        }
    }
}

impl PilotConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&content).wrap_err_with(|| format!("Invalid config file {}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PilotConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load the file named by `PILOT_CONFIG` (defaults when unset), then apply
    /// environment overrides and validate.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from_file(&path)?,
            Err(_) => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `KEY=value` overrides. Values that fail to parse keep the current setting.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("VEHICLE_NAME") {
            self.vehicle_name = val;
        }

        // Mapper
        override_value(&lookup, "BASE_FORWARD_SPEED", &mut self.mapper.base_forward_speed);
        override_value(&lookup, "VELOCITY_GAIN", &mut self.mapper.velocity_gain);
        override_value(&lookup, "MAX_ANGULAR_SPEED", &mut self.mapper.max_angular_speed);

        // Limits
        override_value(&lookup, "MAX_LINEAR_VELOCITY", &mut self.limits.max_linear_velocity);
        override_value(&lookup, "MAX_ANGULAR_VELOCITY", &mut self.limits.max_angular_velocity);

        // Model
        if let Some(val) = lookup("MODEL_ENDPOINT") {
            self.model.endpoint = val;
        }
        if let Some(val) = lookup("MODEL_NAME") {
            self.model.model = val;
        }
        override_value(&lookup, "MODEL_TIMEOUT_MS", &mut self.model.timeout_ms);
        override_value(&lookup, "MODEL_MAX_RETRIES", &mut self.model.max_retries);

        // Encoder and gate
        override_value(&lookup, "ENCODER_RESIZE", &mut self.encoder.resize);
        override_value(
            &lookup,
            "SKIP_INFERENCE_WHEN_STOPPED",
            &mut self.gate.skip_inference_when_stopped,
        );
        override_value(&lookup, "CANCEL_ON_STOP", &mut self.gate.cancel_on_stop);
        override_value(&lookup, "SHUTDOWN_GRACE_MS", &mut self.gate.shutdown_grace_ms);
    }

    pub fn validate(&self) -> Result<()> {
        let speeds = [
            ("mapper.base_forward_speed", self.mapper.base_forward_speed),
            ("mapper.velocity_gain", self.mapper.velocity_gain),
            ("mapper.max_angular_speed", self.mapper.max_angular_speed),
            ("limits.max_linear_velocity", self.limits.max_linear_velocity),
            ("limits.max_angular_velocity", self.limits.max_angular_velocity),
        ];
        for (name, value) in speeds {
            if !value.is_finite() || value < 0.0 {
                eyre::bail!("{} must be a finite, non-negative number (got {})", name, value);
            }
        }

        if self.model.endpoint.trim().is_empty() {
            eyre::bail!("model.endpoint must not be empty");
        }
        if self.model.max_tokens == 0 {
            eyre::bail!("model.max_tokens must be greater than zero");
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            eyre::bail!(
                "model.temperature must be within [0, 2] (got {})",
                self.model.temperature
            );
        }

        Ok(())
    }
}

fn override_value<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring {}={:?}: not a valid value", key, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = PilotConfig::default();
        assert_eq!(config.mapper.base_forward_speed, 0.083);
        assert_eq!(config.mapper.velocity_gain, 25.0);
        assert_eq!(config.mapper.max_angular_speed, 1.0);
        assert_eq!(config.model.temperature, 0.1);
        assert_eq!(config.model.max_tokens, 200);
        assert_eq!(config.model.top_p, 1.0);
        assert_eq!(config.encoder.resize, 64);
        assert!(config.gate.skip_inference_when_stopped);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PilotConfig::from_toml(
            r#"
            vehicle_name = "ente"

            [mapper]
            base_forward_speed = 0.1

            [gate]
            skip_inference_when_stopped = false
            "#,
        )
        .unwrap();

        assert_eq!(config.vehicle_name, "ente");
        assert_eq!(config.mapper.base_forward_speed, 0.1);
        assert_eq!(config.mapper.velocity_gain, 25.0);
        assert!(!config.gate.skip_inference_when_stopped);
        assert_eq!(config.gate.shutdown_grace_ms, 500);
        assert_eq!(config.model.model, "gpt-4-turbo");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BASE_FORWARD_SPEED", "0.12"),
            ("MAX_ANGULAR_SPEED", "not-a-number"),
            ("SKIP_INFERENCE_WHEN_STOPPED", "false"),
            ("MODEL_NAME", "gpt-4o"),
        ]
        .into_iter()
        .collect();

        let mut config = PilotConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.mapper.base_forward_speed, 0.12);
        assert_eq!(config.mapper.max_angular_speed, 1.0);
        assert!(!config.gate.skip_inference_when_stopped);
        assert_eq!(config.model.model, "gpt-4o");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PilotConfig::default();
        config.limits.max_linear_velocity = -1.0;
        assert!(config.validate().is_err());

        let mut config = PilotConfig::default();
        config.model.max_tokens = 0;
        assert!(config.validate().is_err());

        let mut config = PilotConfig::default();
        config.mapper.base_forward_speed = f64::NAN;
        assert!(config.validate().is_err());
    }
}
