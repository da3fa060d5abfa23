use crate::sandbox::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub review: ReviewConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReviewConfig {
    pub max_iterations: usize,
    pub auto_correct: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_wall_time_secs: u64,
    pub max_memory_bytes: u64,
    pub max_output_bytes: usize,
    pub network_allowed: bool,
    pub filesystem_allowed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: "ollama".to_string(),
                model: "qwen2.5:7b".to_string(),
                base_url: "http://localhost:11434".to_string(),
                api_key: None,
                request_timeout_secs: 120,
            },
            review: ReviewConfig {
                max_iterations: 3,
                auto_correct: true,
            },
            limits: LimitsConfig {
                max_wall_time_secs: 5,
                max_memory_bytes: 256 * 1024 * 1024,
                max_output_bytes: 1024 * 1024,
                network_allowed: false,
                filesystem_allowed: false,
            },
        }
    }
}

impl LimitsConfig {
    /// The explicit per-call limit value handed to the sandbox.
    pub fn to_limits(&self) -> ResourceLimits {
        ResourceLimits {
            max_wall_time: Duration::from_secs(self.max_wall_time_secs),
            max_memory: self.max_memory_bytes,
            max_output_bytes: self.max_output_bytes,
            network_allowed: self.network_allowed,
            filesystem_allowed: self.filesystem_allowed,
        }
    }
}

impl Config {
    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load config from ~/.pyclinic/config.toml, falling back to defaults.
    pub fn load() -> Self {
        let config_path = if let Some(home) = dirs::home_dir() {
            home.join(".pyclinic").join("config.toml")
        } else {
            return Self::default();
        };

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => config,
                    Err(e) => {
                        eprintln!(
                            "Warning: Failed to parse {}: {}. Using defaults.",
                            config_path.display(),
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    eprintln!(
                        "Warning: Failed to read {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "qwen2.5:7b");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.llm.request_timeout_secs, 120);
        assert_eq!(config.review.max_iterations, 3);
        assert!(config.review.auto_correct);
        assert_eq!(config.limits.max_wall_time_secs, 5);
        assert!(!config.limits.network_allowed);
        assert!(!config.limits.filesystem_allowed);
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let config = Config::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml_str).unwrap();

        assert_eq!(parsed.llm.provider, config.llm.provider);
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.review.max_iterations, config.review.max_iterations);
        assert_eq!(parsed.limits.max_memory_bytes, config.limits.max_memory_bytes);
    }

    #[test]
    fn test_config_parse_custom_values() {
        let toml_str = r#"
[llm]
provider = "openai_compat"
model = "local-model"
base_url = "http://192.168.1.100:8080"
api_key = "sk-test"
request_timeout_secs = 30

[review]
max_iterations = 5
auto_correct = false

[limits]
max_wall_time_secs = 2
max_memory_bytes = 67108864
max_output_bytes = 4096
network_allowed = true
filesystem_allowed = false
"#;
        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.llm.provider, "openai_compat");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.review.max_iterations, 5);
        assert!(!config.review.auto_correct);
        assert_eq!(config.limits.max_output_bytes, 4096);
        assert!(config.limits.network_allowed);
    }

    #[test]
    fn test_config_parse_invalid_toml() {
        let result = Config::from_toml("this is not valid toml {{{");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_parse_missing_section() {
        // Missing [limits] section
        let toml_str = r#"
[llm]
provider = "ollama"
model = "test"
base_url = "http://localhost:11434"
request_timeout_secs = 60

[review]
max_iterations = 3
auto_correct = true
"#;
        let result = Config::from_toml(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_parse_wrong_type() {
        // max_iterations should be an integer, not a string
        let toml_str = r#"
[llm]
provider = "ollama"
model = "test"
base_url = "http://localhost:11434"
request_timeout_secs = 60

[review]
max_iterations = "not a number"
auto_correct = true

[limits]
max_wall_time_secs = 5
max_memory_bytes = 1024
max_output_bytes = 1024
network_allowed = false
filesystem_allowed = false
"#;
        let result = Config::from_toml(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_limits_config_converts_to_resource_limits() {
        let config = Config::default();
        let limits = config.limits.to_limits();
        assert_eq!(limits.max_wall_time, Duration::from_secs(5));
        assert_eq!(limits.max_memory, 256 * 1024 * 1024);
        assert_eq!(limits.max_output_bytes, 1024 * 1024);
    }
}
