//! Configuration types for the tutor pipeline.
//!
//! Configuration is read from `tutor.json` (camelCase keys, every field
//! optional) and may then be overridden from the process environment by the
//! binary. Library code only ever sees the resulting [`Config`] value.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "tutor.json";

/// Default chat-completions endpoint shared by both models.
const DEFAULT_API_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

/// Default vision model used for recognition.
fn default_vision_model() -> String {
    "glm-4.6v-flashx".to_string()
}

/// Default text model used for analysis and generation.
fn default_text_model() -> String {
    "glm-4.7-flashx".to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

/// Default per-request timeout in seconds.
const fn default_request_timeout() -> u64 {
    120
}

/// Default ceiling on decoded image size (5 MiB).
const fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024
}

/// Default capacity of the channel between relay and consumer.
const fn default_stream_buffer() -> usize {
    32
}

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Endpoint used for image recognition.
    #[serde(default = "ModelEndpoint::vision")]
    pub vision: ModelEndpoint,

    /// Endpoint used for analysis and solution generation.
    #[serde(default = "ModelEndpoint::text")]
    pub text: ModelEndpoint,

    /// Deadline for a single model call, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Largest accepted decoded image, in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Ask the text model to emit its reasoning trace.
    #[serde(default)]
    pub enable_thinking: bool,

    /// Bounded channel capacity used when relaying a stream.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vision: ModelEndpoint::vision(),
            text: ModelEndpoint::text(),
            request_timeout_secs: default_request_timeout(),
            max_image_bytes: default_max_image_bytes(),
            enable_thinking: false,
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `tutor.json` in the current directory. If not found, returns
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `tutor.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file cannot be read or
    /// parsed, and `TutorError::ConfigValidationError` if a value is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from environment-style variables.
    ///
    /// `lookup` is called with each `TUTOR_*` variable name; `None` leaves
    /// the field untouched. Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if a numeric or boolean
    /// variable cannot be parsed.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TUTOR_VISION_API_URL") {
            self.vision.api_url = v;
        }
        if let Some(v) = get("TUTOR_VISION_API_KEY") {
            self.vision.api_key = Some(v);
        }
        if let Some(v) = get("TUTOR_VISION_MODEL") {
            self.vision.model = v;
        }
        if let Some(v) = get("TUTOR_TEXT_API_URL") {
            self.text.api_url = v;
        }
        if let Some(v) = get("TUTOR_TEXT_API_KEY") {
            self.text.api_key = Some(v);
        }
        if let Some(v) = get("TUTOR_TEXT_MODEL") {
            self.text.model = v;
        }
        if let Some(v) = get("TUTOR_REQUEST_TIMEOUT") {
            self.request_timeout_secs = parse_number("TUTOR_REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = get("TUTOR_MAX_IMAGE_BYTES") {
            self.max_image_bytes = parse_number("TUTOR_MAX_IMAGE_BYTES", &v)?;
        }
        if let Some(v) = get("TUTOR_ENABLE_THINKING") {
            self.enable_thinking = match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(TutorError::config_validation(
                        format!("TUTOR_ENABLE_THINKING has invalid value '{other}'"),
                        "Use true or false",
                    ));
                }
            };
        }
        Ok(())
    }

    /// Returns the per-request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 second in your tutor.json",
            ));
        }

        if self.max_image_bytes == 0 {
            return Err(TutorError::config_validation(
                "maxImageBytes must be greater than 0",
                "Set maxImageBytes to a positive byte count (default 5242880)",
            ));
        }

        if self.stream_buffer == 0 {
            return Err(TutorError::config_validation(
                "streamBuffer must be greater than 0",
                "Set streamBuffer to at least 1 in your tutor.json",
            ));
        }

        self.vision.validate("vision")?;
        self.text.validate("text")
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        TutorError::config_validation(
            format!("{name} has invalid value '{value}'"),
            format!("Set {name} to a non-negative integer"),
        )
    })
}

/// An OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEndpoint {
    /// Full URL of the chat-completions route.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer token. Required only when the HTTP gateway is built.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Model identifier sent with every request.
    pub model: String,
}

impl ModelEndpoint {
    /// Default endpoint for the vision model.
    #[must_use]
    pub fn vision() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_vision_model(),
        }
    }

    /// Default endpoint for the text model.
    #[must_use]
    pub fn text() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_text_model(),
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(TutorError::config_validation(
                format!("{name}.apiUrl must be an http(s) URL, got '{}'", self.api_url),
                format!("Set {name}.apiUrl to the full chat-completions URL in your tutor.json"),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(TutorError::config_validation(
                format!("{name}.model must not be empty"),
                format!("Set {name}.model in your tutor.json"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();
        assert_eq!(config.vision.model, "glm-4.6v-flashx");
        assert_eq!(config.text.model, "glm-4.7-flashx");
        assert_eq!(config.text.api_url, DEFAULT_API_URL);
        assert_eq!(config.request_timeout_secs, 120);
        assert_eq!(config.max_image_bytes, 5 * 1024 * 1024);
        assert!(!config.enable_thinking);
        assert_eq!(config.stream_buffer, 32);
        assert!(config.vision.api_key.is_none());
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.request_timeout_secs, 120);
        assert_eq!(config.vision.model, "glm-4.6v-flashx");
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "text": {"apiUrl": "http://localhost:9000/v1/chat/completions", "model": "local"},
            "requestTimeoutSecs": 5,
            "enableThinking": true
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.text.model, "local");
        assert_eq!(
            config.text.api_url,
            "http://localhost:9000/v1/chat/completions"
        );
        assert_eq!(config.request_timeout_secs, 5);
        assert!(config.enable_thinking);
        assert_eq!(config.vision.model, "glm-4.6v-flashx");
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = Config::default();
        config.text.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let config: Config = serde_json::from_str(r#"{"port": 8080}"#).unwrap();
        assert_eq!(config.stream_buffer, 32);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TUTOR_TEXT_API_KEY", "key-1"),
            ("TUTOR_VISION_MODEL", "vision-x"),
            ("TUTOR_REQUEST_TIMEOUT", "30"),
            ("TUTOR_ENABLE_THINKING", "TRUE"),
            ("TUTOR_TEXT_MODEL", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides(|name| vars.get(name).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.text.api_key.as_deref(), Some("key-1"));
        assert_eq!(config.vision.model, "vision-x");
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.enable_thinking);
        assert_eq!(config.text.model, "glm-4.7-flashx");
    }

    #[test]
    fn test_env_override_invalid_number() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(|name| {
                (name == "TUTOR_MAX_IMAGE_BYTES").then(|| "lots".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, TutorError::ConfigValidationError { .. }));
        assert!(err.to_string().contains("TUTOR_MAX_IMAGE_BYTES"));
    }

    #[test]
    fn test_load_from_file_valid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_tutor_valid.json");
        let json = r#"{"maxImageBytes": 1024, "vision": {"model": "v2"}}"#;
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.max_image_bytes, 1024);
        assert_eq!(config.vision.model, "v2");
        assert_eq!(config.vision.api_url, DEFAULT_API_URL);

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_tutor_invalid.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(b"{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, TutorError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let config = Config::load_from_file(&PathBuf::from("/nonexistent/path/tutor.json")).unwrap();
        assert_eq!(config.request_timeout_secs, 120);
    }

    #[test]
    fn test_load_from_dir_no_config_returns_default() {
        let dir = std::env::temp_dir().join("test_tutor_empty_dir");
        std::fs::create_dir_all(&dir).unwrap();
        let config = Config::load_from_dir(&dir).unwrap();
        assert_eq!(config.stream_buffer, 32);
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let config = Config {
            request_timeout_secs: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requestTimeoutSecs"));
    }

    #[test]
    fn test_config_validation_bad_url() {
        let mut config = Config::default();
        config.vision.api_url = "ftp://example.com".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vision.apiUrl"));
    }

    #[test]
    fn test_config_validation_empty_model() {
        let mut config = Config::default();
        config.text.model = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_timeout_duration() {
        let config = Config {
            request_timeout_secs: 7,
            ..Config::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_secs(7));
    }
}
