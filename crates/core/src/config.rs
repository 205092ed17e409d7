use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("missing required fields: {fields:?}")]
    MissingRequiredFields { fields: Vec<String> },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub hub: HubConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    pub url: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_true")]
    pub wake_probe: bool,
    #[serde(default = "default_wake_timeout_seconds")]
    pub wake_timeout_seconds: u64,
    #[serde(default = "default_handshake_timeout_seconds")]
    pub handshake_timeout_seconds: u64,
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
}

impl HubConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            health_path: default_health_path(),
            wake_probe: true,
            wake_timeout_seconds: default_wake_timeout_seconds(),
            handshake_timeout_seconds: default_handshake_timeout_seconds(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
        }
    }

    /// The health endpoint polled to wake a scaled-to-zero hub.
    ///
    /// `health_path` is resolved against the hub URL's origin, so
    /// `https://chat.example.com/hubs/chat` yields
    /// `https://chat.example.com/health`.
    pub fn health_url(&self) -> Result<url::Url, ConfigError> {
        let hub = parse_hub_url(&self.url)?;
        let mut health = hub.join(&self.health_path).map_err(|e| ConfigError::InvalidValue {
            field: "hub.health_path".to_string(),
            message: e.to_string(),
        })?;

        // The probe is plain HTTP even when the hub speaks websockets.
        let scheme = match health.scheme() {
            "ws" => Some("http"),
            "wss" => Some("https"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            // `set_scheme` only fails between special and non-special schemes.
            let _ = health.set_scheme(scheme);
        }
        Ok(health)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    pub display_name: Option<String>,
    pub login_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages_per_conversation: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages_per_conversation: default_max_messages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_buffer: default_command_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    hub_url: Option<String>,
    display_name: Option<String>,
    login_name: Option<String>,
    log_level: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_wake_timeout_seconds() -> u64 {
    10
}

fn default_handshake_timeout_seconds() -> u64 {
    30
}

fn default_heartbeat_interval_seconds() -> u64 {
    15
}

fn default_max_messages() -> usize {
    50
}

fn default_command_buffer() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const VALID_HUB_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

const DEFAULT_CONFIG_TOML: &str = r#"[hub]
url = ""
health_path = "/health"
wake_probe = true
wake_timeout_seconds = 10
handshake_timeout_seconds = 30
heartbeat_interval_seconds = 15

[identity]
# display_name = "Ahmed Hassan"
# login_name = "ahassan"

[history]
max_messages_per_conversation = 50

[client]
command_buffer = 256

[logging]
level = "info"

[event_bus]
channel_capacity = 1024
"#;

/// Return the resolved platform-appropriate configuration file path.
pub fn config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "parley", "parley") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

/// Load configuration from the platform config path, merging environment
/// variable overrides. Returns a validated Config or a descriptive error.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

/// Load configuration from a specific path. Used by `load_config()` and tests.
pub fn load_config_from(path: PathBuf) -> Result<Config, ConfigError> {
    load_config_from_with_overrides(path, config_overrides_from_env())
}

/// Parse configuration from a TOML string directly (for testing).
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

fn load_config_from_with_overrides(
    path: PathBuf,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_default_config(&path)?;
            if overrides.hub_url.is_none() {
                return Err(ConfigError::MissingRequiredFields {
                    fields: vec!["hub.url".to_string()],
                });
            }
            DEFAULT_CONFIG_TOML.to_string()
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, overrides)
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides);
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        hub_url: std::env::var("PARLEY_HUB_URL").ok(),
        display_name: std::env::var("PARLEY_DISPLAY_NAME").ok(),
        login_name: std::env::var("PARLEY_LOGIN_NAME").ok(),
        log_level: std::env::var("PARLEY_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut Config, overrides: ConfigOverrides) {
    if let Some(url) = overrides.hub_url {
        config.hub.url = url;
    }
    if let Some(name) = overrides.display_name {
        config.identity.display_name = Some(name);
    }
    if let Some(name) = overrides.login_name {
        config.identity.login_name = Some(name);
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.hub.url.trim().is_empty() {
        return Err(ConfigError::MissingRequiredFields {
            fields: vec!["hub.url".to_string()],
        });
    }

    parse_hub_url(&config.hub.url)?;

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    if config.history.max_messages_per_conversation == 0 {
        return Err(ConfigError::InvalidValue {
            field: "history.max_messages_per_conversation".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    if config.hub.heartbeat_interval_seconds == 0 {
        return Err(ConfigError::InvalidValue {
            field: "hub.heartbeat_interval_seconds".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    Ok(())
}

fn parse_hub_url(raw: &str) -> Result<url::Url, ConfigError> {
    let url = url::Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        field: "hub.url".to_string(),
        message: e.to_string(),
    })?;

    if !VALID_HUB_SCHEMES.contains(&url.scheme()) {
        return Err(ConfigError::InvalidValue {
            field: "hub.url".to_string(),
            message: format!("scheme must be one of: {}", VALID_HUB_SCHEMES.join(", ")),
        });
    }

    Ok(url)
}

fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    Ok(())
}
