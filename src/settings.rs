//! Configuration loading and validation.
//!
//! Sources apply in precedence order: command-line flags, environment
//! variables prefixed `BOT_`, a JSON file supplied via `--config`, then
//! defaults.

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Display name; matched by direct branches. Sanitised to `[a-z0-9_-]`.
    pub name: String,

    /// Alternate name for direct matching.
    pub alias: Option<String>,

    /// Minimum log level emitted.
    pub log_level: String,

    /// Enable periodic memory snapshotting.
    pub auto_save: bool,

    /// HTTP collaborator config, carried for the external server.
    pub use_server: bool,
    pub server_host: String,
    pub server_port: u16,
    pub server_secure: bool,

    /// Adapter identifiers resolved by the registry.
    pub message_adapter: String,
    pub nlu_adapter: Option<String>,
    pub storage_adapter: Option<String>,

    /// Minimum message length to invoke NLU.
    pub nlu_min_length: usize,

    /// Adapter operation timeout in milliseconds.
    pub request_timeout: u64,

    /// Autosave period in milliseconds.
    pub save_interval_ms: u64,

    /// Scene expiry in milliseconds.
    pub scene_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "bot".to_string(),
            alias: None,
            log_level: "info".to_string(),
            auto_save: true,
            use_server: false,
            server_host: "localhost".to_string(),
            server_port: 5000,
            server_secure: false,
            message_adapter: "shell".to_string(),
            nlu_adapter: None,
            storage_adapter: None,
            nlu_min_length: 10,
            request_timeout: 5000,
            save_interval_ms: 5000,
            scene_timeout_ms: 60_000,
        }
    }
}

/// Partial settings from a single source; `None` fields leave the lower
/// layer untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsOverlay {
    pub name: Option<String>,
    pub alias: Option<String>,
    pub log_level: Option<String>,
    pub auto_save: Option<bool>,
    pub use_server: Option<bool>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub server_secure: Option<bool>,
    pub message_adapter: Option<String>,
    pub nlu_adapter: Option<String>,
    pub storage_adapter: Option<String>,
    pub nlu_min_length: Option<usize>,
    pub request_timeout: Option<u64>,
    pub save_interval_ms: Option<u64>,
    pub scene_timeout_ms: Option<u64>,
}

impl SettingsOverlay {
    /// Build an overlay from `BOT_`-prefixed environment pairs. Unparsable
    /// values are logged and skipped.
    pub fn from_env_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut overlay = Self::default();
        for (key, value) in pairs {
            let Some(field) = key.strip_prefix("BOT_") else {
                continue;
            };
            match field {
                "NAME" => overlay.name = Some(value),
                "ALIAS" => overlay.alias = Some(value),
                "LOG_LEVEL" => overlay.log_level = Some(value),
                "AUTO_SAVE" => overlay.auto_save = parse_field(field, &value),
                "USE_SERVER" => overlay.use_server = parse_field(field, &value),
                "SERVER_HOST" => overlay.server_host = Some(value),
                "SERVER_PORT" => overlay.server_port = parse_field(field, &value),
                "SERVER_SECURE" => overlay.server_secure = parse_field(field, &value),
                "MESSAGE_ADAPTER" => overlay.message_adapter = Some(value),
                "NLU_ADAPTER" => overlay.nlu_adapter = Some(value),
                "STORAGE_ADAPTER" => overlay.storage_adapter = Some(value),
                "NLU_MIN_LENGTH" => overlay.nlu_min_length = parse_field(field, &value),
                "REQUEST_TIMEOUT" => overlay.request_timeout = parse_field(field, &value),
                "SAVE_INTERVAL_MS" => overlay.save_interval_ms = parse_field(field, &value),
                "SCENE_TIMEOUT_MS" => overlay.scene_timeout_ms = parse_field(field, &value),
                other => tracing::debug!(key = other, "ignoring unknown BOT_ variable"),
            }
        }
        overlay
    }

    /// Parse an overlay from a JSON config file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let overlay: Self = serde_json::from_str(&raw)?;
        Ok(overlay)
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(field, value, "unparsable BOT_ variable, ignoring");
            None
        }
    }
}

impl Settings {
    /// Apply an overlay on top of this layer.
    pub fn apply(&mut self, overlay: SettingsOverlay) {
        macro_rules! merge {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(value) = overlay.$field {
                    self.$field = value;
                })+
            };
        }
        merge!(
            name,
            log_level,
            auto_save,
            use_server,
            server_host,
            server_port,
            server_secure,
            message_adapter,
            nlu_min_length,
            request_timeout,
            save_interval_ms,
            scene_timeout_ms,
        );
        if overlay.alias.is_some() {
            self.alias = overlay.alias;
        }
        if overlay.nlu_adapter.is_some() {
            self.nlu_adapter = overlay.nlu_adapter;
        }
        if overlay.storage_adapter.is_some() {
            self.storage_adapter = overlay.storage_adapter;
        }
    }

    /// Resolve settings from defaults, an optional JSON file, the process
    /// environment, and CLI flags, lowest precedence first.
    pub fn resolve(
        config_file: Option<&Path>,
        env_pairs: impl IntoIterator<Item = (String, String)>,
        cli: SettingsOverlay,
    ) -> crate::Result<Self> {
        let mut settings = Self::default();
        if let Some(path) = config_file {
            settings.apply(SettingsOverlay::from_file(path)?);
        }
        settings.apply(SettingsOverlay::from_env_pairs(env_pairs));
        settings.apply(cli);
        settings.name = sanitize_name(&settings.name);
        settings.alias = settings.alias.as_deref().map(sanitize_name);
        Ok(settings)
    }

    pub fn identity(&self) -> crate::state::BotIdentity {
        crate::state::BotIdentity::new(self.name.clone(), self.alias.clone())
    }
}

/// Lowercase and strip everything outside `[a-z0-9_-]`.
pub fn sanitize_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
        .collect()
}
