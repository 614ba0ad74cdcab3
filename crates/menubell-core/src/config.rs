//! Menubell configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MenubellError, Result};

/// Root configuration, loaded from `~/.menubell/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MenubellConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl MenubellConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MenubellError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MenubellError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MenubellError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Menubell home directory (~/.menubell).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".menubell")
    }
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Facebook Graph API access token.
    #[serde(default)]
    pub access_token: String,
    /// WhatsApp Phone Number ID.
    #[serde(default)]
    pub phone_number_id: String,
    /// Webhook verify token (for the GET challenge).
    #[serde(default)]
    pub webhook_verify_token: String,
    /// Graph API version segment.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_api_version() -> String {
    "v21.0".into()
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            phone_number_id: String::new(),
            webhook_verify_token: String::new(),
            api_version: default_api_version(),
        }
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8390
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Reminder engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindersConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Hours a pending notification may wait for a reply before expiring.
    #[serde(default = "default_pending_expiration")]
    pub pending_expiration_hours: i64,
    /// Seconds after which a stuck run-lock is considered stale.
    #[serde(default = "default_run_lock_stale")]
    pub run_lock_stale_secs: i64,
    /// Shortened eligibility lookback for manual testing.
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "default_test_lookback")]
    pub test_mode_lookback_minutes: i64,
    /// Shop URL substituted into template bodies.
    #[serde(default = "default_shop_url")]
    pub shop_url: String,
    #[serde(default = "default_menu_created_template")]
    pub menu_created_template: TemplateConfig,
    #[serde(default = "default_menu_closing_template")]
    pub menu_closing_template: TemplateConfig,
    #[serde(default = "default_initial_template")]
    pub initial_template: TemplateConfig,
}

fn default_check_interval() -> u64 {
    300
}

fn default_pending_expiration() -> i64 {
    48
}

fn default_run_lock_stale() -> i64 {
    600
}

fn default_test_lookback() -> i64 {
    10
}

fn default_shop_url() -> String {
    "https://pedidos.menubell.app".into()
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            pending_expiration_hours: default_pending_expiration(),
            run_lock_stale_secs: default_run_lock_stale(),
            test_mode: false,
            test_mode_lookback_minutes: default_test_lookback(),
            shop_url: default_shop_url(),
            menu_created_template: default_menu_created_template(),
            menu_closing_template: default_menu_closing_template(),
            initial_template: default_initial_template(),
        }
    }
}

/// A pre-approved provider template reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub name: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "es".into()
}

fn default_menu_created_template() -> TemplateConfig {
    TemplateConfig {
        name: "nuevos_menus".into(),
        language: default_language(),
    }
}

fn default_menu_closing_template() -> TemplateConfig {
    TemplateConfig {
        name: "menus_por_cerrar".into(),
        language: default_language(),
    }
}

fn default_initial_template() -> TemplateConfig {
    TemplateConfig {
        name: "hello_world".into(),
        language: "en_US".into(),
    }
}

/// SQLite location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the database file; `:memory:` is accepted for testing.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    MenubellConfig::home_dir()
        .join("menubell.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MenubellConfig::default();
        assert_eq!(cfg.gateway.port, 8390);
        assert_eq!(cfg.reminders.pending_expiration_hours, 48);
        assert_eq!(cfg.whatsapp.api_version, "v21.0");
    }

    #[test]
    fn test_partial_toml() {
        let cfg: MenubellConfig = toml::from_str(
            r#"
            [whatsapp]
            access_token = "tok"
            phone_number_id = "12345"

            [reminders]
            pending_expiration_hours = 12
            "#,
        )
        .unwrap();
        assert_eq!(cfg.whatsapp.access_token, "tok");
        assert_eq!(cfg.reminders.pending_expiration_hours, 12);
        // untouched sections keep their defaults
        assert_eq!(cfg.reminders.check_interval_secs, 300);
        assert_eq!(cfg.gateway.host, "127.0.0.1");
    }
}
