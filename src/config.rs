//! Application-level configuration loading: admin allow-list, token secret and game timings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_ARENA_CONFIG_PATH";
/// Environment variable overriding the bearer token secret.
const JWT_SECRET_ENV: &str = "QUIZ_ARENA_JWT_SECRET";
/// Environment variable overriding the admin allow-list (comma separated).
const ADMIN_EMAILS_ENV: &str = "QUIZ_ARENA_ADMIN_EMAILS";

const DEFAULT_REVEAL_SECONDS: u32 = 5;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    admin_emails: Vec<String>,
    jwt_secret: String,
    answer_reveal_seconds: u32,
    tick_interval_ms: u64,
}

impl AppConfig {
    /// Build a configuration from explicit values.
    pub fn new(admin_emails: Vec<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            admin_emails: admin_emails
                .into_iter()
                .map(|email| normalize_email(&email))
                .filter(|email| !email.is_empty())
                .collect(),
            jwt_secret: jwt_secret.into(),
            ..Self::default()
        }
    }

    /// Load the application configuration from disk and the environment, falling back to defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        admins = app_config.admin_emails.len(),
                        "loaded configuration file"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        if let Some(secret) = env::var(JWT_SECRET_ENV).ok().filter(|s| !s.is_empty()) {
            config.jwt_secret = secret;
        }
        if let Ok(emails) = env::var(ADMIN_EMAILS_ENV) {
            config.admin_emails = emails
                .split(',')
                .map(normalize_email)
                .filter(|email| !email.is_empty())
                .collect();
        }

        if config.jwt_secret.is_empty() {
            warn!("no bearer token secret configured; every admin request will be rejected");
        }
        if config.admin_emails.is_empty() {
            warn!("admin allow-list is empty; every admin request will be rejected");
        }
        config
    }

    /// Whether `email` is on the admin allow-list (case-insensitive).
    pub fn is_admin(&self, email: &str) -> bool {
        let email = normalize_email(email);
        self.admin_emails.iter().any(|allowed| *allowed == email)
    }

    /// HMAC secret used to verify bearer identity tokens.
    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    /// How long the correct answer stays revealed.
    pub fn answer_reveal(&self) -> Duration {
        Duration::from_secs(u64::from(self.answer_reveal_seconds))
    }

    /// Interval of the clock-only recomputation tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(50))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            admin_emails: Vec::new(),
            jwt_secret: String::new(),
            answer_reveal_seconds: DEFAULT_REVEAL_SECONDS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    admin_emails: Vec<String>,
    #[serde(default)]
    jwt_secret: Option<String>,
    #[serde(default)]
    answer_reveal_seconds: Option<u32>,
    #[serde(default)]
    tick_interval_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let mut config = AppConfig::new(value.admin_emails, value.jwt_secret.unwrap_or_default());
        if let Some(seconds) = value.answer_reveal_seconds {
            config.answer_reveal_seconds = seconds;
        }
        if let Some(interval) = value.tick_interval_ms {
            config.tick_interval_ms = interval;
        }
        config
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
