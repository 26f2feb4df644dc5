//! Configuration management for the user service.
//!
//! Settings come from a JSON profile under `./.config/`, chosen by the `ENV`
//! variable, with a few environment overrides on top:
//!
//! 1. `.env` is loaded if present
//! 2. `ENV` selects the profile: `prod` reads `prod.json`, anything else
//!    (including unset) reads `dev.json`
//! 3. `{{.Env}}` and `{{.EnvLow}}` in the file are replaced with the
//!    environment name (capitalised / lower-cased) before parsing
//! 4. `PORT`, `KAFKA_BROKERS`, `KAFKA_GROUP_ID`, `USER_TICKETS_TOPIC` and
//!    `SHUTDOWN_TIMEOUT_MS` override the file
//!
//! `CONFIG_DIR` points at a different profile directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use user_service_runtime::{RestartPolicy, RetryPolicy};

/// Variable selecting the profile.
pub const ENV_VAR: &str = "ENV";
/// Variable overriding the profile directory.
pub const CONFIG_DIR_VAR: &str = "CONFIG_DIR";
/// Profile directory used when `CONFIG_DIR` is unset.
pub const DEFAULT_CONFIG_DIR: &str = "./.config";

/// Errors while loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The profile file could not be read
    #[error("could not read {path}: {source}")]
    Read {
        /// Profile file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The profile file is not valid settings JSON
    #[error("could not parse {path}: {source}")]
    Parse {
        /// Profile file
        path: PathBuf,
        /// JSON error
        source: serde_json::Error,
    },

    /// An override variable holds an unusable value
    #[error("invalid value {value:?} for {name}")]
    InvalidOverride {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
    },

    /// The settings are complete JSON but unusable
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP port
    pub port: u16,
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Broker settings
    pub kafka: KafkaSettings,
    /// Shutdown deadlines
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    /// Consumer settings
    #[serde(default)]
    pub consumer: ConsumerSettings,
    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// HTTP server settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listener restart behaviour
    pub restart: RestartSettings,
}

/// How the HTTP listener is restarted after a failed run.
///
/// With `backoff` on, consecutive failures (a port that is already taken,
/// for instance) wait `initial_delay_ms`, doubling up to `max_delay_ms`.
/// With it off the listener is restarted immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartSettings {
    /// Wait between failed runs
    pub backoff: bool,
    /// Delay after the first failure
    pub initial_delay_ms: u64,
    /// Upper bound on the delay
    pub max_delay_ms: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            backoff: true,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

impl RestartSettings {
    /// The restart policy these settings describe.
    #[must_use]
    pub fn policy(&self) -> RestartPolicy {
        if !self.backoff {
            return RestartPolicy::Immediate;
        }
        RestartPolicy::Backoff(
            RetryPolicy::builder()
                .initial_delay(Duration::from_millis(self.initial_delay_ms))
                .max_delay(Duration::from_millis(self.max_delay_ms))
                .multiplier(2.0)
                .build(),
        )
    }
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaSettings {
    /// Bootstrap brokers
    pub brokers: Vec<String>,
    /// Consumer group
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Topic names
    pub topics: Topics,
}

/// Topic names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    /// Topic carrying ticket-booked events
    pub user_tickets: String,
}

/// Shutdown deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Bound on the HTTP server's graceful shutdown
    pub server_timeout_ms: u64,
    /// Bound on the whole process shutdown
    pub process_timeout_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            server_timeout_ms: 5_000,
            process_timeout_ms: 15_000,
        }
    }
}

impl ShutdownSettings {
    /// Server shutdown bound.
    #[must_use]
    pub const fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    /// Process shutdown bound.
    #[must_use]
    pub const fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }
}

/// Consumer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// How long one read waits for a message
    pub read_timeout_ms: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 10_000,
        }
    }
}

impl ConsumerSettings {
    /// Per-read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder and serve `/metrics`
    pub enabled: bool,
}

fn default_group_id() -> String {
    "user-service".to_string()
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the profile cannot be read or parsed, an
    /// override is malformed, or the result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();

        let env = std::env::var(ENV_VAR).unwrap_or_default();
        let dir = std::env::var(CONFIG_DIR_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string());

        let mut settings = Self::from_profile(Path::new(&dir), &env)?;
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;

        tracing::info!(
            env = %profile_name(&env),
            port = settings.port,
            brokers = ?settings.kafka.brokers,
            topic = %settings.kafka.topics.user_tickets,
            "Configuration loaded"
        );
        Ok(settings)
    }

    /// Read and parse the profile for `env` from `dir`, without overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_profile(dir: &Path, env: &str) -> Result<Self, ConfigError> {
        let path = dir.join(format!("{}.json", profile_name(env)));
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        serde_json::from_str(&render_template(&raw, env))
            .map_err(|source| ConfigError::Parse { path, source })
    }

    /// Apply environment overrides, looking variables up with `var`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] for a value that does not parse.
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = var("PORT") {
            self.port = value
                .parse()
                .map_err(|_| ConfigError::InvalidOverride { name: "PORT", value })?;
        }
        if let Some(value) = var("KAFKA_BROKERS") {
            self.kafka.brokers = value
                .split(',')
                .map(str::trim)
                .filter(|broker| !broker.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = var("KAFKA_GROUP_ID") {
            self.kafka.group_id = value;
        }
        if let Some(value) = var("USER_TICKETS_TOPIC") {
            self.kafka.topics.user_tickets = value;
        }
        if let Some(value) = var("SHUTDOWN_TIMEOUT_MS") {
            self.shutdown.server_timeout_ms =
                value.parse().map_err(|_| ConfigError::InvalidOverride {
                    name: "SHUTDOWN_TIMEOUT_MS",
                    value,
                })?;
        }
        Ok(())
    }

    /// Reject settings the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::Invalid("kafka.brokers is empty".into()));
        }
        if self.kafka.topics.user_tickets.is_empty() {
            return Err(ConfigError::Invalid("kafka.topics.user_tickets is empty".into()));
        }
        let restart = &self.server.restart;
        if restart.backoff && restart.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.restart.initial_delay_ms must be positive".into(),
            ));
        }
        if restart.backoff && restart.initial_delay_ms > restart.max_delay_ms {
            return Err(ConfigError::Invalid(
                "server.restart.initial_delay_ms exceeds server.restart.max_delay_ms".into(),
            ));
        }
        if self.shutdown.server_timeout_ms > self.shutdown.process_timeout_ms {
            return Err(ConfigError::Invalid(
                "shutdown.server_timeout_ms exceeds shutdown.process_timeout_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Profile file stem for an `ENV` value.
#[must_use]
pub fn profile_name(env: &str) -> &'static str {
    match env {
        "prod" => "prod",
        _ => "dev",
    }
}

/// Substitute `{{.Env}}` and `{{.EnvLow}}` in a profile.
///
/// An empty `env` counts as `dev`.
#[must_use]
pub fn render_template(raw: &str, env: &str) -> String {
    let env = if env.is_empty() { "dev" } else { env };
    let mut chars = env.chars();
    let title = chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect::<String>())
        .unwrap_or_default();

    raw.replace("{{.EnvLow}}", &env.to_lowercase())
        .replace("{{.Env}}", &title)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const PROFILE: &str = r#"{
        "port": 8080,
        "kafka": {
            "brokers": ["localhost:9092"],
            "topics": { "user_tickets": "{{.Env}}.UserTickets" }
        }
    }"#;

    fn write_profile(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{name}.json")), body).unwrap();
    }

    #[test]
    fn unknown_environments_fall_back_to_dev() {
        assert_eq!(profile_name(""), "dev");
        assert_eq!(profile_name("dev"), "dev");
        assert_eq!(profile_name("prod"), "prod");
        assert_eq!(profile_name("staging"), "dev");
    }

    #[test]
    fn template_placeholders_are_substituted() {
        let rendered = render_template("{{.Env}}/{{.EnvLow}}", "staging");
        assert_eq!(rendered, "Staging/staging");

        let rendered = render_template("{{.Env}}/{{.EnvLow}}", "");
        assert_eq!(rendered, "Dev/dev");
    }

    #[test]
    fn profile_is_parsed_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "dev", PROFILE);

        let settings = Settings::from_profile(dir.path(), "").unwrap();

        assert_eq!(settings.port, 8080);
        assert_eq!(settings.kafka.topics.user_tickets, "Dev.UserTickets");
        assert_eq!(settings.kafka.group_id, "user-service");
        assert_eq!(settings.shutdown.server_timeout(), Duration::from_secs(5));
        assert_eq!(settings.shutdown.process_timeout(), Duration::from_secs(15));
        assert_eq!(settings.consumer.read_timeout(), Duration::from_secs(10));
        assert!(!settings.metrics.enabled);
        assert_eq!(settings.server.restart, RestartSettings::default());
    }

    #[test]
    fn restart_settings_map_to_a_backoff_policy() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(
            dir.path(),
            "dev",
            r#"{
                "port": 8080,
                "server": {
                    "restart": { "backoff": true, "initial_delay_ms": 50, "max_delay_ms": 150 }
                },
                "kafka": {
                    "brokers": ["localhost:9092"],
                    "topics": { "user_tickets": "tickets" }
                }
            }"#,
        );
        let settings = Settings::from_profile(dir.path(), "dev").unwrap();
        let policy = settings.server.restart.policy();

        assert_eq!(policy.delay_after(0), None);
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(50)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_after(5), Some(Duration::from_millis(150)));
    }

    #[test]
    fn restart_backoff_can_be_turned_off() {
        let restart = RestartSettings {
            backoff: false,
            ..RestartSettings::default()
        };
        assert_eq!(restart.policy(), RestartPolicy::Immediate);
    }

    #[test]
    fn default_restart_never_spins() {
        let policy = RestartSettings::default().policy();
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_after(30), Some(Duration::from_secs(10)));
    }

    #[test]
    fn staging_reads_dev_profile_with_its_own_name() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "dev", PROFILE);

        let settings = Settings::from_profile(dir.path(), "staging").unwrap();

        assert_eq!(settings.kafka.topics.user_tickets, "Staging.UserTickets");
    }

    #[test]
    fn missing_profile_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::from_profile(dir.path(), "prod").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_profile_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "dev", r#"{ "port": "eighty" }"#);

        let err = Settings::from_profile(dir.path(), "dev").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn environment_overrides_the_profile() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "dev", PROFILE);
        let mut settings = Settings::from_profile(dir.path(), "dev").unwrap();

        let vars: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9000"),
            ("KAFKA_BROKERS", "a:9092, b:9092,"),
            ("KAFKA_GROUP_ID", "users"),
            ("USER_TICKETS_TOPIC", "tickets"),
            ("SHUTDOWN_TIMEOUT_MS", "250"),
        ]);
        settings
            .apply_overrides(|name| vars.get(name).map(ToString::to_string))
            .unwrap();

        assert_eq!(settings.port, 9000);
        assert_eq!(settings.kafka.brokers, ["a:9092", "b:9092"]);
        assert_eq!(settings.kafka.group_id, "users");
        assert_eq!(settings.kafka.topics.user_tickets, "tickets");
        assert_eq!(settings.shutdown.server_timeout(), Duration::from_millis(250));
        settings.validate().unwrap();
    }

    #[test]
    fn malformed_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "dev", PROFILE);
        let mut settings = Settings::from_profile(dir.path(), "dev").unwrap();

        let err = settings
            .apply_overrides(|name| (name == "PORT").then(|| "http".to_string()))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidOverride { name: "PORT", .. }));
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "dev", PROFILE);
        let settings = Settings::from_profile(dir.path(), "dev").unwrap();

        let mut no_brokers = settings.clone();
        no_brokers.kafka.brokers.clear();
        assert!(no_brokers.validate().is_err());

        let mut inverted = settings.clone();
        inverted.shutdown.server_timeout_ms = 20_000;
        assert!(inverted.validate().is_err());

        let mut spinning = settings.clone();
        spinning.server.restart.initial_delay_ms = 0;
        assert!(spinning.validate().is_err());

        let mut capped_below_start = settings;
        capped_below_start.server.restart.max_delay_ms = 10;
        assert!(capped_below_start.validate().is_err());
    }

    #[test]
    fn shipped_profiles_parse() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join(".config");
        for env in ["dev", "prod"] {
            let settings = Settings::from_profile(&dir, env).expect(env);
            settings.validate().expect(env);
            assert!(matches!(
                settings.server.restart.policy(),
                RestartPolicy::Backoff(_)
            ));
        }
    }
}
