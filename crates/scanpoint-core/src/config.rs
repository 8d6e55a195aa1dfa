//! Application configuration management.
//!
//! Configuration is layered, later sources winning:
//! 1. built-in defaults
//! 2. a TOML file (see [`default_config_path`])
//! 3. `SCANPOINT_<SECTION>__<KEY>` environment variables, e.g.
//!    `SCANPOINT_SCANNER__EVENT_ID=spring-gala`
//!
//! Every loaded configuration is validated; all problems are reported at once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::types::ScanMode;

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "SCANPOINT";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanpointConfig {
    /// Ticketing service connection.
    pub api: ApiConfig,
    /// Scan session behavior.
    pub scanner: ScannerConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Ticketing service connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Root URL of the ticketing API.
    pub base_url: String,
    /// Per-request timeout of the HTTP client, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl ApiConfig {
    /// Parses [`Self::base_url`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an absolute http(s) URL.
    pub fn parsed_base_url(&self) -> ConfigResult<Url> {
        let url = Url::parse(self.base_url.trim()).map_err(|err| ConfigError::ValidationError {
            field: "api.base_url".to_string(),
            message: err.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError {
                field: "api.base_url".to_string(),
                message: format!("scheme must be http or https, got '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Scan session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Event scans are validated against. Scanning is refused until set.
    pub event_id: Option<String>,
    /// Mode the session starts in.
    pub mode: ScanMode,
    /// Repeats of the same code inside this window are ignored.
    pub dedup_window_ms: u64,
    /// Deadline of a validation call.
    pub validation_timeout_ms: u64,
    /// Scanning is forced back on this long after a scan is accepted.
    pub failsafe_ms: u64,
    /// Informational notices resume scanning after this long.
    pub auto_resume_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let timings = ScanTimings::default();
        Self {
            event_id: None,
            mode: ScanMode::CheckIn,
            dedup_window_ms: millis(timings.dedup_window),
            validation_timeout_ms: millis(timings.validation_timeout),
            failsafe_ms: millis(timings.failsafe),
            auto_resume_ms: millis(timings.auto_resume),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ScannerConfig {
    /// Timer settings as [`Duration`]s.
    #[must_use]
    pub const fn timings(&self) -> ScanTimings {
        ScanTimings {
            dedup_window: Duration::from_millis(self.dedup_window_ms),
            validation_timeout: Duration::from_millis(self.validation_timeout_ms),
            failsafe: Duration::from_millis(self.failsafe_ms),
            auto_resume: Duration::from_millis(self.auto_resume_ms),
        }
    }
}

/// Every timer the scan pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTimings {
    /// Dedup window of the scan gate.
    pub dedup_window: Duration,
    /// Deadline of a validation call.
    pub validation_timeout: Duration,
    /// Emergency resume after a scan is accepted.
    pub failsafe: Duration,
    /// Resume after an informational notice.
    pub auto_resume: Duration,
}

impl Default for ScanTimings {
    fn default() -> Self {
        Self {
            dedup_window: crate::gate::DEFAULT_DEDUP_WINDOW,
            validation_timeout: crate::validation::DEFAULT_VALIDATION_TIMEOUT,
            failsafe: Duration::from_millis(8000),
            auto_resume: Duration::from_millis(3000),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// JSON file logs plus compact stderr instead of pretty stderr.
    pub production: bool,
    /// Directory for production log files.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            production: false,
            directory: None,
        }
    }
}

/// Default location of the configuration file.
///
/// `~/.config/scanpoint/config.toml` on Linux, the platform equivalent
/// elsewhere, `./scanpoint.toml` when no home directory can be determined.
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "scanpoint").map_or_else(
        || PathBuf::from("scanpoint.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

impl ScanpointConfig {
    /// Loads configuration from defaults, `path` (if it exists) and the
    /// environment, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let loaded: Self = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Loads from [`default_config_path`].
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn load_default() -> ConfigResult<Self> {
        Self::load(&default_config_path())
    }

    /// Checks every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single problem found, or
    /// [`ConfigError::MultipleValidationErrors`] when there are several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if let Err(err) = self.api.parsed_base_url() {
            errors.push(err);
        }
        if self.api.request_timeout_secs == 0 {
            errors.push(invalid("api.request_timeout_secs", "must be greater than zero"));
        }

        let scanner = &self.scanner;
        for (field, value) in [
            ("scanner.dedup_window_ms", scanner.dedup_window_ms),
            ("scanner.validation_timeout_ms", scanner.validation_timeout_ms),
            ("scanner.failsafe_ms", scanner.failsafe_ms),
            ("scanner.auto_resume_ms", scanner.auto_resume_ms),
        ] {
            if value == 0 {
                errors.push(invalid(field, "must be greater than zero"));
            }
        }
        if scanner.failsafe_ms <= scanner.validation_timeout_ms {
            errors.push(invalid(
                "scanner.failsafe_ms",
                &format!(
                    "must exceed scanner.validation_timeout_ms ({})",
                    scanner.validation_timeout_ms
                ),
            ));
        }
        if scanner.event_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            errors.push(invalid("scanner.event_id", "must not be blank when set"));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.to_string(),
    }
}
