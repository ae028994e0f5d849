//! # Configuration Management
//!
//! This module loads the client configuration from several sources and turns it
//! into the plain values the driver and sessions are built with.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Command line options (`--voice`, `--output-dir`, ...)
//! 2. Environment variables (`SPEECHTRANSLATE_TRANSPORT__CHUNK_DELAY_MS=250`)
//! 3. Settings file (`~/.speechtranslation/settings.toml` or `--config PATH`)
//! 4. Default values (defined in the Default impl)
//!
//! ## Settings File Bootstrap:
//! On first use the settings file does not exist yet. It is created together
//! with its directory and filled with the defaults, so users have a documented
//! starting point to edit.
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: The same structs are deserialized from the layered sources and
//!   serialized into the bootstrap file
//! - **Builder pattern**: `config::Config::builder()` stacks the sources
//! - **Option<T>**: CLI overrides are only applied when the flag was given

use crate::driver::FailurePolicy;
use crate::endpoint;
use crate::error::{AppError, AppResult};
use crate::output::ResponseWriter;
use crate::session::transport::TransportLimits;
use crate::session::{Pacing, SessionSettings};
use crate::validate::{AudioFormat, ProfanityAction, ProfanityMarker};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Directory under the home directory that holds the settings file.
pub const SETTINGS_DIR: &str = ".speechtranslation";
pub const SETTINGS_FILE: &str = "settings.toml";
/// Prefix of environment variables that override settings.
pub const ENV_PREFIX: &str = "SPEECHTRANSLATE";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each group maps to one table in the settings file and one concern in the
/// client: where to connect, how to pace and bound the connection, where to
/// put results, and how a run reacts to failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub transport: TransportConfig,
    pub output: OutputConfig,
    pub run: RunConfig,
}

/// Translation service endpoint and request options.
///
/// ## Fields:
/// - `endpoint`: Base URI, `ws://` or `wss://`
/// - `path`: Resource path appended to the endpoint
/// - `version`: API version marker as `key=value`
/// - `features`: Comma separated list (`TextToSpeech`, `Partial`, `TimingInfo`)
/// - `voice`: Voice for the synthesized translation; empty lets the service pick
/// - `audio_format`: Format of the returned audio (`audio/wav` or `audio/mp3`)
/// - `profanity_action` / `profanity_marker`: How profanity is handled
/// - `subscription_key`: API key; empty means the endpoint needs none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub endpoint: String,
    pub path: String,
    pub version: String,
    pub features: String,
    pub voice: String,
    pub audio_format: String,
    pub profanity_action: String,
    pub profanity_marker: String,
    pub subscription_key: String,
}

/// Connection limits and pacing.
///
/// Durations are plain milliseconds so the settings file stays readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub max_binary_message_bytes: usize,
    pub max_text_message_bytes: usize,
    /// Longest silence on the connection before it is considered dead
    pub idle_timeout_ms: u64,
    /// Largest single inbound frame
    pub input_buffer_bytes: usize,
    /// Bound on every single send
    pub upload_timeout_ms: u64,
    /// Time the service gets to answer after the upload
    pub response_timeout_ms: u64,
    /// Pause between audio chunks
    pub chunk_delay_ms: u64,
    /// Trailing silence that marks the end of speech; 0 disables it
    pub silence_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Empty means the current working directory
    pub dir: String,
    pub postfix: String,
    pub omit_text: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub continue_on_error: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                endpoint: "wss://dev.microsofttranslator.com".to_string(),
                path: "/speech/translate".to_string(),
                version: "api-version=1.0".to_string(),
                features: "TextToSpeech".to_string(),
                voice: String::new(),
                audio_format: AudioFormat::Wav.as_str().to_string(),
                profanity_action: ProfanityAction::Marked.as_str().to_string(),
                profanity_marker: ProfanityMarker::Asterisk.as_str().to_string(),
                subscription_key: String::new(),
            },
            transport: TransportConfig {
                max_binary_message_bytes: 16 * 1024 * 1024,
                max_text_message_bytes: 1024 * 1024,
                idle_timeout_ms: 300_000, // 5 minutes
                input_buffer_bytes: 16 * 1024 * 1024,
                upload_timeout_ms: 1_000,
                response_timeout_ms: 30_000,
                chunk_delay_ms: 500,
                silence_bytes: 320_000, // 10 s of 16 kHz mono 16-bit
            },
            output: OutputConfig {
                dir: String::new(),
                postfix: ".translation".to_string(),
                omit_text: false,
            },
            run: RunConfig {
                continue_on_error: false,
            },
        }
    }
}

/// Values given on the command line; `None` leaves the configured value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub features: Option<String>,
    pub voice: Option<String>,
    pub audio_format: Option<String>,
    pub profanity_action: Option<String>,
    pub profanity_marker: Option<String>,
    pub subscription_key: Option<String>,
    pub output_dir: Option<String>,
    pub output_postfix: Option<String>,
    pub omit_text: Option<bool>,
    pub continue_on_error: Option<bool>,
}

/// `~/.speechtranslation/settings.toml`
pub fn default_settings_path() -> AppResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AppError::ConfigInit("cannot determine the home directory".to_string()))?;
    Ok(home.join(SETTINGS_DIR).join(SETTINGS_FILE))
}

/// Create the settings file with the defaults if it is missing or empty.
///
/// ## Returns:
/// - **Ok(true)**: The file was written
/// - **Ok(false)**: A non-empty file was already there
/// - **Err(ConfigInit)**: The path is a directory or cannot be written
pub fn bootstrap_settings_file(path: &Path) -> AppResult<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            return Err(AppError::ConfigInit(format!(
                "{} is a directory, expected a settings file",
                path.display()
            )))
        }
        Ok(meta) if meta.len() > 0 => return Ok(false),
        _ => {}
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::ConfigInit(format!("cannot create {}: {}", parent.display(), e)))?;
    }

    let defaults = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| AppError::ConfigInit(format!("cannot serialize default settings: {}", e)))?;
    fs::write(path, defaults)
        .map_err(|e| AppError::ConfigInit(format!("cannot write {}: {}", path.display(), e)))?;

    info!("Created settings file {} with default values", path.display());
    Ok(true)
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `SPEECHTRANSLATE_API__ENDPOINT=ws://localhost:9000`
    /// - `SPEECHTRANSLATE_TRANSPORT__CHUNK_DELAY_MS=250`
    /// - `SPEECHTRANSLATE_OUTPUT__OMIT_TEXT=true`
    pub fn load(settings_path: &Path, overrides: &ConfigOverrides) -> AppResult<Self> {
        Self::load_with_env(settings_path, overrides, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(settings_path: &Path, overrides: &ConfigOverrides, env: Environment) -> AppResult<Self> {
        bootstrap_settings_file(settings_path)?;

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(File::from(settings_path).format(FileFormat::Toml).required(false))
            .add_source(env)
            .set_override_option("api.features", overrides.features.clone())?
            .set_override_option("api.voice", overrides.voice.clone())?
            .set_override_option("api.audio_format", overrides.audio_format.clone())?
            .set_override_option("api.profanity_action", overrides.profanity_action.clone())?
            .set_override_option("api.profanity_marker", overrides.profanity_marker.clone())?
            .set_override_option("api.subscription_key", overrides.subscription_key.clone())?
            .set_override_option("output.dir", overrides.output_dir.clone())?
            .set_override_option("output.postfix", overrides.output_postfix.clone())?
            .set_override_option("output.omit_text", overrides.omit_text)?
            .set_override_option("run.continue_on_error", overrides.continue_on_error)?;

        let config: AppConfig = settings.build()?.try_deserialize()?;
        debug!("Configuration loaded from {}", settings_path.display());
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The endpoint is a `ws`/`wss` URI and the version is `key=value`
    /// - Every option value is one the service understands
    /// - Limits and timeouts are non-zero
    /// - The postfix is not empty, so outputs never overwrite their input
    pub fn validate(&self) -> AppResult<()> {
        endpoint::parse_endpoint(&self.api.endpoint)?;
        if !self.api.version.contains('=') {
            return Err(AppError::validation("api.version", "expected key=value"));
        }
        crate::validate::parse_features(&self.api.features)?;
        self.api.audio_format.parse::<AudioFormat>()?;
        self.api.profanity_action.parse::<ProfanityAction>()?;
        self.api.profanity_marker.parse::<ProfanityMarker>()?;

        let positive = [
            ("transport.max_binary_message_bytes", self.transport.max_binary_message_bytes as u64),
            ("transport.max_text_message_bytes", self.transport.max_text_message_bytes as u64),
            ("transport.idle_timeout_ms", self.transport.idle_timeout_ms),
            ("transport.input_buffer_bytes", self.transport.input_buffer_bytes as u64),
            ("transport.upload_timeout_ms", self.transport.upload_timeout_ms),
            ("transport.response_timeout_ms", self.transport.response_timeout_ms),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(AppError::validation(key, "must be greater than 0"));
            }
        }

        if self.output.postfix.is_empty() {
            return Err(AppError::validation("output.postfix", "must not be empty"));
        }

        Ok(())
    }

    /// The configured output directory, or the working directory when unset.
    pub fn output_dir(&self) -> AppResult<PathBuf> {
        if self.output.dir.trim().is_empty() {
            std::env::current_dir()
                .map_err(|e| AppError::Internal(format!("cannot determine the working directory: {}", e)))
        } else {
            Ok(PathBuf::from(&self.output.dir))
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.run.continue_on_error {
            FailurePolicy::ContinueOnError
        } else {
            FailurePolicy::StopOnFirstFailure
        }
    }

    /// Resolve everything a session needs into plain values.
    pub fn session_settings(&self, output_dir: PathBuf) -> SessionSettings {
        let t = &self.transport;
        SessionSettings {
            limits: TransportLimits {
                max_binary_message_bytes: t.max_binary_message_bytes,
                max_text_message_bytes: t.max_text_message_bytes,
                idle_timeout: Duration::from_millis(t.idle_timeout_ms),
                input_buffer_bytes: t.input_buffer_bytes,
            },
            pacing: Pacing {
                chunk_delay: Duration::from_millis(t.chunk_delay_ms),
                silence_bytes: t.silence_bytes,
                send_timeout: Duration::from_millis(t.upload_timeout_ms),
            },
            writer: ResponseWriter::new(output_dir, self.output.postfix.clone(), self.output.omit_text),
            response_timeout: Duration::from_millis(t.response_timeout_ms),
        }
    }
}
