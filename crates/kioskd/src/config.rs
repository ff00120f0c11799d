use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by `KIOSK_CONFIG`,
/// then `KIOSK_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Serial device of the distance sensor.
    pub sensor_device: String,
    pub sensor_baud: u32,
    /// Longest wait for one sensor reading.
    pub sensor_timeout_ms: u64,
    /// Readings strictly below this distance activate capture.
    pub proximity_threshold_cm: f32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite customer database.
    pub db_path: PathBuf,
    /// Maximum L2 distance for a positive match.
    pub match_tolerance: f32,
    /// Minimum time between two notifications for the same customer.
    pub visit_window_hours: u64,
    pub store_max_attempts: u32,
    pub store_retry_delay_ms: u64,
    /// Cap for exponential retry backoff; 0 keeps the delay fixed.
    pub store_backoff_cap_ms: u64,
    /// Upper bound on a single store attempt.
    pub store_timeout_ms: u64,
    /// Delay between the voice greeting and the follow-up message.
    pub message_delay_secs: u64,
    /// Concurrent notification actions.
    pub worker_permits: usize,
    /// Size of the per-customer lock table.
    pub lock_shards: usize,
    pub text_api_url: String,
    pub text_model: String,
    pub speech_command: String,
    pub speech_rate_wpm: u32,
    pub dbus_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            sensor_device: "/dev/ttyACM0".to_string(),
            sensor_baud: 9600,
            sensor_timeout_ms: 1000,
            proximity_threshold_cm: 100.0,
            model_dir: kiosk_core::default_model_dir(),
            db_path: kiosk_store::default_db_path(),
            match_tolerance: 1.0,
            visit_window_hours: 24,
            store_max_attempts: 3,
            store_retry_delay_ms: 2000,
            store_backoff_cap_ms: 0,
            store_timeout_ms: 5000,
            message_delay_secs: 5,
            worker_permits: 8,
            lock_shards: 64,
            text_api_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            text_model: "llama-3.3-70b-versatile".to_string(),
            speech_command: "espeak-ng".to_string(),
            speech_rate_wpm: 130,
            dbus_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from the optional `KIOSK_CONFIG` file and `KIOSK_*`
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("KIOSK_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from environment variables. Unparseable values are
    /// ignored and the current value kept.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let env = Env(&var);
        env.string("KIOSK_CAMERA_DEVICE", &mut self.camera_device);
        env.string("KIOSK_SENSOR_DEVICE", &mut self.sensor_device);
        env.parse("KIOSK_SENSOR_BAUD", &mut self.sensor_baud);
        env.parse("KIOSK_SENSOR_TIMEOUT_MS", &mut self.sensor_timeout_ms);
        env.parse("KIOSK_PROXIMITY_THRESHOLD_CM", &mut self.proximity_threshold_cm);
        env.path("KIOSK_MODEL_DIR", &mut self.model_dir);
        env.path("KIOSK_DB_PATH", &mut self.db_path);
        env.parse("KIOSK_MATCH_TOLERANCE", &mut self.match_tolerance);
        env.parse("KIOSK_VISIT_WINDOW_HOURS", &mut self.visit_window_hours);
        env.parse("KIOSK_STORE_MAX_ATTEMPTS", &mut self.store_max_attempts);
        env.parse("KIOSK_STORE_RETRY_DELAY_MS", &mut self.store_retry_delay_ms);
        env.parse("KIOSK_STORE_BACKOFF_CAP_MS", &mut self.store_backoff_cap_ms);
        env.parse("KIOSK_STORE_TIMEOUT_MS", &mut self.store_timeout_ms);
        env.parse("KIOSK_MESSAGE_DELAY_SECS", &mut self.message_delay_secs);
        env.parse("KIOSK_WORKER_PERMITS", &mut self.worker_permits);
        env.parse("KIOSK_LOCK_SHARDS", &mut self.lock_shards);
        env.string("KIOSK_TEXT_API_URL", &mut self.text_api_url);
        env.string("KIOSK_TEXT_MODEL", &mut self.text_model);
        env.string("KIOSK_SPEECH_COMMAND", &mut self.speech_command);
        env.parse("KIOSK_SPEECH_RATE_WPM", &mut self.speech_rate_wpm);
        if let Some(v) = var("KIOSK_DBUS_ENABLED") {
            self.dbus_enabled = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_path("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_path("w600k_r50.onnx")
    }

    /// Path to the FER+ emotion model.
    pub fn emotion_model_path(&self) -> String {
        self.model_path("emotion-ferplus-8.onnx")
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn visit_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.visit_window_hours as i64)
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_secs(self.message_delay_secs)
    }
}

/// Credentials for the hosted collaborators. Read from the environment only.
#[derive(Clone, Default)]
pub struct Secrets {
    pub groq_api_key: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_whatsapp_number: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            groq_api_key: var("GROQ_API_KEY"),
            twilio_account_sid: var("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: var("TWILIO_AUTH_TOKEN"),
            twilio_whatsapp_number: var("TWILIO_WHATSAPP_NUMBER"),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("groq_api_key", &self.groq_api_key.is_some())
            .field("twilio_account_sid", &self.twilio_account_sid.is_some())
            .field("twilio_auth_token", &self.twilio_auth_token.is_some())
            .field("twilio_whatsapp_number", &self.twilio_whatsapp_number)
            .finish()
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str, slot: &mut String) {
        if let Some(v) = (self.0)(key) {
            *slot = v;
        }
    }

    fn path(&self, key: &str, slot: &mut PathBuf) {
        if let Some(v) = (self.0)(key) {
            *slot = PathBuf::from(v);
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, slot: &mut T) {
        if let Some(v) = (self.0)(key).and_then(|v| v.trim().parse().ok()) {
            *slot = v;
        }
    }
}
