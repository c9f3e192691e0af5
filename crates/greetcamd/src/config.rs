use greetcam_core::{PolicyConfig, TrackerConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Daemon configuration: optional TOML file, then `GREETCAM_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding one statistics record per day.
    pub stats_dir: PathBuf,
    /// JSON-lines detection input; stdin when unset.
    pub input: Option<PathBuf>,
    /// Minimum seconds between two greetings of the same face.
    pub cooldown_secs: u64,
    /// Maximum center distance in pixels for a detection to continue a face.
    pub match_distance_threshold: f32,
    /// Maximum side-wise size ratio for a detection to continue a face.
    pub match_size_ratio_threshold: f32,
    /// Frames a face may go undetected before it is forgotten.
    pub max_missed_frames: u32,
    /// Optional wall-clock limit on absence, in milliseconds.
    pub max_missed_duration_ms: Option<u64>,
    pub velocity_prediction: bool,
    /// Play `greeting_variants[n-1]` for a face's n-th greeting.
    pub sequential_greetings: bool,
    pub greeting_variants: Vec<String>,
    pub default_variant: String,
    /// Greet a face on the frame it first appears.
    pub greet_new_faces: bool,
    /// Audio command argv; placeholders like `{clip}` are filled per greeting.
    pub audio_command: Vec<String>,
    /// Optional photo-capture command argv.
    pub photo_command: Option<Vec<String>>,
    /// Append every greeting event as a JSON line to this file.
    pub events_log: Option<PathBuf>,
    /// Publish status on the D-Bus session bus.
    pub dbus_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        let tracker = TrackerConfig::default();
        let policy = PolicyConfig::default();
        Self {
            stats_dir: greetcam_core::default_stats_dir(),
            input: None,
            cooldown_secs: policy.cooldown.as_secs(),
            match_distance_threshold: tracker.match_distance_threshold,
            match_size_ratio_threshold: tracker.match_size_ratio_threshold,
            max_missed_frames: tracker.max_missed_frames,
            max_missed_duration_ms: None,
            velocity_prediction: tracker.velocity_prediction,
            sequential_greetings: policy.sequential,
            greeting_variants: policy.variants,
            default_variant: policy.default_variant,
            greet_new_faces: policy.greet_new_faces,
            audio_command: vec!["aplay".into(), "-q".into(), "{clip}".into()],
            photo_command: None,
            events_log: None,
            dbus_enabled: true,
        }
    }
}

impl Config {
    /// Load the config file (if any), apply environment overrides and validate.
    ///
    /// The file is `$GREETCAM_CONFIG` when set (and must exist), otherwise
    /// `$XDG_CONFIG_HOME/greetcam/config.toml` when present.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("GREETCAM_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `GREETCAM_*` overrides read through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("GREETCAM_STATS_DIR") {
            self.stats_dir = PathBuf::from(v);
        }
        if let Some(v) = var("GREETCAM_INPUT") {
            self.input = (!v.is_empty() && v != "-").then(|| PathBuf::from(v));
        }
        self.cooldown_secs = env_parse(&var, "GREETCAM_COOLDOWN_SECS", self.cooldown_secs);
        self.match_distance_threshold = env_parse(
            &var,
            "GREETCAM_MATCH_DISTANCE_THRESHOLD",
            self.match_distance_threshold,
        );
        self.match_size_ratio_threshold = env_parse(
            &var,
            "GREETCAM_MATCH_SIZE_RATIO_THRESHOLD",
            self.match_size_ratio_threshold,
        );
        self.max_missed_frames =
            env_parse(&var, "GREETCAM_MAX_MISSED_FRAMES", self.max_missed_frames);
        if let Some(v) = var("GREETCAM_MAX_MISSED_DURATION_MS") {
            match v.trim() {
                "" | "0" => self.max_missed_duration_ms = None,
                raw => match raw.parse() {
                    Ok(ms) => self.max_missed_duration_ms = Some(ms),
                    Err(_) => tracing::warn!(
                        key = "GREETCAM_MAX_MISSED_DURATION_MS",
                        value = raw,
                        "ignoring unparsable override"
                    ),
                },
            }
        }
        self.velocity_prediction =
            env_bool(&var, "GREETCAM_VELOCITY_PREDICTION", self.velocity_prediction);
        self.sequential_greetings =
            env_bool(&var, "GREETCAM_SEQUENTIAL_GREETINGS", self.sequential_greetings);
        if let Some(v) = var("GREETCAM_GREETING_VARIANTS") {
            self.greeting_variants = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = var("GREETCAM_DEFAULT_VARIANT") {
            self.default_variant = v;
        }
        self.greet_new_faces = env_bool(&var, "GREETCAM_GREET_NEW_FACES", self.greet_new_faces);
        if let Some(v) = var("GREETCAM_AUDIO_COMMAND") {
            self.audio_command = split_command(&v);
        }
        if let Some(v) = var("GREETCAM_PHOTO_COMMAND") {
            let argv = split_command(&v);
            self.photo_command = (!argv.is_empty()).then_some(argv);
        }
        if let Some(v) = var("GREETCAM_EVENTS_LOG") {
            self.events_log = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        self.dbus_enabled = env_bool(&var, "GREETCAM_DBUS_ENABLED", self.dbus_enabled);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.match_distance_threshold.is_nan() || self.match_distance_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "match_distance_threshold must be positive, got {}",
                self.match_distance_threshold
            )));
        }
        if self.match_size_ratio_threshold.is_nan() || self.match_size_ratio_threshold < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "match_size_ratio_threshold must be at least 1.0, got {}",
                self.match_size_ratio_threshold
            )));
        }
        if self.audio_command.is_empty() {
            return Err(ConfigError::Invalid("audio_command must not be empty".into()));
        }
        if self.photo_command.as_ref().is_some_and(|argv| argv.is_empty()) {
            return Err(ConfigError::Invalid(
                "photo_command must not be empty when set".into(),
            ));
        }
        if self.default_variant.is_empty() {
            return Err(ConfigError::Invalid("default_variant must not be empty".into()));
        }
        Ok(())
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            match_distance_threshold: self.match_distance_threshold,
            match_size_ratio_threshold: self.match_size_ratio_threshold,
            max_missed_frames: self.max_missed_frames,
            max_missed_duration: self.max_missed_duration_ms.map(Duration::from_millis),
            velocity_prediction: self.velocity_prediction,
        }
    }

    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            cooldown: Duration::from_secs(self.cooldown_secs),
            sequential: self.sequential_greetings,
            variants: self.greeting_variants.clone(),
            default_variant: self.default_variant.clone(),
            greet_new_faces: self.greet_new_faces,
        }
    }
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("greetcam/config.toml")
}

fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(String::from).collect()
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable override");
            default
        }),
        None => default,
    }
}

fn env_bool(var: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match var(key).as_deref().map(str::trim) {
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some(other) => {
            tracing::warn!(key, value = other, "ignoring unparsable override");
            default
        }
        None => default,
    }
}
