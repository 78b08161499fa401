use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File picked up from the working directory when no config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid {key} in {path}: {value}")]
    InvalidValue {
        path: PathBuf,
        key: &'static str,
        value: String,
    },
}

/// Runtime configuration: defaults, then an optional TOML file, then `ROLLCALL_*` variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Camera device path or index (default: /dev/video0).
    pub camera_device: String,
    /// Directory holding one `<key>.jpg` reference photo per identity.
    pub images_dir: PathBuf,
    /// Append-only attendance CSV.
    pub attendance_log: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Euclidean distance at or below which two embeddings are the same person.
    pub tolerance: f32,
    /// Seconds to wait between opening the camera and the enrollment capture.
    pub enroll_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            images_dir: PathBuf::from("images"),
            attendance_log: PathBuf::from("attendance.csv"),
            model_dir: rollcall_core::default_model_dir(),
            tolerance: rollcall_core::DEFAULT_TOLERANCE,
            enroll_delay_secs: 3,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// The file is `path` if given, else `$ROLLCALL_CONFIG`, else `rollcall.toml`
    /// in the working directory when it exists. Environment variables win over
    /// file values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from))
            .or_else(|| {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                local.exists().then_some(local)
            });

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if !valid_tolerance(config.tolerance) {
            return Err(ConfigError::InvalidValue {
                path: path.to_path_buf(),
                key: "tolerance",
                value: config.tolerance.to_string(),
            });
        }
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = std::env::var_os("ROLLCALL_IMAGES_DIR") {
            self.images_dir = PathBuf::from(v);
        }
        if let Some(v) = std::env::var_os("ROLLCALL_ATTENDANCE_LOG") {
            self.attendance_log = PathBuf::from(v);
        }
        if let Some(v) = std::env::var_os("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<f32>("ROLLCALL_TOLERANCE")? {
            if !valid_tolerance(v) {
                return Err(ConfigError::InvalidEnv {
                    key: "ROLLCALL_TOLERANCE",
                    value: v.to_string(),
                });
            }
            self.tolerance = v;
        }
        if let Some(v) = env_parse("ROLLCALL_ENROLL_DELAY_SECS")? {
            self.enroll_delay_secs = v;
        }
        Ok(())
    }

    /// Warm-up interval before the enrollment capture.
    pub fn enroll_delay(&self) -> Duration {
        Duration::from_secs(self.enroll_delay_secs)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

/// Finite and non-negative.
fn valid_tolerance(tolerance: f32) -> bool {
    tolerance.is_finite() && tolerance >= 0.0
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
        Err(_) => Ok(None),
    }
}
