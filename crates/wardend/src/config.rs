use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use warden_core::policy::{ThresholdError, DEFAULT_GRANT_THRESHOLD, DEFAULT_WARN_THRESHOLD};
use warden_core::rate_limit::DEFAULT_LOG_INTERVAL;
use warden_core::Thresholds;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which message bus the control interface is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
    Off,
}

/// Daemon configuration: defaults, then an optional TOML file named by
/// `WARDEN_CONFIG`, then `WARDEN_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Known-identity gallery produced by the enrollment tool.
    pub gallery_path: PathBuf,
    /// SQLite audit log.
    pub db_path: PathBuf,
    /// Directory containing the SCRFD and ArcFace ONNX files.
    pub model_dir: PathBuf,
    /// Distance below which access is granted.
    ///
    /// The 0.45/0.60 defaults assume dlib-scale (128-d) distances. Unit-length
    /// ArcFace encodings put same-person pairs further apart, so deployments
    /// using them usually need larger thresholds.
    pub grant_threshold: f32,
    /// Distance below which a non-granted match is a low-confidence warning.
    /// Scale as for `grant_threshold`.
    pub warn_threshold: f32,
    /// Minimum seconds between audit writes.
    pub log_interval_secs: f64,
    /// Factor applied to frames before detection (0 < f ≤ 1).
    pub downscale: f32,
    /// Frames to discard at startup while exposure settles.
    pub warmup_frames: usize,
    /// Where to write the latest annotated frame, if anywhere.
    pub snapshot_path: Option<PathBuf>,
    /// Write a snapshot every N frames.
    pub snapshot_every: u64,
    pub dbus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            gallery_path: data_dir.join("gallery.json"),
            db_path: data_dir.join("access.db"),
            model_dir: PathBuf::from("/usr/share/warden/models"),
            grant_threshold: DEFAULT_GRANT_THRESHOLD,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
            log_interval_secs: DEFAULT_LOG_INTERVAL.as_secs_f64(),
            downscale: 0.5,
            warmup_frames: 4,
            snapshot_path: None,
            snapshot_every: 30,
            dbus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load from the file named by `WARDEN_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("WARDEN_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&raw)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay `WARDEN_*` variables supplied by `lookup`. Unparseable values
    /// are ignored with a warning.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("WARDEN_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("WARDEN_GALLERY_PATH") {
            self.gallery_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("WARDEN_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("WARDEN_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("WARDEN_SNAPSHOT_PATH") {
            self.snapshot_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        env_parse(&lookup, "WARDEN_CAMERA_WIDTH", &mut self.camera_width);
        env_parse(&lookup, "WARDEN_CAMERA_HEIGHT", &mut self.camera_height);
        env_parse(&lookup, "WARDEN_GRANT_THRESHOLD", &mut self.grant_threshold);
        env_parse(&lookup, "WARDEN_WARN_THRESHOLD", &mut self.warn_threshold);
        env_parse(&lookup, "WARDEN_LOG_INTERVAL_SECS", &mut self.log_interval_secs);
        env_parse(&lookup, "WARDEN_DOWNSCALE", &mut self.downscale);
        env_parse(&lookup, "WARDEN_WARMUP_FRAMES", &mut self.warmup_frames);
        env_parse(&lookup, "WARDEN_SNAPSHOT_EVERY", &mut self.snapshot_every);
        if let Some(v) = lookup("WARDEN_DBUS") {
            match v.as_str() {
                "session" => self.dbus = BusKind::Session,
                "system" => self.dbus = BusKind::System,
                "off" | "0" => self.dbus = BusKind::Off,
                other => tracing::warn!(value = other, "ignoring unknown WARDEN_DBUS"),
            }
        }
        self
    }

    pub fn thresholds(&self) -> Result<Thresholds, ThresholdError> {
        Thresholds::new(self.grant_threshold, self.warn_threshold)
    }

    /// Audit window; falls back to the default for negative or non-finite values.
    pub fn log_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.log_interval_secs).unwrap_or_else(|_| {
            tracing::warn!(
                value = self.log_interval_secs,
                "invalid log interval; using default"
            );
            DEFAULT_LOG_INTERVAL
        })
    }

    /// Detection downscale clamped to (0, 1]; out-of-range values mean no scaling.
    pub fn effective_downscale(&self) -> f32 {
        if self.downscale > 0.0 && self.downscale <= 1.0 {
            self.downscale
        } else {
            1.0
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(warden_vision::DETECTOR_MODEL)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace encoding model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join(warden_vision::ENCODER_MODEL)
            .to_string_lossy()
            .into_owned()
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("warden")
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment value"),
    }
}
