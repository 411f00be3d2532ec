use crate::emotion::{DepressionWeights, ScorePolicy};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.1;
pub const DEFAULT_WINDOW_CAPACITY: usize = 5;
pub const DEFAULT_REFRESH_HZ: f64 = 30.0;
pub const MAX_REFRESH_HZ: f64 = 1000.0;
pub const DEFAULT_MODEL_PATH: &str = "model/emotion_cnn.onnx";
pub const ENV_MODEL_PATH: &str = "DEPRESSION_SCREEN_MODEL_PATH";
pub const ENV_THRESHOLD: &str = "DEPRESSION_SCREEN_THRESHOLD";

/// Minimum classifier value an emotion needs before it counts.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
    pub fn new(value: f32) -> Result<Self, ConfigError> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::InvalidThreshold(value));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Default for ConfidenceThreshold {
    fn default() -> Self {
        Self(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

/// Number of frame scores the live smoother averages over.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowCapacity(usize);

impl WindowCapacity {
    pub fn new(frames: usize) -> Result<Self, ConfigError> {
        if frames == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(Self(frames))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for WindowCapacity {
    fn default() -> Self {
        Self(DEFAULT_WINDOW_CAPACITY)
    }
}

/// Display refresh rate driving the live frame loop.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RefreshRate {
    pub hz: f64,
}

impl RefreshRate {
    pub fn new(hz: f64) -> Result<Self, ConfigError> {
        if !hz.is_finite() || hz <= 0.0 || hz > MAX_REFRESH_HZ {
            return Err(ConfigError::InvalidRefreshRate(hz));
        }
        Ok(Self { hz })
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.hz)
    }
}

impl Default for RefreshRate {
    fn default() -> Self {
        Self {
            hz: DEFAULT_REFRESH_HZ,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScreeningConfig {
    pub model_path: PathBuf,
    pub threshold: ConfidenceThreshold,
    pub weights: DepressionWeights,
    pub policy: ScorePolicy,
    pub window: WindowCapacity,
    pub refresh: RefreshRate,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            threshold: ConfidenceThreshold::default(),
            weights: DepressionWeights::default(),
            policy: ScorePolicy::default(),
            window: WindowCapacity::default(),
            refresh: RefreshRate::default(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("confidence threshold must be within 0..=1, got {0}")]
    InvalidThreshold(f32),
    #[error("smoothing window must hold at least one frame")]
    ZeroWindow,
    #[error("refresh rate must be within (0, 1000] Hz, got {0}")]
    InvalidRefreshRate(f64),
    #[error("{key} is not a number: {value}")]
    NotANumber { key: String, value: String },
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_model_path(cli_value: Option<PathBuf>, env: &impl Env) -> PathBuf {
    match cli_value {
        Some(v) => v,
        None => env
            .var(ENV_MODEL_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
    }
}

pub fn resolve_threshold(
    cli_value: Option<f32>,
    env: &impl Env,
) -> Result<ConfidenceThreshold, ConfigError> {
    match cli_value {
        Some(v) => ConfidenceThreshold::new(v),
        None => match env.var(ENV_THRESHOLD) {
            Some(raw) => {
                let v = raw
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| ConfigError::NotANumber {
                        key: ENV_THRESHOLD.to_owned(),
                        value: raw.clone(),
                    })?;
                ConfidenceThreshold::new(v)
            }
            None => Ok(ConfidenceThreshold::default()),
        },
    }
}
