use crate::emotion::EmotionLabel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// How strongly each emotion contributes to the depression signal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct DepressionWeights([f32; EmotionLabel::COUNT]);

#[derive(thiserror::Error, Debug)]
pub enum WeightsError {
    #[error("unknown emotion label in weight table: {0}")]
    UnknownLabel(String),
    #[error("weight for {label} must be finite and >= 0, got {value}")]
    InvalidWeight { label: EmotionLabel, value: f32 },
    #[error("failed to read weight table: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse weight table: {0}")]
    Json(#[from] serde_json::Error),
}

impl DepressionWeights {
    pub fn new(weights: [f32; EmotionLabel::COUNT]) -> Result<Self, WeightsError> {
        for (label, &value) in EmotionLabel::ALL.iter().zip(weights.iter()) {
            if !value.is_finite() || value < 0.0 {
                return Err(WeightsError::InvalidWeight {
                    label: *label,
                    value,
                });
            }
        }
        Ok(Self(weights))
    }

    pub fn get(&self, label: EmotionLabel) -> f32 {
        self.0[label.index()]
    }

    /// Applies overrides keyed by label name on top of the defaults.
    ///
    /// Expected shape: `{"Sad": 1.0, "Happy": 0.05}`. Labels left out keep their default.
    pub fn from_json_str(raw: &str) -> Result<Self, WeightsError> {
        let overrides: BTreeMap<String, f32> = serde_json::from_str(raw)?;
        let mut weights = Self::default().0;
        for (name, value) in overrides {
            let label = EmotionLabel::from_name(&name).ok_or(WeightsError::UnknownLabel(name))?;
            weights[label.index()] = value;
        }
        Self::new(weights)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, WeightsError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

impl Default for DepressionWeights {
    fn default() -> Self {
        Self([
            0.9, // Angry
            0.6, // Disgust
            0.7, // Fear
            0.1, // Happy
            0.3, // Neutral
            1.0, // Sad
            0.2, // Surprise
        ])
    }
}
