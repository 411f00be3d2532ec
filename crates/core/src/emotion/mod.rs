mod aggregate;
mod weights;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use aggregate::{dominant_emotion, score, Aggregator, Assessment, DominantEmotion, FrameScore, ScorePolicy};
pub use weights::{DepressionWeights, WeightsError};

/// Facial emotion classes, in the order the classifier emits them.
///
/// Output vector positions are bound to this ordering; do not reorder variants.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
}

impl EmotionLabel {
    pub const COUNT: usize = 7;

    pub const ALL: [EmotionLabel; Self::COUNT] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Neutral,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "Angry",
            EmotionLabel::Disgust => "Disgust",
            EmotionLabel::Fear => "Fear",
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Neutral => "Neutral",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Surprise => "Surprise",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DistributionError {
    #[error("expected {expected} emotion scores, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("invalid score {value} for {label}")]
    InvalidValue { label: EmotionLabel, value: f32 },
}

/// One frame's per-emotion scores.
///
/// Values are finite and non-negative but are not required to sum to 1.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmotionDistribution([f32; EmotionLabel::COUNT]);

impl EmotionDistribution {
    pub fn new(values: [f32; EmotionLabel::COUNT]) -> Result<Self, DistributionError> {
        for (label, &value) in EmotionLabel::ALL.iter().zip(values.iter()) {
            if !value.is_finite() || value < 0.0 {
                return Err(DistributionError::InvalidValue {
                    label: *label,
                    value,
                });
            }
        }
        Ok(Self(values))
    }

    pub fn from_slice(values: &[f32]) -> Result<Self, DistributionError> {
        let values: [f32; EmotionLabel::COUNT] =
            values
                .try_into()
                .map_err(|_| DistributionError::WrongLength {
                    expected: EmotionLabel::COUNT,
                    actual: values.len(),
                })?;
        Self::new(values)
    }

    pub fn get(&self, label: EmotionLabel) -> f32 {
        self.0[label.index()]
    }

    pub fn as_array(&self) -> &[f32; EmotionLabel::COUNT] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f32)> + '_ {
        EmotionLabel::ALL.into_iter().zip(self.0.iter().copied())
    }
}
