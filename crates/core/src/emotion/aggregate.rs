use crate::config::ConfidenceThreshold;
use crate::emotion::{DepressionWeights, EmotionDistribution, EmotionLabel};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Depression score for a single frame, always within `0..=100`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameScore(u8);

impl FrameScore {
    pub const ZERO: FrameScore = FrameScore(0);
    pub const MAX: FrameScore = FrameScore(100);

    /// Values above 100 saturate.
    pub fn new(value: u8) -> Self {
        Self(value.min(Self::MAX.0))
    }

    /// Converts a 0..1 ratio into a rounded percentage.
    pub fn from_ratio(ratio: f64) -> Self {
        let pct = (ratio * 100.0).round();
        if !pct.is_finite() {
            return Self::ZERO;
        }
        Self(pct.clamp(0.0, 100.0) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for FrameScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// How cleared emotions are folded into one score.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScorePolicy {
    /// `weighted_sum / total_weight`; independent of how many labels cleared the threshold.
    #[default]
    WeightNormalized,
    /// `weighted_sum` as-is.
    RawWeighted,
}

impl ScorePolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "normalized" | "weight-normalized" => Some(Self::WeightNormalized),
            "raw" | "raw-weighted" => Some(Self::RawWeighted),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DominantEmotion {
    Label(EmotionLabel),
    Unknown,
}

impl fmt::Display for DominantEmotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DominantEmotion::Label(label) => f.write_str(label.as_str()),
            DominantEmotion::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Weighted combination of every emotion whose value reaches `threshold`.
///
/// Returns zero when no emotion clears the threshold.
pub fn score(
    distribution: &EmotionDistribution,
    weights: &DepressionWeights,
    threshold: ConfidenceThreshold,
    policy: ScorePolicy,
) -> FrameScore {
    let mut weighted_sum = 0.0f64;
    let mut total_weight = 0.0f64;

    for (label, value) in distribution.iter() {
        if value >= threshold.get() {
            let weight = f64::from(weights.get(label));
            weighted_sum += f64::from(value) * weight;
            total_weight += weight;
        }
    }

    if total_weight <= 0.0 {
        return FrameScore::ZERO;
    }

    let ratio = match policy {
        ScorePolicy::WeightNormalized => weighted_sum / total_weight,
        ScorePolicy::RawWeighted => weighted_sum,
    };
    FrameScore::from_ratio(ratio)
}

/// Highest-valued label, or `Unknown` when even that value is below `threshold`.
///
/// Exact ties go to the label that comes first in [`EmotionLabel::ALL`].
pub fn dominant_emotion(
    distribution: &EmotionDistribution,
    threshold: ConfidenceThreshold,
) -> DominantEmotion {
    let mut best: Option<(EmotionLabel, f32)> = None;
    for (label, value) in distribution.iter() {
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((label, value)),
        }
    }

    match best {
        Some((label, value)) if value >= threshold.get() => DominantEmotion::Label(label),
        _ => DominantEmotion::Unknown,
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assessment {
    pub score: FrameScore,
    pub dominant: DominantEmotion,
}

/// Bundles the weight table, threshold and policy applied to every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aggregator {
    pub weights: DepressionWeights,
    pub threshold: ConfidenceThreshold,
    pub policy: ScorePolicy,
}

impl Aggregator {
    pub fn new(
        weights: DepressionWeights,
        threshold: ConfidenceThreshold,
        policy: ScorePolicy,
    ) -> Self {
        Self {
            weights,
            threshold,
            policy,
        }
    }

    pub fn assess(&self, distribution: &EmotionDistribution) -> Assessment {
        Assessment {
            score: score(distribution, &self.weights, self.threshold, self.policy),
            dominant: dominant_emotion(distribution, self.threshold),
        }
    }
}
