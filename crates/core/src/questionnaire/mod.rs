//! PHQ-9 self-report scoring.
//!
//! Nine items, each answered 0 ("not at all") to 3 ("nearly every day").

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

pub const ITEM_COUNT: usize = 9;
pub const MAX_ANSWER: u8 = 3;

pub const QUESTIONS: [&str; ITEM_COUNT] = [
    "Little interest or pleasure in doing things",
    "Feeling down, depressed, or hopeless",
    "Trouble falling or staying asleep, or sleeping too much",
    "Feeling tired or having little energy",
    "Poor appetite or overeating",
    "Feeling bad about yourself, or that you are a failure or have let yourself or your family down",
    "Trouble concentrating on things, such as reading the newspaper or watching television",
    "Moving or speaking so slowly that other people could have noticed, or being so fidgety or restless that you have been moving a lot more than usual",
    "Thoughts that you would be better off dead, or of hurting yourself in some way",
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QuestionnaireError {
    #[error("expected 9 answers, got {0}")]
    WrongCount(usize),
    #[error("answer {value} to item {item} is outside 0..=3")]
    OutOfRange { item: usize, value: u8 },
    #[error("username and user id must not be empty")]
    MissingIdentity,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phq9Answers([u8; ITEM_COUNT]);

impl Phq9Answers {
    pub fn new(answers: &[u8]) -> Result<Self, QuestionnaireError> {
        let answers: [u8; ITEM_COUNT] = answers
            .try_into()
            .map_err(|_| QuestionnaireError::WrongCount(answers.len()))?;
        if let Some((i, &value)) = answers.iter().enumerate().find(|(_, v)| **v > MAX_ANSWER) {
            return Err(QuestionnaireError::OutOfRange { item: i + 1, value });
        }
        Ok(Self(answers))
    }

    /// Sum of all items, `0..=27`.
    pub fn total(&self) -> u8 {
        self.0.iter().sum()
    }

    pub fn severity(&self) -> Severity {
        Severity::from_total(self.total())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Minimal,
    Mild,
    Moderate,
    ModeratelySevere,
    Severe,
}

impl Severity {
    pub fn from_total(total: u8) -> Self {
        match total {
            20..=u8::MAX => Severity::Severe,
            15..=19 => Severity::ModeratelySevere,
            10..=14 => Severity::Moderate,
            5..=9 => Severity::Mild,
            _ => Severity::Minimal,
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Severity::Severe => "Severe depression: Please seek immediate professional help.",
            Severity::ModeratelySevere => {
                "Moderately severe depression: It's highly recommended to talk to a professional."
            }
            Severity::Moderate => "Moderate depression: Consider speaking to a professional.",
            Severity::Mild => "Mild depression: Professional support might be beneficial.",
            Severity::Minimal => "Minimal or no depression: No major concerns.",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Minimal => "minimal",
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::ModeratelySevere => "moderately severe",
            Severity::Severe => "severe",
        };
        f.write_str(name)
    }
}

/// The shape an external store keeps for each completed questionnaire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreeningRecord {
    pub username: String,
    pub user_id: String,
    pub score: u8,
    pub date: SystemTime,
}

impl ScreeningRecord {
    pub fn new(
        username: impl Into<String>,
        user_id: impl Into<String>,
        answers: &Phq9Answers,
    ) -> Result<Self, QuestionnaireError> {
        let username = username.into();
        let user_id = user_id.into();
        if username.trim().is_empty() || user_id.trim().is_empty() {
            return Err(QuestionnaireError::MissingIdentity);
        }
        Ok(Self {
            username,
            user_id,
            score: answers.total(),
            date: SystemTime::now(),
        })
    }
}
