#![deny(warnings)]

pub mod classifier;
pub mod config;
pub mod emotion;
pub mod frame;
pub mod pipeline;
pub mod preprocess;
pub mod questionnaire;
pub mod session;
pub mod smoothing;
pub mod util;
