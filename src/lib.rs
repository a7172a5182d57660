pub mod config;
pub mod error;
pub mod pipeline;
pub mod pose;
pub mod posture;
pub mod predictor;
pub mod protocol;
pub mod tracker;
