//! Token estimation and sliding-window context trimming for Quill.

pub mod token;
pub mod window;

pub use token::{BpeEstimator, HeuristicEstimator, TokenEstimator, encoding_for_model};
pub use window::{WindowReport, trim, trim_with_report};
