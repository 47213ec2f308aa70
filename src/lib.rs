//! Priority classification for civic issue reports.
//!
//! Training validates a labeled CSV, fits TF-IDF and one-hot features,
//! trains three candidate classifiers and persists them with the fitted
//! preprocessors. Inference loads a named pipeline and returns a priority
//! label with a class probability distribution.

pub mod api;
pub mod config;
pub mod error;
pub mod ml;
pub mod models;

pub use error::{AppError, Result};
