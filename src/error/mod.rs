//! Error taxonomy and classification.
//!
//! [`classification`] defines the typed error values; [`detector`] maps raw
//! provider failures onto them using a prioritized pattern table.

pub mod classification;
pub mod detector;

// Re-export main types for convenient access
pub use classification::{ApiError, Details, ErrorKind, RawFailure};
pub use detector::{ErrorClassifier, ErrorPattern};
