//! Error types for the unit engine.

use thiserror::Error;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all unit-engine errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// A unit references a type id that is not in the registry.
    ///
    /// This is fatal for the load or construction in progress: a unit
    /// must never exist without a resolved type.
    #[error("Unknown unit type '{type_id}'")]
    UnknownUnitType {
        /// The offending type id.
        type_id: String,
    },

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path or label of the source that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// A unit snapshot is structurally unusable (e.g. no `type` key).
    #[error("Invalid unit snapshot: {0}")]
    InvalidSnapshot(String),

    /// Data file failed validation.
    #[error("Validation failed for '{path}': {message}")]
    ValidationError {
        /// Path or label of the data file.
        path: String,
        /// What was wrong.
        message: String,
    },
}
