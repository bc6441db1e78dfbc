//! Error types for emitrack
//!
//! Defines the crate error type using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for emitrack
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file parse errors
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration file serialize errors
    #[error("Configuration serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dataset or constants table errors
    #[error("Table error: {0}")]
    Csv(#[from] csv::Error),

    /// Image decode / encode errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Inference session errors
    #[error("Model error: {0}")]
    Model(#[from] ort::OrtError),

    /// Inference output errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Filesystem watcher errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Video source cannot be opened
    #[error("Video source error: {0}")]
    VideoSource(String),

    /// Row key already present in the dataset
    #[error("Duplicate dataset key: {0}")]
    DuplicateKey(String),

    /// Logger initialization errors
    #[error("Log error: {0}")]
    Log(String),

    /// Worker pool already shut down
    #[error("Shutdown: {0}")]
    Shutdown(String),
}

/// Convenience Result type using emitrack Error
pub type Result<T> = std::result::Result<T, Error>;
