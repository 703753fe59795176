use std::path::PathBuf;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("{0} does not exist")]
    MissingArtifact(PathBuf),

    #[error("pretrained model path {0} does not exist")]
    MissingPretrained(PathBuf),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode tensor state from {path}: {source}")]
    Decode {
        path: PathBuf,
        source: rmp_serde::decode::Error,
    },

    #[error("failed to encode tensor state to {path}: {source}")]
    Encode {
        path: PathBuf,
        source: rmp_serde::encode::Error,
    },

    #[error("{path} is not a {expected} file")]
    BadFormat { path: PathBuf, expected: &'static str },

    #[error("{path} has version {found}, newest supported is {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("failed to parse training states from {path}: {source}")]
    StatesParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("model has no {0} component")]
    MissingComponent(&'static str),

    #[error("cannot resolve weights '{0}' to a local file")]
    Unresolved(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}
