use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Yaml Error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown camera: {0}")]
    UnknownCamera(String),

    #[error("Projection for camera {0} is singular")]
    SingularProjection(String),

    #[error("No matching points for cameras {cur} and {prev}")]
    NoMatchingPoints { prev: String, cur: String },

    #[error("Unsupported state version {0}")]
    UnsupportedVersion(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
