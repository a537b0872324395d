use thiserror::Error;
use uuid::Uuid;

use crate::geometry::Rect;

/// Errors raised by the paint-device core.
///
/// Cancellation is not an error: long-running operations report it through
/// [`OpStatus`] instead.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no conversion path from colorspace {src} to {dst}")]
    ColorSpaceMismatch { src: String, dst: String },

    #[error("geometry {rect:?} lies outside the canvas limits {limits:?}")]
    OutOfBoundsGeometry { rect: Rect, limits: Rect },

    #[error("degenerate quadrilateral: {0}")]
    DegenerateQuadrilateral(String),

    #[error("pixel data size mismatch: expected {expected} bytes, got {actual}")]
    PixelSizeMismatch { expected: usize, actual: usize },

    #[error("unknown blend mode '{0}'")]
    UnknownBlendMode(String),

    #[error("node {0} not found")]
    NodeNotFound(Uuid),

    #[error("invalid node operation: {0}")]
    InvalidNode(String),

    #[error("history misuse: {0}")]
    HistoryState(String),

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("image error: {0}")]
    Image(String),
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::Serialize(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialize(e.to_string())
    }
}

impl From<image::ImageError> for CoreError {
    fn from(e: image::ImageError) -> Self {
        CoreError::Image(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Outcome of an operation that honours a cancellation token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpStatus {
    Completed,
    Cancelled,
}

impl OpStatus {
    pub fn is_cancelled(self) -> bool {
        self == OpStatus::Cancelled
    }
}
