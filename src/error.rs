use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors that abort the mux of one image/video pair.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} doesn't exist: {}", path.display())]
    MissingInput { kind: &'static str, path: PathBuf },

    #[error("Output directory doesn't exist, please create it: {}", .0.display())]
    MissingOutputDirectory(PathBuf),

    #[error("Output directory cannot be a file: {}", .0.display())]
    OutputDirectoryIsFile(PathBuf),

    #[error("Conflicting options: {0}")]
    ConflictingOptions(&'static str),

    #[error("Missing option: {0}")]
    MissingOption(&'static str),

    /// The external metadata tool failed or returned unusable output.
    #[error("Metadata tool error: {0}")]
    Tool(String),

    /// A trailer length or offset does not fit its 32-bit field.
    #[error("Trailer field overflow: {0} bytes does not fit in 32 bits")]
    TrailerTooLarge(u64),

    /// `MotionPhoto_Data` is managed by the trailer itself.
    #[error("Tag {0} is reserved and cannot be set directly")]
    ReservedTag(&'static str),
}

/// Convenience Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;
