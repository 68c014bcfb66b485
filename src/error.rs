use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `initrd_pack` crate.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Nothing to encode besides the null sentinel. Raised before any byte is written.
    #[error("refusing to write an image with no entries besides the null sentinel")]
    EmptyImage,

    /// A modification time that does not fit the signed 32-bit `mtime` field.
    #[error("mtime {mtime} of '{}' is outside the representable range 0..={}", .path.display(), crate::common::MAX_MTIME)]
    MtimeOutOfRange { path: PathBuf, mtime: i64 },

    /// The stream cursor after a payload copy disagrees with the planned layout.
    /// Always an internal bug or a source file that changed size mid-build.
    #[error("layout mismatch for '{name}': expected stream position {expected}, found {actual}")]
    LayoutMismatch { name: String, expected: u64, actual: u64 },

    /// A node whose containing directory was never collected.
    #[error("parent for '{}' not found among collected entries", .path.display())]
    ParentNotFound { path: PathBuf },

    /// The entry list breaks an identity or parent invariant.
    #[error("invalid entry sequence at id {id}: {reason}")]
    InvalidSequence { id: u32, reason: String },

    /// A count, length or offset that does not fit its fixed-width field.
    #[error("{what} ({value}) does not fit the image format")]
    TooLarge { what: &'static str, value: u64 },

    /// An I/O error, with the path where it happened.
    #[error("I/O error on path '{}': {source}", .path.display())]
    Io { source: std::io::Error, path: PathBuf },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// An error while serializing a listing.
    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// A decoded image is truncated or internally inconsistent.
    #[error("malformed image: {0}")]
    Malformed(String),
}

impl ImageError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ImageError {
        let path = path.into();
        move |source| ImageError::Io { source, path }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for ImageError {
    fn from(err: std::io::Error) -> Self {
        ImageError::Io { source: err, path: PathBuf::new() }
    }
}

pub type Result<T, E = ImageError> = std::result::Result<T, E>;
