use std::path::PathBuf;
use thiserror::Error;

/// The result type returned from the library.
pub type Result<T> = std::result::Result<T, TidyboxError>;

/// The error type returned from the library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TidyboxError {
    /// An HTTP request failed.
    #[error("The HTTP request failed with status code {0}. Body: {1}")]
    RequestFailed(u16, String),
    /// A source URL is using an unsupported URL scheme.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedUrlScheme(String),
    /// The path in a `file://` source URL is invalid.
    #[error("Invalid file path: {0}")]
    InvalidFilePath(String),
    /// The string to strip from filenames is empty.
    #[error("The string to strip from filenames is empty")]
    EmptyPattern,
    /// The given path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    /// An archive is encrypted but no configured password decrypts it.
    #[error("No working password for archive: {0}")]
    NoWorkingPassword(String),
    /// An archive entry would extract outside the extraction root.
    #[error("Archive entry escapes the extraction root: {0}")]
    UnsafeEntryName(String),
    /// One or more extracted files failed post-extraction verification.
    #[error("Extraction verification failed for {archive}: {reason}")]
    VerificationFailed {
        /// The archive's file name.
        archive: String,
        /// Description of the first failing entry.
        reason: String,
    },

    /// Transparent wrapper for an [IO error](std::io::Error).
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Transparent wrapper for a [`zip` error](zip::result::ZipError).
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// Transparent wrapper for an [`image` error](image::ImageError).
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// Transparent wrapper for an [`ureq` error](ureq::Error).
    #[error(transparent)]
    Http(#[from] Box<ureq::Error>),
    /// Transparent wrapper for an [URL parsing error](url::ParseError).
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    /// An HTTP response's Content-Length header was invalid.
    #[error("Invalid Content-Length header: {0}")]
    InvalidContentLength(#[from] std::num::ParseIntError),
}

impl From<ureq::Error> for TidyboxError {
    fn from(e: ureq::Error) -> Self {
        TidyboxError::Http(Box::new(e))
    }
}
