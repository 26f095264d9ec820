//! Tidybox is a small toolbox for tidying up directories: cleaning misnamed files, stripping
//! filename artifacts, extracting downloaded archives and converting domain-blocklist text
//! formats into one another.
//!
//! Each operation is a single linear pass over a directory listing or a text source. The
//! long-running operations ([`Extractor`] and [`Conversion`]) report their progress through an
//! event callback so a frontend can render progress bars or log lines without the library
//! committing to either.

mod blocklist;
mod cover;
mod error;
mod extract;
mod mvsep;
mod progress_read;
mod rename;
mod source;

pub use blocklist::{
    detect_line_format, parse_line, ConvertEvent, ConvertSummary, Conversion, ListFormat,
    DEFAULT_BLACKHOLE_ADDRESS, HTTP_CONNECT_TIMEOUT,
};
pub use cover::{fit_within, shrink_to_fit, PreparedImage, MAX_COVER_DIMENSION};
pub use error::{Result, TidyboxError};
pub use extract::{CollisionStrategy, ExtractEvent, ExtractSummary, Extractor};
pub use rename::{apply_all, plan, Rename, RenameOutcome, RenameRule, RenameSummary};
pub use source::ListSource;
