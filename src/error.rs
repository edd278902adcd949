//! Crate-level error type.

use thiserror::Error;

use crate::status::{DecodeStatus, EncodeStatus, Status};

/// Errors surfaced by the high level entry points.
///
/// The wire codecs report the small [`DecodeStatus`] / [`EncodeStatus`]
/// enums; everything that builds schemas or talks JSON reports through here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeStatus),

    #[error("encode failed: {0}")]
    Encode(#[from] EncodeStatus),

    #[error("Error building mini table: {0}")]
    MiniTable(String),

    #[error("{0}")]
    Def(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn def(msg: impl Into<String>) -> Self {
        Error::Def(msg.into())
    }

    pub fn json(msg: impl Into<String>) -> Self {
        Error::Json(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Copies this error's text into a [`Status`].
    pub fn to_status(&self, status: &mut Status) {
        status.set_error_format(format_args!("{}", self));
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::from(DecodeStatus::Malformed);
        assert_eq!(err.to_string(), "decode failed: Wire format was corrupt");
        let err = Error::def("duplicate symbol 'pkg.M'");
        assert_eq!(err.to_string(), "duplicate symbol 'pkg.M'");
    }

    #[test]
    fn copies_into_status() {
        let mut status = Status::new();
        Error::not_found("pkg.Missing").to_status(&mut status);
        assert!(!status.is_ok());
        assert_eq!(status.error_message(), "not found: pkg.Missing");
    }
}
