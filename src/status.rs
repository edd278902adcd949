//! Status codes and the fixed-size error message carrier.

use core::fmt::Write;

use thiserror::Error;

/// Result of a binary decode.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DecodeStatus {
    #[error("Ok")]
    Ok = 0,
    #[error("Wire format was corrupt")]
    Malformed = 1,
    #[error("Arena alloc failed")]
    OutOfMemory = 2,
    #[error("String field had bad UTF-8")]
    BadUtf8 = 3,
    #[error("Exceeded max depth")]
    MaxDepthExceeded = 4,
    #[error("Missing required field")]
    MissingRequired = 5,
    #[error("Unlinked sub-message field was present")]
    UnlinkedSubMessage = 6,
}

/// Result of a binary encode.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EncodeStatus {
    #[error("Ok")]
    Ok = 0,
    #[error("Arena alloc failed")]
    OutOfMemory = 1,
    #[error("Max depth exceeded")]
    MaxDepthExceeded = 2,
    #[error("Missing required field")]
    MissingRequired = 3,
}

const STATUS_MAX_MESSAGE: usize = 128;

/// Error flag plus a bounded, truncating message buffer.
///
/// Builders that can fail in many places (mini-table construction, the def
/// layer, JSON) append a human readable reason here instead of allocating.
#[derive(Clone)]
pub struct Status {
    ok: bool,
    len: usize,
    msg: [u8; STATUS_MAX_MESSAGE],
}

impl Status {
    pub const fn new() -> Self {
        Status {
            ok: true,
            len: 0,
            msg: [0; STATUS_MAX_MESSAGE],
        }
    }

    pub fn clear(&mut self) {
        self.ok = true;
        self.len = 0;
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn error_message(&self) -> &str {
        // Truncation happens on char boundaries, see `push_str`.
        core::str::from_utf8(&self.msg[..self.len]).unwrap_or("")
    }

    pub fn set_error_message(&mut self, msg: &str) {
        self.ok = false;
        self.len = 0;
        self.push_str(msg);
    }

    /// Appends formatted text and marks the status as failed.
    pub fn append_error_format(&mut self, args: core::fmt::Arguments<'_>) {
        self.ok = false;
        let _ = self.write_fmt(args);
    }

    pub fn set_error_format(&mut self, args: core::fmt::Arguments<'_>) {
        self.ok = false;
        self.len = 0;
        let _ = self.write_fmt(args);
    }

    fn push_str(&mut self, s: &str) {
        // Keep one byte spare, mirroring a NUL-terminated buffer.
        let room = STATUS_MAX_MESSAGE - 1 - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.msg[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
    }
}

impl Write for Status {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.ok {
            f.write_str("Status(ok)")
        } else {
            write!(f, "Status({:?})", self.error_message())
        }
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.ok {
            f.write_str("ok")
        } else {
            f.write_str(self.error_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_messages_match_wire_status_strings() {
        assert_eq!(DecodeStatus::Malformed.to_string(), "Wire format was corrupt");
        assert_eq!(DecodeStatus::BadUtf8.to_string(), "String field had bad UTF-8");
        assert_eq!(EncodeStatus::MissingRequired.to_string(), "Missing required field");
    }

    #[test]
    fn message_is_truncated() {
        let mut status = Status::new();
        assert!(status.is_ok());
        let long = "x".repeat(500);
        status.set_error_message(&long);
        assert!(!status.is_ok());
        assert_eq!(status.error_message().len(), STATUS_MAX_MESSAGE - 1);
    }

    #[test]
    fn append_formats() {
        let mut status = Status::new();
        status.set_error_message("Error building mini table: ");
        status.append_error_format(format_args!("invalid char {}", 'Z'));
        assert_eq!(status.error_message(), "Error building mini table: invalid char Z");
        status.clear();
        assert!(status.is_ok());
        assert_eq!(status.error_message(), "");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut status = Status::new();
        let s = "é".repeat(100);
        status.set_error_message(&s);
        assert!(status.error_message().chars().all(|c| c == 'é'));
    }
}
