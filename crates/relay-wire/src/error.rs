// SPDX-License-Identifier: Apache-2.0

//! Framing error taxonomy (spec §7, "Framing").

/// Errors from reading or writing a single frame.
#[derive(thiserror::Error, Debug)]
pub enum FramingError {
    /// Connection closed before the 10-byte header was fully read. A clean
    /// disconnect, not a transport failure - log at info (spec §4.3).
    #[error("connection closed before frame header was complete")]
    EofBeforeHeader,

    /// Connection closed before the declared body was fully read.
    #[error("connection closed before frame body was complete")]
    EofBeforeBody,

    /// Header declared a body length outside `(0, max_body]`.
    #[error("invalid frame length {length} (must be in (0, {max_body}])")]
    InvalidLength {
        /// The length declared in the header.
        length: u64,
        /// The configured upper bound.
        max_body: u64,
    },

    /// The peer reset the connection - a clean disconnect, log at info.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// Any other I/O failure reading or writing the socket.
    #[error("transport error: {0}")]
    Io(#[source] std::io::Error),
}

impl FramingError {
    /// Classifies a raw I/O error as a connection reset or a generic
    /// transport failure, matching spec §7's "Transport" vs. EOF-like
    /// distinction for logging purposes.
    #[must_use]
    pub fn from_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::ConnectionReset {
            FramingError::ConnectionReset
        } else {
            FramingError::Io(err)
        }
    }

    /// True for disconnects that are normal client behavior rather than
    /// transport failures - spec §4.3/§7 log these at info, not error.
    #[must_use]
    pub fn is_clean_disconnect(&self) -> bool {
        matches!(
            self,
            FramingError::EofBeforeHeader | FramingError::EofBeforeBody | FramingError::ConnectionReset
        )
    }
}
