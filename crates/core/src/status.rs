// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

use crate::Result;
use std::fmt;

/// the closed set of error kinds surfaced by the library.
///
/// Names are contracts: the same kinds appear on tag status words, in
/// `Result` errors and in the strings returned by [`Status::decode`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// malformed input such as a bad tag name or attribute string
    BadParam,
    /// a required value was missing
    NullPtr,
    /// value or payload larger than the receiver allows
    TooLarge,
    /// buffer or payload smaller than required
    TooSmall,
    /// access outside the valid region of a buffer
    OutOfBounds,
    /// the operation is not supported by this PLC family or tag kind
    Unsupported,
    /// recognized but not implemented
    NotImplemented,

    /// the gateway host could not be resolved or connected
    BadGateway,
    /// the target device rejected the session or connection
    BadDevice,
    /// a connection attempt is already in progress
    Open,
    /// the underlying session or CIP connection is not usable
    BadConnection,

    /// socket read failure
    Read,
    /// socket write failure
    Write,
    /// the operation deadline elapsed
    Timeout,
    /// no data was available where some was required
    NoData,
    /// internal signal: more bytes are needed to finish a frame
    Partial,

    /// a frame failed validation
    BadData,
    /// the reply did not match the request
    BadReply,
    /// the remote returned an unrecognized status
    BadStatus,
    /// the remote returned an explicit error status
    RemoteErr,
    /// request serialization failed
    Encode,
    /// response deserialization failed
    Decode,
    /// a response could not be matched to any outstanding request
    NoMatch,

    /// memory allocation failed or a buffer limit was exceeded
    NoMem,
    /// a background thread could not be created
    Thread,
    /// mutex creation failed
    MutexInit,
    /// mutex lock failed
    MutexLock,
    /// mutex unlock failed
    MutexUnlock,
    /// mutex destruction failed
    MutexDestroy,
    /// the named object does not exist
    NotFound,
    /// a container that had to be empty was not
    NotEmpty,
    /// the operation is not allowed in the current state
    NotAllowed,

    /// the operation was aborted
    Abort,
}

impl ErrorKind {
    /// stable diagnostic name for this kind
    pub fn decode(&self) -> &'static str {
        match self {
            ErrorKind::BadParam => "ERR_BAD_PARAM",
            ErrorKind::NullPtr => "ERR_NULL_PTR",
            ErrorKind::TooLarge => "ERR_TOO_LARGE",
            ErrorKind::TooSmall => "ERR_TOO_SMALL",
            ErrorKind::OutOfBounds => "ERR_OUT_OF_BOUNDS",
            ErrorKind::Unsupported => "ERR_UNSUPPORTED",
            ErrorKind::NotImplemented => "ERR_NOT_IMPLEMENTED",
            ErrorKind::BadGateway => "ERR_BAD_GATEWAY",
            ErrorKind::BadDevice => "ERR_BAD_DEVICE",
            ErrorKind::Open => "ERR_OPEN",
            ErrorKind::BadConnection => "ERR_BAD_CONNECTION",
            ErrorKind::Read => "ERR_READ",
            ErrorKind::Write => "ERR_WRITE",
            ErrorKind::Timeout => "ERR_TIMEOUT",
            ErrorKind::NoData => "ERR_NO_DATA",
            ErrorKind::Partial => "ERR_PARTIAL",
            ErrorKind::BadData => "ERR_BAD_DATA",
            ErrorKind::BadReply => "ERR_BAD_REPLY",
            ErrorKind::BadStatus => "ERR_BAD_STATUS",
            ErrorKind::RemoteErr => "ERR_REMOTE_ERR",
            ErrorKind::Encode => "ERR_ENCODE",
            ErrorKind::Decode => "ERR_DECODE",
            ErrorKind::NoMatch => "ERR_NO_MATCH",
            ErrorKind::NoMem => "ERR_NO_MEM",
            ErrorKind::Thread => "ERR_THREAD",
            ErrorKind::MutexInit => "ERR_MUTEX_INIT",
            ErrorKind::MutexLock => "ERR_MUTEX_LOCK",
            ErrorKind::MutexUnlock => "ERR_MUTEX_UNLOCK",
            ErrorKind::MutexDestroy => "ERR_MUTEX_DESTROY",
            ErrorKind::NotFound => "ERR_NOT_FOUND",
            ErrorKind::NotEmpty => "ERR_NOT_EMPTY",
            ErrorKind::NotAllowed => "ERR_NOT_ALLOWED",
            ErrorKind::Abort => "ERR_ABORT",
        }
    }
}

/// tag status word and library result code
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// the last operation completed successfully
    Ok,
    /// an operation is in flight
    Pending,
    /// the last operation failed
    Err(ErrorKind),
}

impl Status {
    /// success or not?
    #[inline(always)]
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// has error?
    #[inline(always)]
    pub fn is_err(&self) -> bool {
        matches!(self, Status::Err(_))
    }

    /// has pending operations?
    #[inline(always)]
    pub fn is_pending(&self) -> bool {
        matches!(self, Status::Pending)
    }

    /// is timeout error?
    #[inline(always)]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Status::Err(ErrorKind::Timeout))
    }

    /// the error kind, if any
    #[inline(always)]
    pub fn err_kind(&self) -> Option<ErrorKind> {
        match self {
            Status::Err(kind) => Some(*kind),
            _ => None,
        }
    }

    /// into [`Result`]
    #[inline(always)]
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// decode status to its stable diagnostic string
    ///
    /// # Examples
    /// ```
    /// use abtag_core::Status;
    ///
    /// let status = Status::Ok;
    /// assert_eq!(status.decode(), "STATUS_OK");
    /// ```
    #[inline]
    pub fn decode(&self) -> &'static str {
        match self {
            Status::Ok => "STATUS_OK",
            Status::Pending => "STATUS_PENDING",
            Status::Err(kind) => kind.decode(),
        }
    }
}

impl From<ErrorKind> for Status {
    #[inline(always)]
    fn from(kind: ErrorKind) -> Status {
        Status::Err(kind)
    }
}

impl fmt::Display for Status {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.decode())
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STATUS: {}", self.decode())
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ok() {
        let status = Status::Ok;
        assert_eq!(status.decode(), "STATUS_OK");
        assert!(status.is_ok());
        assert!(status.into_result().is_ok());
    }

    #[test]
    fn test_status_pending() {
        let status = Status::Pending;
        assert_eq!(status.decode(), "STATUS_PENDING");
        assert!(status.is_pending());
        assert!(status.into_result().is_err());
    }

    #[test]
    fn test_status_err() {
        let status = Status::Err(ErrorKind::Timeout);
        assert_eq!(status.decode(), "ERR_TIMEOUT");
        assert!(status.is_err());
        assert!(status.is_timeout());
        assert_eq!(status.err_kind(), Some(ErrorKind::Timeout));
    }
}
