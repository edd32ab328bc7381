use std::collections::TryReserveError;
use std::fmt;

/// Outcome class of a partitioning call, identical on every participating process.
///
/// Ordered by severity so that agreeing on a group-wide status is a max-reduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Ok = 0,
    OutOfMemory = 1,
    Fatal = 2,
}

impl Status {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Status {
        match code {
            0 => Status::Ok,
            1 => Status::OutOfMemory,
            _ => Status::Fatal,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::OutOfMemory => write!(f, "out of memory"),
            Status::Fatal => write!(f, "fatal"),
        }
    }
}

/// Errors reported by the partitioner.
#[derive(Clone, Debug, PartialEq)]
pub enum RcbError {
    /// A buffer could not be grown.
    OutOfMemory,
    /// The weighted median search did not bracket its target.
    MedianNotConverged { iterations: usize },
    /// Dots, part sizes or configuration are unusable.
    InvalidInput(String),
    /// A fatal-configured geometry check failed.
    GeometryCheck(String),
    /// The communicator could not complete a collective.
    Communication(String),
    /// Another process of the group failed; this process stopped with it.
    PeerFailure(Status),
}

impl RcbError {
    pub fn status(&self) -> Status {
        match self {
            RcbError::OutOfMemory => Status::OutOfMemory,
            RcbError::PeerFailure(status) => *status,
            _ => Status::Fatal,
        }
    }
}

impl fmt::Display for RcbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RcbError::OutOfMemory => write!(f, "Insufficient memory for dot buffers"),
            RcbError::MedianNotConverged { iterations } => {
                write!(f, "Weighted median search did not converge after {} iterations", iterations)
            }
            RcbError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            RcbError::GeometryCheck(msg) => write!(f, "Geometry check failed: {}", msg),
            RcbError::Communication(msg) => write!(f, "Communication failure: {}", msg),
            RcbError::PeerFailure(status) => write!(f, "Aborted by a peer process ({})", status),
        }
    }
}

impl std::error::Error for RcbError {}

impl From<TryReserveError> for RcbError {
    fn from(_: TryReserveError) -> Self {
        RcbError::OutOfMemory
    }
}

pub type Result<T> = std::result::Result<T, RcbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_severity_order() {
        assert!(Status::Fatal > Status::OutOfMemory);
        assert!(Status::OutOfMemory > Status::Ok);
        for s in [Status::Ok, Status::OutOfMemory, Status::Fatal] {
            assert_eq!(Status::from_code(s.code()), s);
        }
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(RcbError::OutOfMemory.status(), Status::OutOfMemory);
        assert_eq!(RcbError::MedianNotConverged { iterations: 3 }.status(), Status::Fatal);
        assert_eq!(RcbError::PeerFailure(Status::OutOfMemory).status(), Status::OutOfMemory);
        assert_eq!(
            format!("{}", RcbError::InvalidInput("bad".to_string())),
            "Invalid input: bad"
        );
    }
}
