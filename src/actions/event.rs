use std::fmt;

use super::Serial;

/// Lifecycle state of an operation as reported to collaborators
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Activity {
    /// Accepted, waiting for its turn (or requeued after preemption)
    Pending,

    /// The backend is working on it
    InProgress,

    /// Finished successfully
    Successful,

    /// Finished with an error, or cancelled
    Failed,
}

impl Activity {
    /// Whether this activity ends the operation
    pub fn is_terminal(self) -> bool {
        matches!(self, Activity::Successful | Activity::Failed)
    }
}

/// Connection state of the backend while running an operation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Connectivity {
    /// Not attempting to connect
    Offline,

    /// Connection is being established
    Connecting,

    /// Connected to the remote server
    Connected,

    /// The connection was lost or closed
    Disconnected,
}

/// Error codes the backend attaches to a [`Status`]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ErrorCode {
    NoError,
    NotImplemented,
    FrameworkFault,
    SystemError,
    UnknownResponse,
    LoginFailed,
    UserCancel,
    FileSystemFull,
    NonexistentMessage,
    EnqueueFailed,
    NoConnection,
    ConnectionInUse,
    ConnectionNotReady,
    Configuration,
    InvalidAddress,
    InvalidData,
    Timeout,

    /// The backend dropped its internal state; the operation is restarted transparently
    InternalStateReset,
}

impl Default for ErrorCode {
    fn default() -> Self {
        ErrorCode::NoError
    }
}

impl ErrorCode {
    /// Short human-readable name
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            NoError => "no error",
            NotImplemented => "not implemented",
            FrameworkFault => "framework fault",
            SystemError => "system error",
            UnknownResponse => "unknown response",
            LoginFailed => "login failed",
            UserCancel => "cancelled by user",
            FileSystemFull => "filesystem full",
            NonexistentMessage => "nonexistent message",
            EnqueueFailed => "enqueue failed",
            NoConnection => "no connection",
            ConnectionInUse => "connection in use",
            ConnectionNotReady => "connection not ready",
            Configuration => "configuration error",
            InvalidAddress => "invalid address",
            InvalidData => "invalid data",
            Timeout => "timeout",
            InternalStateReset => "internal state reset",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most recent status the backend reported for an operation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    /// Error classification
    pub code: ErrorCode,

    /// Free-form text from the backend
    pub text: String,
}

impl Status {
    /// Construct a status from a code and a message
    pub fn new(code: ErrorCode, text: impl Into<String>) -> Self {
        Status {
            code,
            text: text.into(),
        }
    }

    /// Whether this status asks for the operation to be restarted
    pub fn is_internal_reset(&self) -> bool {
        self.code == ErrorCode::InternalStateReset
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.text)
        }
    }
}

/// Events exchanged with the backend worker and forwarded to collaborators.
///
/// The backend emits these for any serial it has started; the action manager only forwards the
/// ones that belong to its active operation.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ActionEvent {
    /// The operation changed lifecycle state
    Activity(Serial, Activity),

    /// The backend connection changed state
    Connectivity(Serial, Connectivity),

    /// Progress update: value out of total
    Progress(Serial, u32, u32),

    /// A new status was reported
    Status(Serial, Status),
}

impl ActionEvent {
    /// Retrieves the serial that this event is associated with
    pub fn serial(&self) -> Serial {
        use ActionEvent::*;
        match self {
            Activity(serial, _)
            | Connectivity(serial, _)
            | Progress(serial, _, _)
            | Status(serial, _) => *serial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        let status = Status::new(ErrorCode::LoginFailed, "bad password");
        assert_eq!(status.to_string(), "login failed: bad password");
        assert_eq!(Status::default().to_string(), "no error");
    }

    #[test]
    fn event_serial() {
        assert_eq!(ActionEvent::Progress(7, 1, 2).serial(), 7);
        assert_eq!(ActionEvent::Activity(3, Activity::Pending).serial(), 3);
        assert!(Activity::Failed.is_terminal());
        assert!(!Activity::InProgress.is_terminal());
    }
}
